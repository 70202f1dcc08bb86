pub mod actor;
pub mod booking;
pub mod message;
pub mod service;
pub mod session;

pub use actor::{Actor, ActorLookup, GeoPoint, Role};
pub use booking::{Booking, BookingStatus, FeeSplit, Offer, OfferResponse};
pub use message::{InboundMessage, Reply};
pub use service::{Service, ServiceKind};
pub use session::{Session, SessionData, SessionState};
