pub mod conversation;
pub mod directory;
pub mod dispatch;
pub mod handshake;
pub mod ledger;
pub mod messaging;
pub mod payments;
pub mod sessions;
pub mod settlement;
