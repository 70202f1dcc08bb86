use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{GeoPoint, ServiceKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub requester_id: String,
    pub provider_id: Option<String>,
    pub service_kind: ServiceKind,
    pub status: BookingStatus,
    pub location: GeoPoint,
    pub price: i64,
    pub payment_ref: Option<String>,
    pub payment_link: Option<String>,
    pub otp: Option<String>,
    pub requester_arrived: bool,
    pub provider_arrived: bool,
    pub provider_share: Option<i64>,
    pub platform_fee: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

impl Booking {
    pub fn new(requester_id: &str, service_kind: ServiceKind, price: i64, location: GeoPoint) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requester_id: requester_id.to_string(),
            provider_id: None,
            service_kind,
            status: BookingStatus::Pending,
            location,
            price,
            payment_ref: None,
            payment_link: None,
            otp: None,
            requester_arrived: false,
            provider_arrived: false,
            provider_share: None,
            platform_fee: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    PaymentPending,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::PaymentPending => "payment_pending",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "accepted" => Some(BookingStatus::Accepted),
            "payment_pending" => Some(BookingStatus::PaymentPending),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Statuses a requester may still cancel from. Once the payment link is
    /// out the payment callback must find the booking intact.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Accepted)
    }

    /// Edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, next) {
            (Pending, Accepted)
            | (Accepted, PaymentPending)
            | (PaymentPending, InProgress)
            | (InProgress, Completed) => true,
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }
}

/// A provider's standing on a broadcast job offer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferResponse {
    Offered,
    Accepted,
    Declined,
    Taken,
}

impl OfferResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferResponse::Offered => "offered",
            OfferResponse::Accepted => "accepted",
            OfferResponse::Declined => "declined",
            OfferResponse::Taken => "taken",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "accepted" => OfferResponse::Accepted,
            "declined" => OfferResponse::Declined,
            "taken" => OfferResponse::Taken,
            _ => OfferResponse::Offered,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub booking_id: String,
    pub provider_id: String,
    pub response: OfferResponse,
    pub created_at: NaiveDateTime,
    pub responded_at: Option<NaiveDateTime>,
}

/// Payout split for a completed booking. The provider share is rounded down;
/// the remainder stays with the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub provider_share: i64,
    pub platform_fee: i64,
}

impl FeeSplit {
    pub fn for_price(price: i64) -> Self {
        let provider_share = price * 83 / 100;
        Self {
            provider_share,
            platform_fee: price - provider_share,
        }
    }
}
