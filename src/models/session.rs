use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{GeoPoint, Role, ServiceKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    None,
    Greeted,
    ProviderName,
    ProviderLocation,
    ProviderPayout,
    Done,
    RequesterName,
    ServiceSelect,
    ServiceConfirm,
    RequesterLocation,
    AwaitingProvider,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::None => "none",
            SessionState::Greeted => "greeted",
            SessionState::ProviderName => "provider_name",
            SessionState::ProviderLocation => "provider_location",
            SessionState::ProviderPayout => "provider_payout",
            SessionState::Done => "done",
            SessionState::RequesterName => "requester_name",
            SessionState::ServiceSelect => "service_select",
            SessionState::ServiceConfirm => "service_confirm",
            SessionState::RequesterLocation => "requester_location",
            SessionState::AwaitingProvider => "awaiting_provider",
        }
    }

    /// States in which a greeting starts a fresh conversation.
    pub fn accepts_greeting(&self) -> bool {
        matches!(
            self,
            SessionState::None | SessionState::Done | SessionState::AwaitingProvider
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    pub role: Option<Role>,
    pub name: Option<String>,
    pub location: Option<GeoPoint>,
    pub requester_id: Option<String>,
    pub service_kind: Option<ServiceKind>,
    pub price: Option<i64>,
    pub booking_id: Option<String>,
    pub notified_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub phone: String,
    pub state: SessionState,
    pub data: SessionData,
    pub last_activity: NaiveDateTime,
}

impl Session {
    pub fn new(phone: &str) -> Self {
        Self {
            phone: phone.to_string(),
            state: SessionState::None,
            data: SessionData::default(),
            last_activity: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = chrono::Utc::now().naive_utc();
    }

    pub fn is_expired(&self, now: NaiveDateTime, ttl: chrono::Duration) -> bool {
        now - self.last_activity > ttl
    }

    /// Drop everything collected so far and go back to idle.
    pub fn reset(&mut self) {
        self.state = SessionState::None;
        self.data = SessionData::default();
    }
}
