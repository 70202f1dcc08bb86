use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// One event from the messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub location: Option<GeoPoint>,
}

impl InboundMessage {
    pub fn text(from: &str, body: &str) -> Self {
        Self {
            from: from.to_string(),
            body: body.trim().to_string(),
            location: None,
        }
    }

    pub fn location(from: &str, point: GeoPoint) -> Self {
        Self {
            from: from.to_string(),
            body: String::new(),
            location: Some(point),
        }
    }

    /// Trimmed, lowercased body for keyword matching.
    pub fn normalized(&self) -> String {
        self.body.trim().to_lowercase()
    }
}

/// Outbound reply to the sender of an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub body: String,
    pub media_url: Option<String>,
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            media_url: None,
        }
    }
}
