pub mod razorpay;
pub mod upi;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub booking_id: String,
    /// Whole rupees.
    pub amount: i64,
    pub description: String,
    pub customer_name: String,
    pub customer_phone: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLink {
    /// Provider-side reference for reconciliation.
    pub reference: String,
    /// Payable URL, sent in the message body.
    pub url: String,
    /// Scannable image of the link, sent as the media attachment when present.
    pub qr_image_url: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_link(&self, request: &PaymentRequest) -> anyhow::Result<PaymentLink>;
}

/// Strips the messaging channel prefix from an identity (`whatsapp:+91…`).
pub fn bare_phone(identity: &str) -> &str {
    identity.strip_prefix("whatsapp:").unwrap_or(identity)
}
