use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;

use super::{PaymentLink, PaymentProvider, PaymentRequest};

const QR_RENDER_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

/// Image URL rendering `link` as a QR code, for attaching to a WhatsApp
/// message. Only UPI deep links get one; web payment pages are sent as text.
pub fn qr_image_url(link: &str) -> Option<String> {
    if !link.starts_with("upi://") {
        return None;
    }
    Url::parse_with_params(QR_RENDER_URL, &[("size", "300x300"), ("data", link)])
        .ok()
        .map(|u| u.to_string())
}

/// Builds a UPI deep link paying the platform's UPI id directly. Used when no
/// payment gateway is configured; completion is still reported through the
/// payment callback.
pub struct UpiLinkProvider {
    payee_upi_id: String,
}

impl UpiLinkProvider {
    pub fn new(payee_upi_id: String) -> Self {
        Self { payee_upi_id }
    }
}

#[async_trait]
impl PaymentProvider for UpiLinkProvider {
    async fn create_link(&self, request: &PaymentRequest) -> anyhow::Result<PaymentLink> {
        anyhow::ensure!(!self.payee_upi_id.is_empty(), "ADMIN_UPI_ID is not configured");

        let amount = request.amount.to_string();
        let url = Url::parse_with_params(
            "upi://pay",
            &[
                ("pa", self.payee_upi_id.as_str()),
                ("pn", "MechanicBooking"),
                ("am", amount.as_str()),
                ("cu", "INR"),
                ("tn", request.description.as_str()),
                ("tr", request.booking_id.as_str()),
            ],
        )
        .context("failed to build UPI link")?;

        let url = url.to_string();
        Ok(PaymentLink {
            reference: format!("upi-{}", request.booking_id),
            qr_image_url: qr_image_url(&url),
            url,
        })
    }
}
