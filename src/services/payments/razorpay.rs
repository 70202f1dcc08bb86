use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{bare_phone, PaymentLink, PaymentProvider, PaymentRequest};

const PAYMENT_LINKS_URL: &str = "https://api.razorpay.com/v1/payment_links";

pub struct RazorpayProvider {
    key_id: String,
    key_secret: String,
    callback_base_url: String,
    client: reqwest::Client,
}

impl RazorpayProvider {
    pub fn new(key_id: String, key_secret: String, callback_base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            key_id,
            key_secret,
            callback_base_url,
            client,
        })
    }
}

#[async_trait]
impl PaymentProvider for RazorpayProvider {
    async fn create_link(&self, request: &PaymentRequest) -> anyhow::Result<PaymentLink> {
        let callback_url = format!(
            "{}/api/payment/callback?booking_id={}",
            self.callback_base_url.trim_end_matches('/'),
            request.booking_id
        );

        let body = json!({
            "amount": request.amount * 100, // paise
            "currency": "INR",
            "accept_partial": false,
            "description": request.description,
            "reference_id": request.booking_id,
            "customer": {
                "name": request.customer_name,
                "contact": bare_phone(&request.customer_phone),
            },
            "notify": { "sms": true, "email": false },
            "reminder_enable": true,
            "notes": { "booking_id": request.booking_id },
            "callback_url": callback_url,
            "callback_method": "get",
        });

        let resp = self
            .client
            .post(PAYMENT_LINKS_URL)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .context("failed to call Razorpay API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Razorpay response")?;

        if !status.is_success() {
            anyhow::bail!("Razorpay API error ({}): {}", status, data);
        }

        let reference = data["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing id in Razorpay response"))?;
        let url = data["short_url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing short_url in Razorpay response"))?;

        Ok(PaymentLink {
            reference: reference.to_string(),
            url: url.to_string(),
            qr_image_url: None,
        })
    }
}
