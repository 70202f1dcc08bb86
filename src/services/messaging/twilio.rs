use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::MessagingProvider;

/// Twilio WhatsApp sender. Recipient and sender numbers use Twilio's
/// `whatsapp:+<E.164>` address form.
pub struct TwilioWhatsAppProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioWhatsAppProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            account_sid,
            auth_token,
            from_number,
            client,
        })
    }
}

#[async_trait]
impl MessagingProvider for TwilioWhatsAppProvider {
    async fn send_message(&self, to: &str, body: &str, media_url: Option<&str>) -> anyhow::Result<()> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let mut form = vec![("To", to), ("From", self.from_number.as_str()), ("Body", body)];
        if let Some(media) = media_url {
            form.push(("MediaUrl", media));
        }

        self.client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .context("failed to send Twilio WhatsApp message")?
            .error_for_status()
            .context("Twilio API returned error")?;

        tracing::debug!(to, has_media = media_url.is_some(), "message sent");
        Ok(())
    }
}
