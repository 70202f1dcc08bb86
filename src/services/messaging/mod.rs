pub mod twilio;

use async_trait::async_trait;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Sends `body` to `to`, optionally attaching one media/link reference.
    async fn send_message(&self, to: &str, body: &str, media_url: Option<&str>) -> anyhow::Result<()>;
}
