use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::messaging::MessagingProvider;
use crate::services::payments::PaymentProvider;
use crate::services::sessions::SessionStore;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub messaging: Box<dyn MessagingProvider>,
    pub payments: Box<dyn PaymentProvider>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Locks the store. A poisoned lock is recovered: every write is a
    /// single statement or transaction, so the connection stays consistent.
    pub fn db(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Best-effort notification to another actor. Failures are logged, not
    /// propagated: the ledger already records the state the message reports.
    pub async fn notify(&self, to: &str, body: &str, media_url: Option<&str>) {
        if let Err(e) = self.messaging.send_message(to, body, media_url).await {
            tracing::error!(error = %e, to, "failed to send notification");
        }
    }
}
