pub mod health;
pub mod payment;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(webhook::WEBHOOK_PATH, post(webhook::whatsapp_webhook))
        .route("/api/payment/callback", get(payment::payment_callback))
        .route("/payment/success", get(payment::payment_success))
        .with_state(state)
}
