use std::sync::{Arc, Mutex};

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mechanic_dispatch::config::AppConfig;
use mechanic_dispatch::db;
use mechanic_dispatch::handlers;
use mechanic_dispatch::services::messaging::twilio::TwilioWhatsAppProvider;
use mechanic_dispatch::services::payments::razorpay::RazorpayProvider;
use mechanic_dispatch::services::payments::upi::UpiLinkProvider;
use mechanic_dispatch::services::payments::PaymentProvider;
use mechanic_dispatch::services::sessions::{SessionStore, SWEEP_INTERVAL};
use mechanic_dispatch::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.twilio_account_sid.is_empty() || config.twilio_phone_number.is_empty() {
        tracing::warn!("TWILIO_ACCOUNT_SID / TWILIO_PHONE_NUMBER not set, outbound messages will fail");
    }
    let messaging = TwilioWhatsAppProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    )?;

    let payments: Box<dyn PaymentProvider> = if config.razorpay_enabled() {
        tracing::info!("using Razorpay payment links");
        Box::new(RazorpayProvider::new(
            config.razorpay_key_id.clone(),
            config.razorpay_key_secret.clone(),
            config.base_url.clone(),
        )?)
    } else {
        anyhow::ensure!(
            !config.admin_upi_id.is_empty(),
            "either RAZORPAY_KEY_ID/RAZORPAY_KEY_SECRET or ADMIN_UPI_ID must be set"
        );
        tracing::info!(payee = %config.admin_upi_id, "using UPI deep links");
        Box::new(UpiLinkProvider::new(config.admin_upi_id.clone()))
    };

    let sessions = Arc::new(SessionStore::new(chrono::Duration::minutes(
        config.session_timeout_minutes,
    )));
    let sweeper = sessions.spawn_sweeper(SWEEP_INTERVAL);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        messaging: Box::new(messaging),
        payments,
        sessions,
    });

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
