use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// Public base URL, used for payment callbacks and the success redirect.
    pub base_url: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub admin_upi_id: String,
    pub session_timeout_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "mechanic_dispatch.db".to_string()),
            base_url: env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            razorpay_key_id: env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            razorpay_key_secret: env::var("RAZORPAY_KEY_SECRET").unwrap_or_default(),
            admin_upi_id: env::var("ADMIN_UPI_ID").unwrap_or_default(),
            session_timeout_minutes: env::var("SESSION_TIMEOUT_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|m| *m > 0)
                .unwrap_or(30),
        }
    }

    pub fn razorpay_enabled(&self) -> bool {
        !self.razorpay_key_id.is_empty() && !self.razorpay_key_secret.is_empty()
    }
}
