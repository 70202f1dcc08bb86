use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Form;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::errors::AppError;
use crate::models::{GeoPoint, InboundMessage};
use crate::services::conversation;
use crate::state::AppState;

pub const WEBHOOK_PATH: &str = "/api/whatsapp/webhook";

#[derive(Deserialize)]
pub struct TwilioWebhookForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "Latitude")]
    pub latitude: Option<String>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<String>,
}

impl TwilioWebhookForm {
    /// Location pins arrive as `Latitude`/`Longitude` alongside an empty body.
    fn location(&self) -> Option<GeoPoint> {
        let lat = self.latitude.as_deref()?.trim().parse::<f64>().ok()?;
        let lon = self.longitude.as_deref()?.trim().parse::<f64>().ok()?;
        Some(GeoPoint::new(lat, lon))
    }

    fn signed_params(&self) -> Vec<(&str, &str)> {
        let mut params = vec![
            ("From", self.from.as_str()),
            ("To", self.to.as_str()),
            ("Body", self.body.as_str()),
        ];
        let optional = [
            ("MessageSid", &self.message_sid),
            ("Latitude", &self.latitude),
            ("Longitude", &self.longitude),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.push((key, value.as_str()));
            }
        }
        params
    }
}

fn validate_twilio_signature(
    auth_token: &str,
    signature: &str,
    url: &str,
    params: &[(&str, &str)],
) -> bool {
    // URL followed by every param as key+value, sorted by key
    let mut data = url.to_string();
    let mut sorted_params = params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in &sorted_params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = match Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(data.as_bytes());
    let result = mac.finalize().into_bytes();
    let expected = base64::engine::general_purpose::STANDARD.encode(result);

    expected == signature
}

fn check_signature(state: &AppState, headers: &HeaderMap, form: &TwilioWebhookForm) -> Result<(), AppError> {
    // No auth token configured: local development, skip validation.
    if state.config.twilio_auth_token.is_empty() {
        return Ok(());
    }

    let signature = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if signature.is_empty() {
        tracing::warn!("missing X-Twilio-Signature header");
        return Err(AppError::Forbidden("missing signature".to_string()));
    }

    // Behind a proxy the public scheme/host come from the forwarded headers
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let url = format!("{proto}://{host}{WEBHOOK_PATH}");

    if !validate_twilio_signature(&state.config.twilio_auth_token, signature, &url, &form.signed_params()) {
        tracing::warn!(url = %url, "invalid Twilio signature");
        return Err(AppError::Forbidden("invalid signature".to_string()));
    }
    Ok(())
}

pub async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TwilioWebhookForm>,
) -> Result<Response, AppError> {
    check_signature(&state, &headers, &form)?;

    let from = form.from.trim();
    if from.is_empty() {
        return Err(AppError::BadRequest("missing From".to_string()));
    }

    let message = match form.location() {
        Some(point) => InboundMessage::location(from, point),
        None => InboundMessage::text(from, &form.body),
    };

    tracing::info!(
        from = %message.from,
        body = %message.body,
        message_sid = form.message_sid.as_deref().unwrap_or(""),
        "incoming WhatsApp message"
    );

    let reply = conversation::process_message(&state, &message)
        .await
        .with_context(|| format!("failed to process message from {from}"))?;

    state
        .messaging
        .send_message(from, &reply.body, reply.media_url.as_deref())
        .await
        .with_context(|| format!("failed to send reply to {from}"))?;

    Ok(twiml_response())
}

fn twiml_response() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<Response></Response>",
    )
        .into_response()
}
