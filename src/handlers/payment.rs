use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::errors::AppError;
use crate::services::handshake;
use crate::services::ledger::{self, PaymentOutcome};
use crate::state::AppState;

static SUCCESS_HTML: &str = include_str!("../web/payment_success.html");

#[derive(Debug, Deserialize)]
pub struct PaymentCallbackQuery {
    pub booking_id: Option<String>,
    #[serde(alias = "razorpay_payment_link_status")]
    pub status: Option<String>,
    pub razorpay_payment_id: Option<String>,
}

/// Redirect target of the payment provider. Moves the booking into
/// `in_progress` and starts the arrival handshake.
pub async fn payment_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PaymentCallbackQuery>,
) -> Result<Response, AppError> {
    let booking_id = query
        .booking_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing booking_id".to_string()))?;

    let status = query.status.as_deref().unwrap_or("");
    if status != "paid" {
        tracing::warn!(booking_id, status, "payment callback without success status");
        return Err(AppError::BadRequest(format!("payment not completed (status: {status:?})")));
    }

    let outcome = {
        let db = state.db();
        ledger::record_payment(&db, booking_id, query.razorpay_payment_id.as_deref())?
    };

    match outcome {
        PaymentOutcome::Started(booking) => {
            handshake::announce(&state, &booking).await?;
        }
        PaymentOutcome::AlreadyPaid => {
            tracing::info!(booking_id, "duplicate payment callback");
        }
        PaymentOutcome::NotAwaitingPayment(current) => {
            return Err(AppError::Conflict(format!(
                "booking {booking_id} is {}, not awaiting payment",
                current.as_str()
            )));
        }
        PaymentOutcome::NotFound => {
            return Err(AppError::NotFound(format!("booking {booking_id}")));
        }
    }

    Ok(Redirect::to("/payment/success").into_response())
}

pub async fn payment_success() -> Html<&'static str> {
    Html(SUCCESS_HTML)
}
