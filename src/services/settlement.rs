use std::sync::Arc;

use crate::db::queries;
use crate::models::{Actor, Booking, BookingStatus, FeeSplit};
use crate::state::AppState;

pub const INVALID_CODE: &str = "Invalid OTP. Please try again.";

#[derive(Debug)]
pub enum SettlementOutcome {
    Completed { booking: Booking, split: FeeSplit },
    /// Code mismatch or no code issued yet. Booking unchanged; retries are unbounded.
    InvalidCode,
    NotInProgress,
}

/// Validates the code a provider read back from the requester and closes the
/// booking. The provider returns to the pool in the same transaction.
pub async fn submit_code(
    state: &Arc<AppState>,
    provider: &Actor,
    booking_id: &str,
    code: &str,
) -> anyhow::Result<SettlementOutcome> {
    let code = code.trim();

    let (booking, split, requester) = {
        let db = state.db();
        let Some(current) = queries::get_booking_by_id(&db, booking_id)? else {
            return Ok(SettlementOutcome::NotInProgress);
        };
        if current.status != BookingStatus::InProgress {
            return Ok(SettlementOutcome::NotInProgress);
        }

        let split = FeeSplit::for_price(current.price);
        if !queries::complete_booking(&db, booking_id, code, &split)? {
            tracing::info!(booking_id, provider = %provider.phone, "completion code rejected");
            return Ok(SettlementOutcome::InvalidCode);
        }

        let booking = queries::get_booking_by_id(&db, booking_id)?
            .ok_or_else(|| anyhow::anyhow!("booking {booking_id} vanished after completion"))?;
        let requester = queries::get_actor_by_id(&db, &booking.requester_id)?;
        (booking, split, requester)
    };

    tracing::info!(
        booking_id,
        provider_share = split.provider_share,
        platform_fee = split.platform_fee,
        payout_id = provider.payout_id.as_deref().unwrap_or(""),
        "booking completed, payout due"
    );

    if let Some(requester) = requester {
        state
            .notify(
                &requester.phone,
                &format!(
                    "Your {} service has been completed successfully! Thank you for using our service.",
                    booking.service_kind.label()
                ),
                None,
            )
            .await;
    }

    Ok(SettlementOutcome::Completed { booking, split })
}

impl SettlementOutcome {
    /// Reply to the provider who submitted the code.
    pub fn reply(&self) -> String {
        match self {
            SettlementOutcome::Completed { split, .. } => format!(
                "Service completed successfully! ₹{} has been transferred to your UPI ID. Thank you for your service.",
                split.provider_share
            ),
            SettlementOutcome::InvalidCode => INVALID_CODE.to_string(),
            SettlementOutcome::NotInProgress => "No active booking found.".to_string(),
        }
    }
}
