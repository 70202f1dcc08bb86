use std::sync::Arc;

use rand::Rng;

use crate::db::queries;
use crate::models::{Booking, BookingStatus, Role};
use crate::state::AppState;

pub const ASK_FOR_CODE: &str =
    "Please ask the customer for the OTP once the service is completed. Reply with the OTP to complete the service.";

/// `reached` or `i reached`, from either side.
pub fn is_arrival_keyword(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "reached" | "i reached")
}

pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Sent once a booking enters `in_progress`.
pub async fn announce(state: &Arc<AppState>, booking: &Booking) -> anyhow::Result<()> {
    let (requester, provider) = {
        let db = state.db();
        let requester = queries::get_actor_by_id(&db, &booking.requester_id)?;
        let provider = match &booking.provider_id {
            Some(id) => queries::get_actor_by_id(&db, id)?,
            None => None,
        };
        (requester, provider)
    };

    let (Some(requester), Some(provider)) = (requester, provider) else {
        anyhow::bail!("booking {} is missing a party", booking.id);
    };

    state
        .notify(
            &provider.phone,
            &format!(
                "Payment received for booking #{}. Customer location: {}\n\nPlease confirm when you reach the customer's location by replying \"I reached\"",
                booking.id,
                booking.location.maps_url()
            ),
            None,
        )
        .await;
    state
        .notify(
            &requester.phone,
            &format!(
                "Your payment has been received. Mechanic {} is on the way to your location. Please confirm when the mechanic arrives by replying \"Reached\".",
                provider.name
            ),
            None,
        )
        .await;
    Ok(())
}

#[derive(Debug, PartialEq)]
pub enum ArrivalOutcome {
    /// Own flag set; the other party has not confirmed yet.
    Waiting,
    /// Both flags set by this call; the code was generated and stored.
    CodeIssued(String),
    /// Own flag was already set. No state change.
    AlreadyConfirmed { code_issued: bool },
    NotInProgress,
}

/// Records one party's arrival and, once both have arrived, issues the
/// one-time code exactly once.
pub async fn confirm_arrival(
    state: &Arc<AppState>,
    booking_id: &str,
    role: Role,
) -> anyhow::Result<ArrivalOutcome> {
    let (outcome, booking) = {
        let db = state.db();
        let flagged = queries::set_arrival_flag(&db, booking_id, role)?;
        let Some(booking) = queries::get_booking_by_id(&db, booking_id)? else {
            return Ok(ArrivalOutcome::NotInProgress);
        };
        if booking.status != BookingStatus::InProgress {
            return Ok(ArrivalOutcome::NotInProgress);
        }

        let outcome = if !flagged {
            ArrivalOutcome::AlreadyConfirmed {
                code_issued: booking.otp.is_some(),
            }
        } else if booking.requester_arrived && booking.provider_arrived {
            let code = generate_code();
            if queries::set_otp_if_absent(&db, booking_id, &code)? {
                ArrivalOutcome::CodeIssued(code)
            } else {
                ArrivalOutcome::AlreadyConfirmed { code_issued: true }
            }
        } else {
            ArrivalOutcome::Waiting
        };
        (outcome, booking)
    };

    tracing::info!(booking_id, role = role.as_str(), outcome = ?outcome, "arrival confirmed");

    if let ArrivalOutcome::CodeIssued(code) = &outcome {
        // The code only ever travels to the requester.
        let other = {
            let db = state.db();
            let other_id = match role {
                Role::Provider => Some(booking.requester_id.clone()),
                Role::Requester => booking.provider_id.clone(),
            };
            match other_id {
                Some(id) => queries::get_actor_by_id(&db, &id)?,
                None => None,
            }
        };
        if let Some(other) = other {
            let body = match role {
                Role::Provider => code_message(code),
                Role::Requester => ASK_FOR_CODE.to_string(),
            };
            state.notify(&other.phone, &body, None).await;
        }
    }

    Ok(outcome)
}

fn code_message(code: &str) -> String {
    format!("Your OTP is {code}. Please share this with the mechanic once the service is completed.")
}

impl ArrivalOutcome {
    /// Reply to the party that sent the confirmation.
    pub fn reply(&self, role: Role) -> String {
        let text = match (self, role) {
            (ArrivalOutcome::CodeIssued(code), Role::Requester) => return code_message(code),
            (ArrivalOutcome::Waiting, Role::Provider) => {
                "Thank you for confirming your arrival. Waiting for customer confirmation."
            }
            (ArrivalOutcome::Waiting, Role::Requester) => {
                "Thank you for confirming the mechanic's arrival. Waiting for mechanic confirmation."
            }
            (ArrivalOutcome::CodeIssued(_), Role::Provider) => ASK_FOR_CODE,
            (ArrivalOutcome::AlreadyConfirmed { code_issued: true }, Role::Provider) => ASK_FOR_CODE,
            (ArrivalOutcome::AlreadyConfirmed { code_issued: true }, Role::Requester) => {
                "Your OTP has already been sent. Share it with the mechanic once the service is completed."
            }
            (ArrivalOutcome::AlreadyConfirmed { code_issued: false }, Role::Provider) => {
                "You have already confirmed your arrival. Waiting for customer confirmation."
            }
            (ArrivalOutcome::AlreadyConfirmed { code_issued: false }, Role::Requester) => {
                "You have already confirmed the mechanic's arrival. Waiting for mechanic confirmation."
            }
            (ArrivalOutcome::NotInProgress, _) => "No active booking found.",
        };
        text.to_string()
    }
}
