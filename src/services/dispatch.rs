use std::sync::Arc;

use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Actor, Booking, BookingStatus, GeoPoint, OfferResponse, Service};
use crate::services::directory;
use crate::services::ledger::{self, phones_for};
use crate::services::payments::PaymentRequest;
use crate::state::AppState;

pub const JOB_TAKEN: &str = "Sorry, this job has already been taken by another mechanic.";
pub const JOB_UNAVAILABLE: &str = "Sorry, this job is no longer available.";

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Offers sent; the booking stays `pending` until a provider accepts.
    Broadcast {
        booking: Booking,
        notified: Vec<String>,
    },
    /// Nobody available nearby; the booking was cancelled.
    NoProviders { booking: Booking },
}

/// Opens a booking at `location` and offers it to every available provider
/// in range.
pub async fn dispatch(
    state: &Arc<AppState>,
    requester: &Actor,
    service: &Service,
    location: GeoPoint,
) -> anyhow::Result<DispatchOutcome> {
    let (booking, providers) = {
        let db = state.db();
        let mut booking = ledger::open_booking(&db, requester, service.kind, service.price, location)?;
        let providers = directory::nearby_available_providers(&db, &location)?;

        if providers.is_empty() {
            queries::transition_status(&db, &booking.id, BookingStatus::Pending, BookingStatus::Cancelled)?;
            booking.status = BookingStatus::Cancelled;
            tracing::info!(booking_id = %booking.id, "no providers in range, booking cancelled");
            return Ok(DispatchOutcome::NoProviders { booking });
        }

        let ids: Vec<String> = providers.iter().map(|p| p.id.clone()).collect();
        queries::insert_offers(&db, &booking.id, &ids)?;
        (booking, providers)
    };

    tracing::info!(
        booking_id = %booking.id,
        providers = providers.len(),
        "broadcasting job offer"
    );

    let offer = format!(
        "There is a repair required for {} ({}). Would you like to take it?\n\n1. Yes\n2. No",
        service.kind.label(),
        service.price_label(),
    );
    for provider in &providers {
        state.notify(&provider.phone, &offer, None).await;
    }

    Ok(DispatchOutcome::Broadcast {
        notified: providers.into_iter().map(|p| p.id).collect(),
        booking,
    })
}

/// `1`/`yes` or `2`/`no`, the reply alphabet of a job offer.
pub fn parse_offer_reply(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "yes" => Some(true),
        "2" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum OfferOutcome {
    /// This provider won the race; the requester has the payment link.
    Won(Booking),
    /// Someone else won, or the booking left `pending` before this reply.
    Taken,
    Declined,
    /// The requester cancelled between acceptance and payment-link creation.
    Withdrawn,
    /// Nothing left to answer; any closed offer was already announced.
    NoOffer,
}

impl OfferOutcome {
    pub fn reply(&self) -> &'static str {
        match self {
            OfferOutcome::Won(_) => {
                "You have accepted the job. Please wait for customer payment confirmation."
            }
            OfferOutcome::Taken => JOB_TAKEN,
            OfferOutcome::Declined => {
                "You have declined the job. You will be notified of future requests."
            }
            OfferOutcome::Withdrawn => {
                "The customer has cancelled the booking. You are available for new requests."
            }
            OfferOutcome::NoOffer => JOB_UNAVAILABLE,
        }
    }
}

enum Claim {
    Resolved(OfferOutcome),
    Won(Booking),
}

/// Whether a `1/yes/2/no` from this provider is an offer reply: they hold an
/// open offer, or their latest offer was closed under them.
pub fn has_offer(conn: &Connection, provider_id: &str) -> anyhow::Result<bool> {
    if !queries::get_open_offers_for_provider(conn, provider_id)?.is_empty() {
        return Ok(true);
    }
    Ok(queries::get_latest_offer_for_provider(conn, provider_id)?
        .map(|o| matches!(o.response, OfferResponse::Offered | OfferResponse::Taken))
        .unwrap_or(false))
}

/// Handles a provider's answer to their job offers.
///
/// A "yes" tries every open offer on a still-`pending` booking, newest
/// first; the compare-and-swap in [`queries::assign_provider`] picks exactly
/// one winner per booking. A "no" declines the newest open offer.
pub async fn respond(state: &Arc<AppState>, provider: &Actor, accept: bool) -> anyhow::Result<OfferOutcome> {
    let claim = {
        let db = state.db();

        // Retried acceptance after a failed payment-link step.
        let resume = match queries::get_active_booking_for_provider(&db, &provider.id)? {
            Some(b) if accept && b.status == BookingStatus::Accepted => Some(b),
            _ => None,
        };

        if let Some(booking) = resume {
            Claim::Won(booking)
        } else {
            let open = queries::get_open_offers_for_provider(&db, &provider.id)?;
            if !accept {
                match open.first() {
                    Some(offer) => {
                        queries::respond_to_offer(&db, &offer.booking_id, &provider.id, OfferResponse::Declined)?;
                        tracing::info!(booking_id = %offer.booking_id, provider = %provider.phone, "offer declined");
                        Claim::Resolved(OfferOutcome::Declined)
                    }
                    None => Claim::Resolved(answer_closed_offer(&db, provider, accept)?),
                }
            } else {
                let mut won = None;
                let mut lost = false;
                for offer in &open {
                    if queries::assign_provider(&db, &offer.booking_id, &provider.id)? {
                        won = Some(offer.booking_id.clone());
                        break;
                    }
                    queries::respond_to_offer(&db, &offer.booking_id, &provider.id, OfferResponse::Taken)?;
                    tracing::info!(booking_id = %offer.booking_id, provider = %provider.phone, "offer accepted too late");
                    lost = true;
                }

                match won {
                    Some(booking_id) => {
                        let booking = queries::get_booking_by_id(&db, &booking_id)?
                            .ok_or_else(|| anyhow::anyhow!("booking {booking_id} vanished after accept"))?;
                        tracing::info!(booking_id = %booking.id, provider = %provider.phone, "offer accepted, race won");
                        Claim::Won(booking)
                    }
                    None if lost => Claim::Resolved(OfferOutcome::Taken),
                    None => Claim::Resolved(answer_closed_offer(&db, provider, accept)?),
                }
            }
        }
    };

    match claim {
        Claim::Resolved(outcome) => Ok(outcome),
        Claim::Won(booking) => finish_acceptance(state, provider, booking).await,
    }
}

/// Reply when nothing pending is left to answer. An offer still marked
/// `offered` belongs to a booking another provider just won; answering it
/// closes it so the winner's broadcast skips this provider. An offer already
/// `taken` was announced by that broadcast or by a cancellation.
fn answer_closed_offer(
    conn: &Connection,
    provider: &Actor,
    accept: bool,
) -> anyhow::Result<OfferOutcome> {
    let Some(offer) = queries::get_latest_offer_for_provider(conn, &provider.id)? else {
        return Ok(OfferOutcome::NoOffer);
    };
    if offer.response != OfferResponse::Offered {
        return Ok(OfferOutcome::NoOffer);
    }

    let (response, outcome) = if accept {
        (OfferResponse::Taken, OfferOutcome::Taken)
    } else {
        (OfferResponse::Declined, OfferOutcome::Declined)
    };
    if !queries::respond_to_offer(conn, &offer.booking_id, &provider.id, response)? {
        return Ok(OfferOutcome::NoOffer);
    }
    tracing::info!(
        booking_id = %offer.booking_id,
        provider = %provider.phone,
        response = response.as_str(),
        "reply to an offer already claimed"
    );
    Ok(outcome)
}

/// `accepted -> payment_pending`: creates the payment link, sends it to the
/// requester and tells the remaining notified providers the job is gone.
async fn finish_acceptance(state: &Arc<AppState>, provider: &Actor, booking: Booking) -> anyhow::Result<OfferOutcome> {
    let requester = {
        let db = state.db();
        queries::get_actor_by_id(&db, &booking.requester_id)?
            .ok_or_else(|| anyhow::anyhow!("requester {} not found", booking.requester_id))?
    };

    let request = PaymentRequest {
        booking_id: booking.id.clone(),
        amount: booking.price,
        description: format!("Payment for {} service", booking.service_kind.label()),
        customer_name: requester.name.clone(),
        customer_phone: requester.phone.clone(),
    };
    let link = state.payments.create_link(&request).await?;

    let (updated, losers) = {
        let db = state.db();
        if !queries::set_payment_pending(&db, &booking.id, &link.reference, &link.url)? {
            tracing::warn!(booking_id = %booking.id, "booking left accepted before payment link was stored");
            return Ok(OfferOutcome::Withdrawn);
        }
        let losers = queries::close_open_offers(&db, &booking.id)?;
        let updated = queries::get_booking_by_id(&db, &booking.id)?.unwrap_or(booking);
        (updated, phones_for(&db, &losers)?)
    };

    tracing::info!(
        booking_id = %updated.id,
        payment_ref = %link.reference,
        losers = losers.len(),
        "payment link issued"
    );

    let message = format!(
        "Your service request has been accepted by {}! Please complete the payment of ₹{} to proceed: {}",
        provider.name, updated.price, link.url
    );
    state
        .notify(&requester.phone, &message, link.qr_image_url.as_deref())
        .await;

    for phone in losers {
        state.notify(&phone, JOB_TAKEN, None).await;
    }

    Ok(OfferOutcome::Won(updated))
}
