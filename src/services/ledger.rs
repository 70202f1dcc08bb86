use std::sync::Arc;

use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Actor, ActorLookup, Booking, BookingStatus, GeoPoint, OfferResponse, ServiceKind};
use crate::state::AppState;

/// Creates a `pending` booking for a requester.
pub fn open_booking(
    conn: &Connection,
    requester: &Actor,
    service_kind: ServiceKind,
    price: i64,
    location: GeoPoint,
) -> anyhow::Result<Booking> {
    let booking = Booking::new(&requester.id, service_kind, price, location);
    queries::create_booking(conn, &booking)?;
    tracing::info!(
        booking_id = %booking.id,
        requester = %requester.phone,
        service = service_kind.as_str(),
        price,
        "booking created"
    );
    Ok(booking)
}

/// The sender's non-terminal booking, if any.
pub fn active_booking(conn: &Connection, lookup: &ActorLookup) -> anyhow::Result<Option<Booking>> {
    match lookup {
        ActorLookup::Requester(actor) => queries::get_active_booking_for_requester(conn, &actor.id),
        ActorLookup::Provider(actor) => queries::get_active_booking_for_provider(conn, &actor.id),
        ActorLookup::Unknown => Ok(None),
    }
}

#[derive(Debug)]
pub enum PaymentOutcome {
    /// `payment_pending -> in_progress` happened on this call.
    Started(Booking),
    /// Duplicate callback for a booking that is already past payment.
    AlreadyPaid,
    NotAwaitingPayment(BookingStatus),
    NotFound,
}

/// Applies a successful payment callback.
pub fn record_payment(
    conn: &Connection,
    booking_id: &str,
    payment_id: Option<&str>,
) -> anyhow::Result<PaymentOutcome> {
    if queries::mark_paid(conn, booking_id, payment_id)? {
        let booking = queries::get_booking_by_id(conn, booking_id)?
            .ok_or_else(|| anyhow::anyhow!("booking {booking_id} vanished after payment"))?;
        tracing::info!(booking_id, payment_id = ?payment_id, "payment received");
        return Ok(PaymentOutcome::Started(booking));
    }

    Ok(match queries::get_booking_by_id(conn, booking_id)? {
        None => PaymentOutcome::NotFound,
        Some(b) if matches!(b.status, BookingStatus::InProgress | BookingStatus::Completed) => {
            PaymentOutcome::AlreadyPaid
        }
        Some(b) => PaymentOutcome::NotAwaitingPayment(b.status),
    })
}

#[derive(Debug)]
pub enum CancelOutcome {
    Cancelled {
        booking: Booking,
        from: BookingStatus,
    },
    NotCancellable(BookingStatus),
}

/// Requester-initiated cancellation. Releases the assigned provider and
/// tells every affected provider.
pub async fn cancel_by_requester(state: &Arc<AppState>, booking: &Booking) -> anyhow::Result<CancelOutcome> {
    let (cancelled, from, assigned, outstanding) = {
        let db = state.db();
        let outstanding: Vec<String> = queries::list_offers(&db, &booking.id)?
            .into_iter()
            .filter(|o| o.response == OfferResponse::Offered)
            .map(|o| o.provider_id)
            .collect();

        let Some(from) = queries::cancel_booking(&db, &booking.id)? else {
            let current = queries::get_booking_by_id(&db, &booking.id)?
                .map(|b| b.status)
                .unwrap_or(booking.status);
            return Ok(CancelOutcome::NotCancellable(current));
        };

        let cancelled = queries::get_booking_by_id(&db, &booking.id)?
            .ok_or_else(|| anyhow::anyhow!("booking {} vanished after cancel", booking.id))?;
        let assigned = match &cancelled.provider_id {
            Some(id) => queries::get_actor_by_id(&db, id)?,
            None => None,
        };
        let outstanding = phones_for(&db, &outstanding)?;
        (cancelled, from, assigned, outstanding)
    };

    tracing::info!(booking_id = %booking.id, from = from.as_str(), "booking cancelled by requester");

    if let Some(provider) = assigned {
        state
            .notify(
                &provider.phone,
                "The customer has cancelled the booking. You are available for new requests.",
                None,
            )
            .await;
    }
    for phone in outstanding {
        state
            .notify(&phone, "Sorry, this job is no longer available.", None)
            .await;
    }

    Ok(CancelOutcome::Cancelled {
        booking: cancelled,
        from,
    })
}

/// Resolves actor ids to their messaging identities, skipping unknown ids.
pub(crate) fn phones_for(conn: &Connection, actor_ids: &[String]) -> anyhow::Result<Vec<String>> {
    let mut phones = Vec::with_capacity(actor_ids.len());
    for id in actor_ids {
        if let Some(actor) = queries::get_actor_by_id(conn, id)? {
            phones.push(actor.phone);
        }
    }
    Ok(phones)
}
