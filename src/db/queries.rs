use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Actor, Booking, BookingStatus, FeeSplit, GeoPoint, Offer, OfferResponse, Role, Service,
    ServiceKind,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now_str() -> String {
    Utc::now().naive_utc().format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

// ── Actors ──

const ACTOR_COLUMNS: &str =
    "id, phone, name, role, latitude, longitude, is_available, payout_id, created_at";

pub fn insert_actor(conn: &Connection, actor: &Actor) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO actors (id, phone, name, role, latitude, longitude, is_available, payout_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            actor.id,
            actor.phone,
            actor.name,
            actor.role.as_str(),
            actor.location.map(|p| p.latitude),
            actor.location.map(|p| p.longitude),
            actor.is_available.map(|a| a as i32),
            actor.payout_id,
            actor.created_at.format(TS_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_actor_by_phone(conn: &Connection, phone: &str) -> anyhow::Result<Option<Actor>> {
    let sql = format!("SELECT {ACTOR_COLUMNS} FROM actors WHERE phone = ?1");
    conn.query_row(&sql, params![phone], |row| Ok(parse_actor_row(row)))
        .optional()?
        .transpose()
}

pub fn get_actor_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Actor>> {
    let sql = format!("SELECT {ACTOR_COLUMNS} FROM actors WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| Ok(parse_actor_row(row)))
        .optional()?
        .transpose()
}

/// Available providers within `radius_m` of `center`, nearest first.
///
/// The index narrows candidates to a bounding box; exact distance is
/// computed here since SQLite has no spherical geometry.
pub fn find_available_providers_near(
    conn: &Connection,
    center: &GeoPoint,
    radius_m: f64,
) -> anyhow::Result<Vec<(Actor, f64)>> {
    let (d_lat, d_lon) = center.bounding_deltas(radius_m);
    let (west, east) = longitude_ranges(center.longitude - d_lon, center.longitude + d_lon);
    let sql = format!(
        "SELECT {ACTOR_COLUMNS} FROM actors
         WHERE role = 'provider' AND is_available = 1
           AND latitude BETWEEN ?1 AND ?2
           AND (longitude BETWEEN ?3 AND ?4 OR longitude BETWEEN ?5 AND ?6)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            center.latitude - d_lat,
            center.latitude + d_lat,
            west.0,
            west.1,
            east.0,
            east.1,
        ],
        |row| Ok(parse_actor_row(row)),
    )?;

    let mut found = vec![];
    for row in rows {
        let actor = row??;
        if let Some(point) = actor.location {
            let distance = center.distance_m(&point);
            if distance <= radius_m {
                found.push((actor, distance));
            }
        }
    }
    found.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(found)
}

/// Splits a longitude window that crosses the antimeridian into two ranges
/// inside [-180, 180]. A window that does not cross is returned twice.
fn longitude_ranges(min_lon: f64, max_lon: f64) -> ((f64, f64), (f64, f64)) {
    if min_lon < -180.0 {
        ((min_lon + 360.0, 180.0), (-180.0, max_lon))
    } else if max_lon > 180.0 {
        ((min_lon, 180.0), (-180.0, max_lon - 360.0))
    } else {
        ((min_lon, max_lon), (min_lon, max_lon))
    }
}

fn parse_actor_row(row: &rusqlite::Row) -> anyhow::Result<Actor> {
    let role_str: String = row.get(3)?;
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;
    let is_available: Option<i32> = row.get(6)?;
    let created_at_str: String = row.get(8)?;

    let role = Role::parse(&role_str)
        .ok_or_else(|| anyhow::anyhow!("unknown actor role: {role_str}"))?;

    Ok(Actor {
        id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        role,
        location: latitude.zip(longitude).map(|(lat, lon)| GeoPoint::new(lat, lon)),
        is_available: is_available.map(|a| a != 0),
        payout_id: row.get(7)?,
        created_at: parse_ts(&created_at_str),
    })
}

// ── Service catalog ──

/// Inserts the default catalog once; later startups leave it untouched.
pub fn seed_services(conn: &Connection) -> anyhow::Result<usize> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))?;
    if existing > 0 {
        tracing::debug!("service catalog already initialized");
        return Ok(0);
    }

    let defaults = Service::defaults();
    for service in &defaults {
        conn.execute(
            "INSERT INTO services (kind, price, description) VALUES (?1, ?2, ?3)",
            params![service.kind.as_str(), service.price, service.description],
        )?;
    }
    tracing::info!(count = defaults.len(), "service catalog initialized");
    Ok(defaults.len())
}

pub fn get_service(conn: &Connection, kind: ServiceKind) -> anyhow::Result<Option<Service>> {
    conn.query_row(
        "SELECT kind, price, description FROM services WHERE kind = ?1",
        params![kind.as_str()],
        |row| Ok(parse_service_row(row)),
    )
    .optional()?
    .transpose()
}

pub fn list_services(conn: &Connection) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare("SELECT kind, price, description FROM services")?;
    let rows = stmt.query_map([], |row| Ok(parse_service_row(row)))?;

    let mut services = vec![];
    for row in rows {
        services.push(row??);
    }
    // Menu order, not table order
    services.sort_by_key(|s| ServiceKind::ALL.iter().position(|k| *k == s.kind));
    Ok(services)
}

fn parse_service_row(row: &rusqlite::Row) -> anyhow::Result<Service> {
    let kind_str: String = row.get(0)?;
    Ok(Service {
        kind: ServiceKind::parse(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("unknown service kind: {kind_str}"))?,
        price: row.get(1)?,
        description: row.get(2)?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, requester_id, provider_id, service_kind, status, latitude, longitude, price, \
     payment_ref, payment_link, otp, requester_arrived, provider_arrived, provider_share, platform_fee, \
     created_at, updated_at, completed_at";

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, requester_id, provider_id, service_kind, status, latitude, longitude, price, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            booking.id,
            booking.requester_id,
            booking.provider_id,
            booking.service_kind.as_str(),
            booking.status.as_str(),
            booking.location.latitude,
            booking.location.longitude,
            booking.price,
            booking.created_at.format(TS_FORMAT).to_string(),
            booking.updated_at.format(TS_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| Ok(parse_booking_row(row)))
        .optional()?
        .transpose()
}

pub fn get_active_booking_for_requester(
    conn: &Connection,
    requester_id: &str,
) -> anyhow::Result<Option<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE requester_id = ?1 AND status NOT IN ('completed', 'cancelled')
         ORDER BY created_at DESC LIMIT 1"
    );
    conn.query_row(&sql, params![requester_id], |row| Ok(parse_booking_row(row)))
        .optional()?
        .transpose()
}

pub fn get_active_booking_for_provider(
    conn: &Connection,
    provider_id: &str,
) -> anyhow::Result<Option<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE provider_id = ?1 AND status NOT IN ('completed', 'cancelled')
         ORDER BY created_at DESC LIMIT 1"
    );
    conn.query_row(&sql, params![provider_id], |row| Ok(parse_booking_row(row)))
        .optional()?
        .transpose()
}

/// Compare-and-swap on status. Returns false when the booking is no longer
/// in `from`.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
) -> anyhow::Result<bool> {
    anyhow::ensure!(
        from.can_transition_to(to),
        "illegal booking transition {} -> {}",
        from.as_str(),
        to.as_str()
    );
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), now_str(), id, from.as_str()],
    )?;
    Ok(count > 0)
}

/// `pending -> accepted` for a provider holding an open offer. The provider
/// leaves the pool and their other open offers close in the same transaction.
pub fn assign_provider(conn: &Connection, booking_id: &str, provider_id: &str) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let now = now_str();

    let count = tx.execute(
        "UPDATE bookings SET provider_id = ?1, status = 'accepted', updated_at = ?2
         WHERE id = ?3 AND status = 'pending' AND provider_id IS NULL
           AND EXISTS (SELECT 1 FROM booking_offers
                       WHERE booking_id = ?3 AND provider_id = ?1 AND response = 'offered')
           AND EXISTS (SELECT 1 FROM actors
                       WHERE id = ?1 AND role = 'provider' AND is_available = 1)",
        params![provider_id, now, booking_id],
    )?;
    if count == 0 {
        return Ok(false);
    }

    tx.execute(
        "UPDATE actors SET is_available = 0 WHERE id = ?1",
        params![provider_id],
    )?;
    tx.execute(
        "UPDATE booking_offers SET response = 'accepted', responded_at = ?1
         WHERE booking_id = ?2 AND provider_id = ?3",
        params![now, booking_id, provider_id],
    )?;
    // A busy provider cannot take the other jobs still offered to them.
    tx.execute(
        "UPDATE booking_offers SET response = 'taken', responded_at = ?1
         WHERE provider_id = ?2 AND booking_id <> ?3 AND response = 'offered'",
        params![now, provider_id, booking_id],
    )?;
    tx.commit()?;
    Ok(true)
}

/// `accepted -> payment_pending`, storing the payment reference and link.
pub fn set_payment_pending(
    conn: &Connection,
    id: &str,
    payment_ref: &str,
    payment_link: &str,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'payment_pending', payment_ref = ?1, payment_link = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'accepted'",
        params![payment_ref, payment_link, now_str(), id],
    )?;
    Ok(count > 0)
}

/// `payment_pending -> in_progress`. A gateway payment id, when present,
/// replaces the link reference.
pub fn mark_paid(conn: &Connection, id: &str, payment_id: Option<&str>) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'in_progress', payment_ref = COALESCE(?1, payment_ref), updated_at = ?2
         WHERE id = ?3 AND status = 'payment_pending'",
        params![payment_id, now_str(), id],
    )?;
    Ok(count > 0)
}

/// Cancels a booking that is still cancellable. Releases the assigned
/// provider and closes outstanding offers in the same transaction.
/// Returns the status the booking was cancelled from.
pub fn cancel_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<BookingStatus>> {
    let tx = conn.unchecked_transaction()?;

    let current: Option<(String, Option<String>)> = tx
        .query_row(
            "SELECT status, provider_id FROM bookings WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((status_str, provider_id)) = current else {
        return Ok(None);
    };
    let Some(status) = BookingStatus::parse(&status_str) else {
        anyhow::bail!("unknown booking status: {status_str}");
    };
    if !status.is_cancellable() {
        return Ok(None);
    }

    let now = now_str();
    let count = tx.execute(
        "UPDATE bookings SET status = 'cancelled', updated_at = ?1 WHERE id = ?2 AND status = ?3",
        params![now, id, status.as_str()],
    )?;
    if count == 0 {
        return Ok(None);
    }

    if let Some(provider_id) = provider_id {
        tx.execute(
            "UPDATE actors SET is_available = 1 WHERE id = ?1",
            params![provider_id],
        )?;
    }
    tx.execute(
        "UPDATE booking_offers SET response = 'taken', responded_at = ?1
         WHERE booking_id = ?2 AND response = 'offered'",
        params![now, id],
    )?;
    tx.commit()?;
    Ok(Some(status))
}

/// Sets one arrival flag on an in-progress booking. Returns false when the
/// flag was already set (or the booking is not in progress).
pub fn set_arrival_flag(conn: &Connection, id: &str, role: Role) -> anyhow::Result<bool> {
    let sql = match role {
        Role::Provider => {
            "UPDATE bookings SET provider_arrived = 1, updated_at = ?1
             WHERE id = ?2 AND status = 'in_progress' AND provider_arrived = 0"
        }
        Role::Requester => {
            "UPDATE bookings SET requester_arrived = 1, updated_at = ?1
             WHERE id = ?2 AND status = 'in_progress' AND requester_arrived = 0"
        }
    };
    let count = conn.execute(sql, params![now_str(), id])?;
    Ok(count > 0)
}

/// Stores the one-time code only if both parties have arrived and no code
/// exists yet.
pub fn set_otp_if_absent(conn: &Connection, id: &str, otp: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET otp = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'in_progress' AND otp IS NULL
           AND requester_arrived = 1 AND provider_arrived = 1",
        params![otp, now_str(), id],
    )?;
    Ok(count > 0)
}

/// `in_progress -> completed` when `otp` matches. Persists the fee split and
/// returns the provider to the pool in the same transaction.
pub fn complete_booking(
    conn: &Connection,
    id: &str,
    otp: &str,
    split: &FeeSplit,
) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let now = now_str();

    let count = tx.execute(
        "UPDATE bookings SET status = 'completed', completed_at = ?1, updated_at = ?1,
                provider_share = ?2, platform_fee = ?3
         WHERE id = ?4 AND status = 'in_progress' AND otp IS NOT NULL AND otp = ?5",
        params![now, split.provider_share, split.platform_fee, id, otp],
    )?;
    if count == 0 {
        return Ok(false);
    }

    tx.execute(
        "UPDATE actors SET is_available = 1
         WHERE id = (SELECT provider_id FROM bookings WHERE id = ?1)",
        params![id],
    )?;
    tx.commit()?;
    Ok(true)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let service_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let created_at_str: String = row.get(15)?;
    let updated_at_str: String = row.get(16)?;
    let completed_at_str: Option<String> = row.get(17)?;

    Ok(Booking {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        provider_id: row.get(2)?,
        service_kind: ServiceKind::parse(&service_str)
            .ok_or_else(|| anyhow::anyhow!("unknown service kind: {service_str}"))?,
        status: BookingStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status_str}"))?,
        location: GeoPoint::new(row.get(5)?, row.get(6)?),
        price: row.get(7)?,
        payment_ref: row.get(8)?,
        payment_link: row.get(9)?,
        otp: row.get(10)?,
        requester_arrived: row.get::<_, i32>(11)? != 0,
        provider_arrived: row.get::<_, i32>(12)? != 0,
        provider_share: row.get(13)?,
        platform_fee: row.get(14)?,
        created_at: parse_ts(&created_at_str),
        updated_at: parse_ts(&updated_at_str),
        completed_at: completed_at_str.as_deref().map(parse_ts),
    })
}

// ── Offers ──

pub fn insert_offers(conn: &Connection, booking_id: &str, provider_ids: &[String]) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    let now = now_str();
    for provider_id in provider_ids {
        tx.execute(
            "INSERT OR IGNORE INTO booking_offers (booking_id, provider_id, response, created_at)
             VALUES (?1, ?2, 'offered', ?3)",
            params![booking_id, provider_id, now],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
pub fn get_offer(conn: &Connection, booking_id: &str, provider_id: &str) -> anyhow::Result<Option<Offer>> {
    conn.query_row(
        "SELECT booking_id, provider_id, response, created_at, responded_at
         FROM booking_offers WHERE booking_id = ?1 AND provider_id = ?2",
        params![booking_id, provider_id],
        |row| Ok(parse_offer_row(row)),
    )
    .optional()?
    .transpose()
}

/// The provider's most recent offer regardless of how it was answered.
pub fn get_latest_offer_for_provider(conn: &Connection, provider_id: &str) -> anyhow::Result<Option<Offer>> {
    conn.query_row(
        "SELECT booking_id, provider_id, response, created_at, responded_at
         FROM booking_offers WHERE provider_id = ?1
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
        params![provider_id],
        |row| Ok(parse_offer_row(row)),
    )
    .optional()?
    .transpose()
}

/// Offers the provider can still accept: unanswered, on a booking that is
/// still `pending`. Newest first.
pub fn get_open_offers_for_provider(conn: &Connection, provider_id: &str) -> anyhow::Result<Vec<Offer>> {
    let mut stmt = conn.prepare(
        "SELECT o.booking_id, o.provider_id, o.response, o.created_at, o.responded_at
         FROM booking_offers o JOIN bookings b ON b.id = o.booking_id
         WHERE o.provider_id = ?1 AND o.response = 'offered' AND b.status = 'pending'
         ORDER BY o.created_at DESC, o.rowid DESC",
    )?;
    let rows = stmt.query_map(params![provider_id], |row| Ok(parse_offer_row(row)))?;

    let mut offers = vec![];
    for row in rows {
        offers.push(row??);
    }
    Ok(offers)
}

pub fn list_offers(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<Offer>> {
    let mut stmt = conn.prepare(
        "SELECT booking_id, provider_id, response, created_at, responded_at
         FROM booking_offers WHERE booking_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_offer_row(row)))?;

    let mut offers = vec![];
    for row in rows {
        offers.push(row??);
    }
    Ok(offers)
}

/// Moves an open offer to `response`. Returns false if it was already answered.
pub fn respond_to_offer(
    conn: &Connection,
    booking_id: &str,
    provider_id: &str,
    response: OfferResponse,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_offers SET response = ?1, responded_at = ?2
         WHERE booking_id = ?3 AND provider_id = ?4 AND response = 'offered'",
        params![response.as_str(), now_str(), booking_id, provider_id],
    )?;
    Ok(count > 0)
}

/// Closes every still-open offer on the booking and returns the affected
/// provider ids.
pub fn close_open_offers(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<String>> {
    let tx = conn.unchecked_transaction()?;
    let provider_ids = {
        let mut stmt = tx.prepare(
            "SELECT provider_id FROM booking_offers
             WHERE booking_id = ?1 AND response = 'offered' ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![booking_id], |row| row.get::<_, String>(0))?;
        let mut ids = vec![];
        for row in rows {
            ids.push(row?);
        }
        ids
    };
    tx.execute(
        "UPDATE booking_offers SET response = 'taken', responded_at = ?1
         WHERE booking_id = ?2 AND response = 'offered'",
        params![now_str(), booking_id],
    )?;
    tx.commit()?;
    Ok(provider_ids)
}

fn parse_offer_row(row: &rusqlite::Row) -> anyhow::Result<Offer> {
    let response_str: String = row.get(2)?;
    let created_at_str: String = row.get(3)?;
    let responded_at_str: Option<String> = row.get(4)?;
    Ok(Offer {
        booking_id: row.get(0)?,
        provider_id: row.get(1)?,
        response: OfferResponse::parse(&response_str),
        created_at: parse_ts(&created_at_str),
        responded_at: responded_at_str.as_deref().map(parse_ts),
    })
}
