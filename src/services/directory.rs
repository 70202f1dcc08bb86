use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Actor, ActorLookup, GeoPoint};

/// Providers are searched within this distance of the requester.
pub const DISPATCH_RADIUS_M: f64 = 5000.0;

/// Resolves a sender identity once per inbound event.
pub fn lookup(conn: &Connection, phone: &str) -> anyhow::Result<ActorLookup> {
    Ok(queries::get_actor_by_phone(conn, phone)?.into())
}

pub fn register_requester(conn: &Connection, phone: &str, name: &str) -> anyhow::Result<Actor> {
    let actor = Actor::new_requester(phone, name);
    queries::insert_actor(conn, &actor)?;
    tracing::info!(phone, actor_id = %actor.id, "requester registered");
    Ok(actor)
}

pub fn register_provider(
    conn: &Connection,
    phone: &str,
    name: &str,
    location: GeoPoint,
    payout_id: &str,
) -> anyhow::Result<Actor> {
    let actor = Actor::new_provider(phone, name, location, payout_id);
    queries::insert_actor(conn, &actor)?;
    tracing::info!(phone, actor_id = %actor.id, "provider registered");
    Ok(actor)
}

/// Available providers within [`DISPATCH_RADIUS_M`], nearest first.
pub fn nearby_available_providers(conn: &Connection, point: &GeoPoint) -> anyhow::Result<Vec<Actor>> {
    let found = queries::find_available_providers_near(conn, point, DISPATCH_RADIUS_M)?;
    Ok(found.into_iter().map(|(actor, _)| actor).collect())
}
