use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Latitude/longitude deltas (degrees) enclosing a circle of `radius_m`.
    pub fn bounding_deltas(&self, radius_m: f64) -> (f64, f64) {
        let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let cos_lat = self.latitude.to_radians().cos().abs().max(1e-6);
        let d_lon = (radius_m / (EARTH_RADIUS_M * cos_lat)).to_degrees().min(180.0);
        (d_lat, d_lon)
    }

    pub fn maps_url(&self) -> String {
        format!(
            "https://www.google.com/maps?q={},{}",
            self.latitude, self.longitude
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Provider => "provider",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requester" => Some(Role::Requester),
            "provider" => Some(Role::Provider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub phone: String,
    pub name: String,
    pub role: Role,
    pub location: Option<GeoPoint>,
    /// Providers only.
    pub is_available: Option<bool>,
    /// Providers only (UPI id).
    pub payout_id: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Actor {
    pub fn new_requester(phone: &str, name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            name: name.to_string(),
            role: Role::Requester,
            location: None,
            is_available: None,
            payout_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn new_provider(phone: &str, name: &str, location: GeoPoint, payout_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            name: name.to_string(),
            role: Role::Provider,
            location: Some(location),
            is_available: Some(true),
            payout_id: Some(payout_id.to_string()),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Result of resolving a sender identity against the directory.
#[derive(Debug, Clone)]
pub enum ActorLookup {
    Requester(Actor),
    Provider(Actor),
    Unknown,
}

impl ActorLookup {
    pub fn actor(&self) -> Option<&Actor> {
        match self {
            ActorLookup::Requester(a) | ActorLookup::Provider(a) => Some(a),
            ActorLookup::Unknown => None,
        }
    }
}

impl From<Option<Actor>> for ActorLookup {
    fn from(actor: Option<Actor>) -> Self {
        match actor {
            Some(a) if a.role == Role::Provider => ActorLookup::Provider(a),
            Some(a) => ActorLookup::Requester(a),
            None => ActorLookup::Unknown,
        }
    }
}
