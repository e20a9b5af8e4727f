//! Node geolocation
//!
//! Coordinates come from, in order of preference:
//! 1. Environment overrides (FLEETMAP_AGENT_LAT / _LON / _LOCATION / _PROVIDER)
//!    for machines whose placement is known, e.g. home racks
//! 2. A reverse-IP lookup, good enough to place a cloud VM in the right
//!    datacenter region
//!
//! Lookups are a collaborator that may be down: resolution failure simply
//! yields no coordinates and the node renders without a map position.
//!
//! A small deterministic per-name offset separates markers for co-located
//! machines so they do not stack into a single dot on the map.

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub lat: f64,
    pub lon: f64,
    pub location: Option<String>,
    pub provider: Option<String>,
    pub external_ip: Option<String>,
}

/// Resolve this node's geolocation, applying the per-name jitter offset.
pub async fn resolve(node_name: &str, client: &reqwest::Client) -> Option<GeoInfo> {
    let mut geo = match from_env() {
        Some(geo) => geo,
        None => lookup_ip(client).await?,
    };
    let offset = name_jitter(node_name);
    geo.lat += offset;
    geo.lon += offset;
    Some(geo)
}

fn from_env() -> Option<GeoInfo> {
    let lat = env_f64("FLEETMAP_AGENT_LAT")?;
    let lon = env_f64("FLEETMAP_AGENT_LON")?;
    Some(GeoInfo {
        lat,
        lon,
        location: std::env::var("FLEETMAP_AGENT_LOCATION").ok(),
        provider: std::env::var("FLEETMAP_AGENT_PROVIDER").ok(),
        external_ip: None,
    })
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    country: Option<String>,
    isp: Option<String>,
    query: Option<String>,
}

/// Reverse-IP geolocation. Best effort: any failure returns None.
async fn lookup_ip(client: &reqwest::Client) -> Option<GeoInfo> {
    let response = client
        .get("http://ip-api.com/json/")
        .send()
        .await
        .ok()?;
    let body: IpApiResponse = response.json().await.ok()?;
    if body.status != "success" {
        debug!("reverse-IP lookup rejected: {}", body.status);
        return None;
    }
    let location = match (body.city, body.country) {
        (Some(city), Some(country)) => Some(format!("{city}, {country}")),
        (Some(city), None) => Some(city),
        (None, Some(country)) => Some(country),
        (None, None) => None,
    };
    Some(GeoInfo {
        lat: body.lat?,
        lon: body.lon?,
        location,
        provider: body.isp,
        external_ip: body.query,
    })
}

/// Deterministic per-name offset in degrees, roughly 0-100 meters. Only the
/// determinism and the small magnitude matter: its sole job is to keep
/// co-located markers visually apart.
pub fn name_jitter(name: &str) -> f64 {
    let mut h: u64 = 5381;
    for byte in name.bytes() {
        h = h.wrapping_mul(33) ^ u64::from(byte);
    }
    (h % 10) as f64 * 0.0001
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_jitter_is_deterministic_and_bounded() {
        assert_eq!(name_jitter("michael-pi"), name_jitter("michael-pi"));
        for name in ["michael-pi", "jim-pi", "toby-gcp1", ""] {
            let offset = name_jitter(name);
            assert!((0.0..0.001).contains(&offset), "{name}: {offset}");
        }
    }

    #[test]
    fn test_env_override_requires_both_coordinates() {
        std::env::remove_var("FLEETMAP_AGENT_LAT");
        std::env::remove_var("FLEETMAP_AGENT_LON");
        assert!(from_env().is_none());
    }
}
