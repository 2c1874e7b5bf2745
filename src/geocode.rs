//! Optional address-to-coordinate lookup.
//!
//! Geocoding is a best-effort collaborator: absence or failure degrades a
//! request to a null location and never blocks creation.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::GeocodeError;
use crate::geo::Coordinates;

/// Address-to-coordinate lookup.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text address. `Ok(None)` means the service answered
    /// but found nothing usable.
    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

/// One hit from a search-style geocoding endpoint. Services commonly return
/// lat/lon as strings, so both forms are accepted.
#[derive(Debug, Deserialize)]
struct GeocodeHit {
    lat: serde_json::Value,
    lon: serde_json::Value,
}

fn value_to_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Pick the first usable coordinate from a geocode response body.
fn parse_geocode_response(body: &str) -> Result<Option<Coordinates>, GeocodeError> {
    let hits: Vec<GeocodeHit> = serde_json::from_str(body)
        .map_err(|e| GeocodeError::InvalidResponse(format!("JSON parse error: {e}")))?;

    for hit in &hits {
        if let (Some(lat), Some(lon)) = (value_to_f64(&hit.lat), value_to_f64(&hit.lon)) {
            let coords = Coordinates::new(lat, lon);
            if coords.is_valid() {
                return Ok(Some(coords));
            }
        }
    }
    Ok(None)
}

/// HTTP geocoder against a search endpoint returning a JSON hit array.
pub struct HttpGeocoder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpGeocoder {
    pub fn new(endpoint: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let mut query: Vec<(&str, &str)> = vec![("q", address), ("format", "json"), ("limit", "1")];
        if let Some(key) = &self.api_key {
            query.push(("key", key.expose_secret()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| GeocodeError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeocodeError::RequestFailed(format!(
                "geocode endpoint returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GeocodeError::RequestFailed(e.to_string()))?;

        let resolved = parse_geocode_response(&body)?;
        debug!(address, resolved = ?resolved, "Geocode lookup");
        Ok(resolved)
    }
}
