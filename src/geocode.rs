//! Address geocoding seam and concrete geocoder clients.
//!
//! Coordinates carry named `lat`/`lon` fields on purpose: geocoding APIs
//! return longitude first while shareable viewer URLs want latitude first,
//! and a bare tuple makes that flip easy to get wrong.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::Cache;
use crate::error::ProviderError;
use crate::retry::{with_backoff, Backoff};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// `lon,lat` — the order routing APIs (OSRM, Mapbox) consume.
    pub fn lon_lat(&self) -> String {
        format!("{:.6},{:.6}", self.lon, self.lat)
    }

    /// `lat,lon` — the order shareable viewer URLs display.
    pub fn lat_lon(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Resolves a free-text address into coordinates.
pub trait Geocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError>;
}

// ---------------------------------------------------------------------------
// Mapbox forward geocoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MapboxGeocoder {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl MapboxGeocoder {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.mapbox.com/search/geocode/v6/forward";

    pub fn new(token: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_base_url(token, Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(6))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MapboxGeocodeResponse {
    features: Option<Vec<MapboxFeature>>,
}

#[derive(Debug, Deserialize)]
struct MapboxFeature {
    geometry: MapboxGeometry,
}

#[derive(Debug, Deserialize)]
struct MapboxGeometry {
    coordinates: Vec<f64>,
}

impl Geocoder for MapboxGeocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", address), ("access_token", &self.token)])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: MapboxGeocodeResponse = response
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let feature = body
            .features
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NoResult(format!("no geocode result for '{address}'")))?;

        // Wire order is lon, lat.
        match feature.geometry.coordinates[..] {
            [lon, lat, ..] => Ok(Coordinate::new(lat, lon)),
            _ => Err(ProviderError::Decode(format!(
                "geocode result for '{address}' has no coordinates"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Nominatim (OpenStreetMap) geocoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl NominatimGeocoder {
    pub const DEFAULT_BASE_URL: &'static str = "https://nominatim.openstreetmap.org/search";

    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_base_url(Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        // Nominatim's usage policy requires an identifying user agent.
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("fieldroute/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(6))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let results: Vec<NominatimResult> = response
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let first = results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NoResult(format!("no geocode result for '{address}'")))?;

        let lat = first
            .lat
            .parse::<f64>()
            .map_err(|e| ProviderError::Decode(format!("bad latitude: {e}")))?;
        let lon = first
            .lon
            .parse::<f64>()
            .map_err(|e| ProviderError::Decode(format!("bad longitude: {e}")))?;

        Ok(Coordinate::new(lat, lon))
    }
}

// ---------------------------------------------------------------------------
// Caching + retry wrapper
// ---------------------------------------------------------------------------

/// Wraps any geocoder with a TTL cache and bounded retry. Addresses rarely
/// move, so the cache TTL is long (24h by default via the provider factory).
#[derive(Debug, Clone)]
pub struct CachedGeocoder<G> {
    inner: G,
    cache: Cache,
    backoff: Backoff,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G, cache: Cache) -> Self {
        Self {
            inner,
            cache,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff_policy(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
        let key = address.trim().to_lowercase();
        if let Some(hit) = self.cache.get::<Coordinate>(&key) {
            debug!(address, "geocode cache hit");
            return Ok(hit);
        }

        let coord = with_backoff(&self.backoff, || self.inner.geocode(address))?;
        self.cache.set(&key, &coord);
        Ok(coord)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use super::*;

    struct CountingGeocoder {
        calls: RefCell<usize>,
    }

    impl Geocoder for CountingGeocoder {
        fn geocode(&self, _address: &str) -> Result<Coordinate, ProviderError> {
            *self.calls.borrow_mut() += 1;
            Ok(Coordinate::new(44.1, -70.5))
        }
    }

    #[test]
    fn coordinate_orders_are_distinct() {
        let coord = Coordinate::new(44.5, -70.25);
        assert_eq!(coord.lat_lon(), "44.500000,-70.250000");
        assert_eq!(coord.lon_lat(), "-70.250000,44.500000");
    }

    #[test]
    fn cached_geocoder_calls_through_once() {
        let cache = Cache::new("geocode-test", Duration::from_secs(60));
        let geocoder = CachedGeocoder::new(
            CountingGeocoder {
                calls: RefCell::new(0),
            },
            cache,
        );

        let first = geocoder.geocode("1 Main St, Norway, ME").unwrap();
        let second = geocoder.geocode(" 1 MAIN ST, Norway, ME ").unwrap();

        assert_eq!(first, second);
        assert_eq!(*geocoder.inner.calls.borrow(), 1);
    }
}
