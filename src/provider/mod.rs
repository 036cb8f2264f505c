//! Provider adapters: one mapping backend each, one shared contract.
//!
//! An adapter owns an origin, an optional destination override, and a
//! mutable stop list. `build_route_url` deduplicates, enforces the window
//! macro-order, resolves the destination, and renders a provider-specific
//! shareable URL. Backends are injected behind traits so tests substitute
//! fakes without touching the network.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::RouteError;
use crate::geocode::{Coordinate, Geocoder};
use crate::stop::Stop;

pub mod google;
pub mod mapbox;
pub mod osm;

pub use google::GoogleMapsProvider;
pub use mapbox::MapboxProvider;
pub use osm::OsmProvider;

/// Closed set of supported mapping backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Google,
    Mapbox,
    Osm,
}

impl ProviderKind {
    pub fn all() -> [ProviderKind; 3] {
        [ProviderKind::Google, ProviderKind::Mapbox, ProviderKind::Osm]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Google => "google",
            ProviderKind::Mapbox => "mapbox",
            ProviderKind::Osm => "osm",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ProviderKind {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "mapbox" => Ok(ProviderKind::Mapbox),
            "osm" => Ok(ProviderKind::Osm),
            other => Err(RouteError::UnknownProvider(other.to_string())),
        }
    }
}

/// Origin/destination policy shared by every adapter.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub origin: String,
    pub destination_override: Option<String>,
    /// Return to the origin at the end of the route. Ignored whenever a
    /// destination override is set.
    pub end_at_origin: bool,
}

impl RouteContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            destination_override: None,
            end_at_origin: true,
        }
    }

    pub fn with_destination(mut self, destination: Option<String>) -> Self {
        self.destination_override = destination;
        self
    }

    pub fn with_end_at_origin(mut self, end_at_origin: bool) -> Self {
        self.end_at_origin = end_at_origin;
        self
    }

    /// Destination precedence: explicit override, then the origin when a
    /// round trip is requested, then the last stop of the final sequence.
    pub fn resolve_destination(&self, last_stop: &str) -> String {
        if let Some(dest) = &self.destination_override {
            return dest.clone();
        }
        if self.end_at_origin {
            return self.origin.clone();
        }
        last_stop.to_string()
    }
}

/// Common adapter contract. Object-safe so the orchestrator can dispatch on
/// a [`ProviderKind`] chosen at runtime.
pub trait RouteProvider {
    fn add_stop(&mut self, stop: Stop);

    fn add_stops(&mut self, stops: Vec<Stop>);

    /// Produce the shareable route URL. Runs dedup first and replaces the
    /// internal stop list with the result, so repeated calls are idempotent
    /// given unchanged external state.
    fn build_route_url(&mut self) -> Result<String, RouteError>;
}

/// Resolve one address, logging and dropping it on failure. Adapters that
/// geocode apply this per stop so a single bad address never sinks the
/// route.
pub(crate) fn geocode_or_warn<G: Geocoder + ?Sized>(
    geocoder: &G,
    address: &str,
) -> Option<Coordinate> {
    match geocoder.geocode(address) {
        Ok(coord) => Some(coord),
        Err(err) => {
            warn!(address, %err, "skipping address that failed to geocode");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("Google".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert_eq!("MAPBOX".parse::<ProviderKind>().unwrap(), ProviderKind::Mapbox);
        assert_eq!(" osm ".parse::<ProviderKind>().unwrap(), ProviderKind::Osm);
    }

    #[test]
    fn unknown_provider_name_is_a_hard_error() {
        let err = "waze".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, RouteError::UnknownProvider(name) if name == "waze"));
    }

    #[test]
    fn destination_override_beats_end_at_origin() {
        let ctx = RouteContext::new("Base")
            .with_destination(Some("Depot".to_string()))
            .with_end_at_origin(true);
        assert_eq!(ctx.resolve_destination("Last Stop"), "Depot");
    }

    #[test]
    fn round_trip_returns_to_origin() {
        let ctx = RouteContext::new("Base");
        assert_eq!(ctx.resolve_destination("Last Stop"), "Base");
    }

    #[test]
    fn one_way_ends_at_last_stop() {
        let ctx = RouteContext::new("Base").with_end_at_origin(false);
        assert_eq!(ctx.resolve_destination("Last Stop"), "Last Stop");
    }

    struct FlakyGeocoder;

    impl Geocoder for FlakyGeocoder {
        fn geocode(&self, address: &str) -> Result<Coordinate, crate::error::ProviderError> {
            if address.contains("bad") {
                Err(crate::error::ProviderError::NoResult(address.to_string()))
            } else {
                Ok(Coordinate::new(44.0, -70.0))
            }
        }
    }

    #[test]
    fn geocode_or_warn_drops_failures_and_keeps_successes() {
        assert!(geocode_or_warn(&FlakyGeocoder, "1 Good St").is_some());
        assert!(geocode_or_warn(&FlakyGeocoder, "bad address").is_none());
    }
}
