//! OpenStreetMap adapter (no-optimization fallback variant).
//!
//! Geocodes through Nominatim and asks the public OSRM trip service to
//! reorder each window bucket. When the trip service is unreachable the
//! bucket keeps its window-sorted order unchanged, so this adapter always
//! yields a usable URL as long as geocoding succeeds for two points.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::{canonical_key, Cache};
use crate::error::{ProviderError, RouteError};
use crate::geocode::{Coordinate, Geocoder};
use crate::provider::{geocode_or_warn, RouteContext, RouteProvider};
use crate::stop::{deduplicate_stops, group_by_window, Stop};

const DIRECTIONS_BASE_URL: &str = "https://www.openstreetmap.org/directions";

/// Trip-optimization seam: returns the visiting order of `points` (indices
/// into the slice) for a tour beginning at `start`.
pub trait TripOptimizer {
    fn order_from(
        &self,
        start: Coordinate,
        points: &[Coordinate],
    ) -> Result<Vec<usize>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Public OSRM trip service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OsrmTripConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmTripConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            profile: "driving".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmTripClient {
    config: OsrmTripConfig,
    client: reqwest::blocking::Client,
}

impl OsrmTripClient {
    pub fn new(config: OsrmTripConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTripResponse {
    waypoints: Option<Vec<OsrmTripWaypoint>>,
}

#[derive(Debug, Deserialize)]
struct OsrmTripWaypoint {
    waypoint_index: usize,
}

impl TripOptimizer for OsrmTripClient {
    fn order_from(
        &self,
        start: Coordinate,
        points: &[Coordinate],
    ) -> Result<Vec<usize>, ProviderError> {
        let mut coords = Vec::with_capacity(points.len() + 1);
        coords.push(start.lon_lat());
        coords.extend(points.iter().map(Coordinate::lon_lat));

        let url = format!(
            "{}/trip/v1/{}/{}?source=first&roundtrip=false",
            self.config.base_url,
            self.config.profile,
            coords.join(";")
        );

        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: OsrmTripResponse = response
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let waypoints = body
            .waypoints
            .ok_or_else(|| ProviderError::NoResult("trip response had no waypoints".to_string()))?;
        if waypoints.len() != points.len() + 1 {
            return Err(ProviderError::Decode(
                "trip waypoints do not match submitted points".to_string(),
            ));
        }

        // waypoints[i].waypoint_index is the trip position of input i;
        // input 0 is the start anchor. Recover the visiting order of the
        // submitted points by sorting on trip position.
        let mut positions: Vec<(usize, usize)> = waypoints
            .iter()
            .enumerate()
            .skip(1)
            .map(|(input, wp)| (wp.waypoint_index, input - 1))
            .collect();
        positions.sort_by_key(|(pos, _)| *pos);

        Ok(positions.into_iter().map(|(_, idx)| idx).collect())
    }
}

// ---------------------------------------------------------------------------
// Provider adapter
// ---------------------------------------------------------------------------

pub struct OsmProvider<G, T> {
    ctx: RouteContext,
    stops: Vec<Stop>,
    geocoder: G,
    trip: T,
    cache: Cache,
}

impl<G: Geocoder, T: TripOptimizer> OsmProvider<G, T> {
    pub fn new(ctx: RouteContext, geocoder: G, trip: T, cache: Cache) -> Self {
        Self {
            ctx,
            stops: Vec::new(),
            geocoder,
            trip,
            cache,
        }
    }

    /// Visiting order for one bucket, cached per coordinate set. Any trip
    /// failure keeps the window-sorted input order.
    fn ordered_or_raw(&self, start: Coordinate, points: &[Coordinate]) -> Vec<usize> {
        if points.len() < 2 {
            return (0..points.len()).collect();
        }

        let mut key_parts = vec![start.lon_lat()];
        key_parts.extend(points.iter().map(Coordinate::lon_lat));
        let key = format!("trip:{}", canonical_key(&key_parts));

        if let Some(hit) = self.cache.get::<Vec<usize>>(&key) {
            debug!(points = points.len(), "using cached trip order");
            return hit;
        }

        match self.trip.order_from(start, points) {
            Ok(order) if order.len() == points.len() => {
                self.cache.set(&key, &order);
                order
            }
            Ok(_) => {
                warn!("trip order length mismatch, keeping window-sorted order");
                (0..points.len()).collect()
            }
            Err(err) => {
                warn!(%err, "trip optimization unavailable, keeping window-sorted order");
                (0..points.len()).collect()
            }
        }
    }
}

impl<G: Geocoder, T: TripOptimizer> RouteProvider for OsmProvider<G, T> {
    fn add_stop(&mut self, stop: Stop) {
        self.stops.push(stop);
    }

    fn add_stops(&mut self, stops: Vec<Stop>) {
        self.stops.extend(stops);
    }

    fn build_route_url(&mut self) -> Result<String, RouteError> {
        self.stops = deduplicate_stops(std::mem::take(&mut self.stops));
        if self.stops.is_empty() {
            return Err(RouteError::NoStops);
        }

        let origin_coord = geocode_or_warn(&self.geocoder, &self.ctx.origin);

        let mut ordered: Vec<Coordinate> = Vec::new();
        for group in group_by_window(self.stops.clone()) {
            let points: Vec<Coordinate> = group
                .iter()
                .filter_map(|s| geocode_or_warn(&self.geocoder, &s.address))
                .collect();
            if points.is_empty() {
                continue;
            }

            let start = ordered.last().copied().or(origin_coord).unwrap_or(points[0]);
            for idx in self.ordered_or_raw(start, &points) {
                ordered.push(points[idx]);
            }
        }

        if ordered.is_empty() {
            return Err(RouteError::Build(
                "none of the stops could be geocoded".to_string(),
            ));
        }

        let mut sequence: Vec<Coordinate> = Vec::with_capacity(ordered.len() + 2);
        if let Some(coord) = origin_coord {
            sequence.push(coord);
        }
        sequence.extend(ordered);

        if let Some(dest) = &self.ctx.destination_override {
            if let Some(coord) = geocode_or_warn(&self.geocoder, dest) {
                sequence.push(coord);
            }
        } else if self.ctx.end_at_origin {
            if let Some(coord) = origin_coord {
                sequence.push(coord);
            }
        }

        if sequence.len() < 2 {
            return Err(RouteError::Build(
                "need at least two geocoded waypoints to build a route".to_string(),
            ));
        }

        let route = sequence
            .iter()
            .map(Coordinate::lat_lon)
            .collect::<Vec<_>>()
            .join(";");
        let url = format!("{DIRECTIONS_BASE_URL}?engine=fossgis_osrm_car&route={route}");

        debug!(%url, "generated osm directions url");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::stop::ServiceWindow;

    struct TableGeocoder {
        table: HashMap<String, Coordinate>,
    }

    impl TableGeocoder {
        fn new(entries: &[(&str, f64, f64)]) -> Self {
            let table = entries
                .iter()
                .map(|(addr, lat, lon)| (addr.to_string(), Coordinate::new(*lat, *lon)))
                .collect();
            Self { table }
        }
    }

    impl Geocoder for TableGeocoder {
        fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
            self.table
                .get(address)
                .copied()
                .ok_or_else(|| ProviderError::NoResult(address.to_string()))
        }
    }

    /// Reverses the submitted order and counts calls.
    struct ReversingTrip {
        calls: RefCell<usize>,
    }

    impl TripOptimizer for ReversingTrip {
        fn order_from(
            &self,
            _start: Coordinate,
            points: &[Coordinate],
        ) -> Result<Vec<usize>, ProviderError> {
            *self.calls.borrow_mut() += 1;
            Ok((0..points.len()).rev().collect())
        }
    }

    struct DownTrip;

    impl TripOptimizer for DownTrip {
        fn order_from(
            &self,
            _start: Coordinate,
            _points: &[Coordinate],
        ) -> Result<Vec<usize>, ProviderError> {
            Err(ProviderError::Status(503))
        }
    }

    fn cache() -> Cache {
        Cache::new("trips-test", Duration::from_secs(60))
    }

    #[test]
    fn renders_directions_url_with_lat_lon_pairs() {
        let geocoder = TableGeocoder::new(&[("Base", 44.0, -70.0), ("Stop A", 44.1, -70.1)]);
        let mut p = OsmProvider::new(RouteContext::new("Base"), geocoder, DownTrip, cache());
        p.add_stop(Stop::new("Stop A", ServiceWindow::Morning));

        let url = p.build_route_url().unwrap();
        assert_eq!(
            url,
            "https://www.openstreetmap.org/directions?engine=fossgis_osrm_car&route=44.000000,-70.000000;44.100000,-70.100000;44.000000,-70.000000"
        );
    }

    #[test]
    fn trip_failure_keeps_window_sorted_order() {
        let geocoder = TableGeocoder::new(&[
            ("Base", 44.0, -70.0),
            ("First", 44.1, -70.1),
            ("Second", 44.2, -70.2),
        ]);
        let mut p = OsmProvider::new(RouteContext::new("Base"), geocoder, DownTrip, cache());
        p.add_stop(Stop::new("First", ServiceWindow::Morning));
        p.add_stop(Stop::new("Second", ServiceWindow::Morning));

        let url = p.build_route_url().unwrap();
        let first = url.find("44.100000").unwrap();
        let second = url.find("44.200000").unwrap();
        assert!(first < second);
    }

    #[test]
    fn trip_order_is_applied_within_a_bucket() {
        let geocoder = TableGeocoder::new(&[
            ("Base", 44.0, -70.0),
            ("First", 44.1, -70.1),
            ("Second", 44.2, -70.2),
        ]);
        let trip = ReversingTrip {
            calls: RefCell::new(0),
        };
        let mut p = OsmProvider::new(RouteContext::new("Base"), geocoder, trip, cache());
        p.add_stop(Stop::new("First", ServiceWindow::Morning));
        p.add_stop(Stop::new("Second", ServiceWindow::Morning));

        let url = p.build_route_url().unwrap();
        let first = url.find("44.100000").unwrap();
        let second = url.find("44.200000").unwrap();
        assert!(second < first, "trip order should reverse the bucket");
    }

    #[test]
    fn repeated_builds_use_the_trip_cache() {
        let geocoder = TableGeocoder::new(&[
            ("Base", 44.0, -70.0),
            ("First", 44.1, -70.1),
            ("Second", 44.2, -70.2),
        ]);
        let trip = ReversingTrip {
            calls: RefCell::new(0),
        };
        let mut p = OsmProvider::new(RouteContext::new("Base"), geocoder, trip, cache());
        p.add_stop(Stop::new("First", ServiceWindow::Morning));
        p.add_stop(Stop::new("Second", ServiceWindow::Morning));

        let first = p.build_route_url().unwrap();
        let second = p.build_route_url().unwrap();

        assert_eq!(first, second);
        assert_eq!(*p.trip.calls.borrow(), 1);
    }

    #[test]
    fn buckets_never_interleave_even_when_trip_reverses() {
        let geocoder = TableGeocoder::new(&[
            ("Base", 44.0, -70.0),
            ("AM", 44.1, -70.1),
            ("PM", 44.2, -70.2),
        ]);
        let trip = ReversingTrip {
            calls: RefCell::new(0),
        };
        let mut p = OsmProvider::new(RouteContext::new("Base"), geocoder, trip, cache());
        p.add_stop(Stop::new("PM", ServiceWindow::Afternoon));
        p.add_stop(Stop::new("AM", ServiceWindow::Morning));

        let url = p.build_route_url().unwrap();
        let am = url.find("44.100000").unwrap();
        let pm = url.find("44.200000").unwrap();
        assert!(am < pm);
    }

    #[test]
    fn only_unresolvable_stops_is_an_error() {
        let geocoder = TableGeocoder::new(&[("Base", 44.0, -70.0)]);
        let mut p = OsmProvider::new(RouteContext::new("Base"), geocoder, DownTrip, cache());
        p.add_stop(Stop::new("Nowhere", ServiceWindow::Morning));

        assert!(matches!(p.build_route_url(), Err(RouteError::Build(_))));
    }
}
