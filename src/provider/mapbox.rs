//! Mapbox adapter (cost-conscious variant).
//!
//! Geocodes through Mapbox but deliberately avoids the paid optimization
//! endpoint: each window bucket is reordered with a nearest-neighbor pass
//! over an injected travel matrix (haversine by default). The result is a
//! generic coordinate-viewer URL, so the link itself carries no API key.

use tracing::debug;

use crate::error::RouteError;
use crate::geocode::{Coordinate, Geocoder};
use crate::matrix::{nearest_neighbor_order, TravelMatrix};
use crate::provider::{geocode_or_warn, RouteContext, RouteProvider};
use crate::stop::{deduplicate_stops, group_by_window, Stop};

/// Public OSRM demo frontend; renders a pin per `loc` parameter.
const VIEWER_BASE_URL: &str = "https://map.project-osrm.org/";

pub struct MapboxProvider<G, M> {
    ctx: RouteContext,
    stops: Vec<Stop>,
    geocoder: G,
    matrix: M,
}

impl<G: Geocoder, M: TravelMatrix> MapboxProvider<G, M> {
    pub fn new(ctx: RouteContext, geocoder: G, matrix: M) -> Self {
        Self {
            ctx,
            stops: Vec::new(),
            geocoder,
            matrix,
        }
    }
}

impl<G: Geocoder, M: TravelMatrix> RouteProvider for MapboxProvider<G, M> {
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

        // Geocode and order each window bucket, never crossing buckets.
        let mut ordered: Vec<(String, Coordinate)> = Vec::new();
        for group in group_by_window(self.stops.clone()) {
            let resolved: Vec<(String, Coordinate)> = group
                .iter()
                .filter_map(|s| {
                    geocode_or_warn(&self.geocoder, &s.address)
                        .map(|coord| (s.address.clone(), coord))
                })
                .collect();
            if resolved.is_empty() {
                continue;
            }

            let start = ordered
                .last()
                .map(|(_, coord)| *coord)
                .or(origin_coord)
                .unwrap_or(resolved[0].1);
            let points: Vec<Coordinate> = resolved.iter().map(|(_, c)| *c).collect();

            for idx in nearest_neighbor_order(&self.matrix, start, &points) {
                ordered.push(resolved[idx].clone());
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
        sequence.extend(ordered.iter().map(|(_, coord)| *coord));

        // Destination: override wins, then round trip to origin; otherwise
        // the route simply ends at the last stop.
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

        // Viewer URLs want latitude first; geocoders hand back lon-first.
        let locs: Vec<String> = sequence
            .iter()
            .map(|coord| format!("loc={}", coord.lat_lon()))
            .collect();
        let url = format!("{VIEWER_BASE_URL}?{}", locs.join("&"));

        debug!(%url, "generated coordinate viewer url");
        Ok(url)
    }
}
