//! Google Maps adapter: native waypoint optimization plus shareable
//! Directions URLs in path or query-string style.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::{canonical_key, Cache};
use crate::error::{ProviderError, RouteError};
use crate::provider::{RouteContext, RouteProvider};
use crate::retry::{with_backoff, Backoff};
use crate::stop::{deduplicate_stops, group_by_window, Stop};

/// Travel mode accepted by the Directions API and the shareable URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Bicycling,
    Transit,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Driving => "driving",
            TravelMode::Walking => "walking",
            TravelMode::Bicycling => "bicycling",
            TravelMode::Transit => "transit",
        }
    }
}

/// Waypoint-optimization seam. Given an origin, destination and a set of
/// intermediate waypoints, returns the optimized visiting order as indices
/// into the waypoint slice.
pub trait DirectionsApi {
    fn waypoint_order(
        &self,
        origin: &str,
        destination: &str,
        waypoints: &[String],
    ) -> Result<Vec<usize>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Directions API client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GoogleDirectionsClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl GoogleDirectionsClient {
    pub const DEFAULT_BASE_URL: &'static str =
        "https://maps.googleapis.com/maps/api/directions/json";

    pub fn new(api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_base_url(api_key, Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: Option<String>,
    routes: Option<Vec<DirectionsRoute>>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    waypoint_order: Option<Vec<usize>>,
}

impl DirectionsApi for GoogleDirectionsClient {
    fn waypoint_order(
        &self,
        origin: &str,
        destination: &str,
        waypoints: &[String],
    ) -> Result<Vec<usize>, ProviderError> {
        let waypoint_param = format!("optimize:true|{}", waypoints.join("|"));

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("origin", origin),
                ("destination", destination),
                ("waypoints", waypoint_param.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: DirectionsResponse = response
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let route = body
            .routes
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::NoResult(format!(
                    "no directions found (status {})",
                    body.status.as_deref().unwrap_or("unknown")
                ))
            })?;

        let order = route.waypoint_order.unwrap_or_default();
        if order.len() != waypoints.len() || order.iter().any(|&i| i >= waypoints.len()) {
            return Err(ProviderError::Decode(
                "waypoint_order does not match submitted waypoints".to_string(),
            ));
        }

        Ok(order)
    }
}

// ---------------------------------------------------------------------------
// Provider adapter
// ---------------------------------------------------------------------------

/// Primary adapter. Optimizes stop order through the Directions API (per
/// window bucket when several are present, whole-route otherwise), caches
/// optimization results, and falls back to the un-optimized order when the
/// backend misbehaves.
pub struct GoogleMapsProvider<A> {
    ctx: RouteContext,
    stops: Vec<Stop>,
    api: A,
    cache: Cache,
    backoff: Backoff,
    mode: TravelMode,
    avoid: Option<String>,
    query_string_urls: bool,
}

impl<A: DirectionsApi> GoogleMapsProvider<A> {
    pub fn new(ctx: RouteContext, api: A, cache: Cache) -> Self {
        Self {
            ctx,
            stops: Vec::new(),
            api,
            cache,
            backoff: Backoff::default(),
            mode: TravelMode::default(),
            avoid: None,
            query_string_urls: false,
        }
    }

    pub fn with_backoff_policy(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn set_mode(&mut self, mode: TravelMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> TravelMode {
        self.mode
    }

    /// Avoidance preferences, e.g. `tolls` or `highways`.
    pub fn set_avoid(&mut self, avoid: Option<String>) {
        self.avoid = avoid.filter(|a| !a.is_empty());
    }

    pub fn avoid(&self) -> Option<&str> {
        self.avoid.as_deref()
    }

    /// Emit `?origin=..&destination=..` URLs instead of the default
    /// `/dir/a/b/c` path style.
    pub fn set_query_string_urls(&mut self, enabled: bool) {
        self.query_string_urls = enabled;
    }

    pub fn query_string_urls(&self) -> bool {
        self.query_string_urls
    }

    /// Reorder one window bucket. The first and last address stay anchored;
    /// only the middle is submitted for optimization.
    fn optimize_within_window(&self, segment: &[String]) -> Result<Vec<String>, ProviderError> {
        if segment.len() <= 2 {
            return Ok(segment.to_vec());
        }

        let key = format!("window:{}", canonical_key(segment));
        if let Some(hit) = self.cache.get::<Vec<String>>(&key) {
            debug!(stops = segment.len(), "using cached window optimization");
            return Ok(hit);
        }

        let first = &segment[0];
        let last = &segment[segment.len() - 1];
        let middle = &segment[1..segment.len() - 1];

        let order = with_backoff(&self.backoff, || {
            self.api.waypoint_order(first, last, middle)
        })?;

        let mut ordered = Vec::with_capacity(segment.len());
        ordered.push(first.clone());
        for idx in order {
            ordered.push(middle[idx].clone());
        }
        ordered.push(last.clone());

        self.cache.set(&key, &ordered);
        Ok(ordered)
    }

    /// Whole-route optimization: origin -> every stop -> destination.
    fn optimize_full_route(
        &self,
        addresses: &[String],
        destination: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let mut key_parts = vec![self.ctx.origin.clone()];
        key_parts.extend_from_slice(addresses);
        key_parts.push(destination.to_string());
        let key = format!("route:{}", canonical_key(&key_parts));

        if let Some(hit) = self.cache.get::<Vec<String>>(&key) {
            debug!(stops = addresses.len(), "using cached optimized route");
            return Ok(hit);
        }

        let order = with_backoff(&self.backoff, || {
            self.api
                .waypoint_order(&self.ctx.origin, destination, addresses)
        })?;

        let ordered: Vec<String> = order.into_iter().map(|i| addresses[i].clone()).collect();
        self.cache.set(&key, &ordered);
        info!(stops = ordered.len(), "cached optimized route");
        Ok(ordered)
    }

    fn render_url(&self, origin: &str, destination: &str, waypoints: &[String]) -> String {
        if self.query_string_urls {
            let encoded_waypoints = waypoints
                .iter()
                .map(|w| urlencoding::encode(w).into_owned())
                .collect::<Vec<_>>()
                .join("|");

            let mut url = format!(
                "https://www.google.com/maps/dir/?origin={}&destination={}&travelmode={}&waypoints={}",
                urlencoding::encode(origin),
                urlencoding::encode(destination),
                self.mode.as_str(),
                encoded_waypoints,
            );
            if let Some(avoid) = &self.avoid {
                url.push_str("&avoid=");
                url.push_str(&urlencoding::encode(avoid));
            }
            return url;
        }

        let mut segments = Vec::with_capacity(waypoints.len() + 2);
        segments.push(urlencoding::encode(origin).into_owned());
        for waypoint in waypoints {
            segments.push(urlencoding::encode(waypoint).into_owned());
        }
        segments.push(urlencoding::encode(destination).into_owned());

        format!("https://www.google.com/maps/dir/{}", segments.join("/"))
    }
}

impl<A: DirectionsApi> RouteProvider for GoogleMapsProvider<A> {
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

        let grouped = group_by_window(self.stops.clone());

        let (destination, waypoints) = if grouped.len() > 1 {
            info!(segments = grouped.len(), "optimizing each service window independently");

            let mut addresses: Vec<String> = Vec::new();
            for group in &grouped {
                let segment: Vec<String> = group.iter().map(|s| s.address.clone()).collect();
                match self.optimize_within_window(&segment) {
                    Ok(ordered) => addresses.extend(ordered),
                    Err(err) => {
                        warn!(%err, "window optimization failed, keeping raw order");
                        addresses.extend(segment);
                    }
                }
            }

            let last = addresses.last().cloned().unwrap_or_default();
            (self.ctx.resolve_destination(&last), addresses)
        } else {
            let addresses: Vec<String> = self.stops.iter().map(|s| s.address.clone()).collect();
            let last = addresses.last().cloned().unwrap_or_default();
            let destination = self.ctx.resolve_destination(&last);

            match self.optimize_full_route(&addresses, &destination) {
                Ok(ordered) => (destination, ordered),
                Err(err) => {
                    warn!(%err, "route optimization failed, keeping raw order");
                    (destination, addresses)
                }
            }
        };

        let url = self.render_url(&self.ctx.origin, &destination, &waypoints);
        debug!(%url, "generated google maps route url");
        Ok(url)
    }
}
