//! Glue between the job board and a chosen provider adapter.
//!
//! Converts raw assignment records into stops, runs the conversion-stage
//! dedup pass, selects the provider, and returns the finished URL. Also
//! exposes the preview path used for manual verification before a batch
//! run writes anything back.

use std::fmt;

use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::Settings;
use crate::error::RouteError;
use crate::geocode::{CachedGeocoder, MapboxGeocoder, NominatimGeocoder};
use crate::jobboard::{Assignment, DateRange, DateRangeType, JobBoard};
use crate::matrix::HaversineMatrix;
use crate::provider::google::GoogleDirectionsClient;
use crate::provider::osm::{OsrmTripClient, OsrmTripConfig};
use crate::provider::{
    GoogleMapsProvider, MapboxProvider, OsmProvider, ProviderKind, RouteContext, RouteProvider,
};
use crate::stop::{order_by_window, ServiceWindow, Stop};

/// Outcome of one routing request. "Nothing to route" is a first-class
/// variant so it can never be mistaken for a usable URL or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    NoAssignments,
    Url(String),
}

// ---------------------------------------------------------------------------
// Assignment conversion
// ---------------------------------------------------------------------------

/// Window from the scheduled start hour: before noon is Morning, noon to
/// 5 PM is Afternoon, anything later or unparsable is AllDay (fail-safe).
pub fn service_window_for(start: Option<&str>) -> ServiceWindow {
    let Some(start) = start else {
        return ServiceWindow::AllDay;
    };

    let hour = match start.parse::<NaiveDateTime>() {
        Ok(dt) => dt.hour(),
        Err(_) => {
            debug!(start, "unparsable start time, defaulting to ALL_DAY");
            return ServiceWindow::AllDay;
        }
    };

    if hour < 12 {
        ServiceWindow::Morning
    } else if hour < 17 {
        ServiceWindow::Afternoon
    } else {
        ServiceWindow::AllDay
    }
}

fn full_address(assignment: &Assignment) -> String {
    let address = format!(
        "{}, {}, {} {}",
        assignment.address.as_deref().unwrap_or(""),
        assignment.city.as_deref().unwrap_or(""),
        assignment.state.as_deref().unwrap_or(""),
        assignment.zip.as_deref().unwrap_or(""),
    );
    address.trim_matches([' ', ',']).to_string()
}

/// One stop per assignment, pre-dedup. Assignments without a usable
/// address are dropped here so empty addresses never reach the dedup
/// engine.
pub fn stops_from_assignments(assignments: &[Assignment]) -> Vec<Stop> {
    let mut stops = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        let address = full_address(assignment);
        if address.is_empty() {
            warn!(
                service_request = assignment.service_request_id.as_deref().unwrap_or("?"),
                "dropping assignment with no address"
            );
            continue;
        }

        let mut stop = Stop::new(address, service_window_for(assignment.start.as_deref()));
        if let Some(sr_id) = &assignment.service_request_id {
            stop = stop.with_label(format!("SR-{sr_id}"));
        }
        stops.push(stop);
    }

    stops
}

/// Conversion-stage dedup: a ticket split into AM and PM blocks shows up as
/// two assignments with the same label, so the key is the label when
/// present, else the normalized address. The first occurrence survives but
/// adopts the earliest window among its duplicates. Output is window-sorted.
pub fn dedupe_converted(stops: Vec<Stop>) -> Vec<Stop> {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut unique: Vec<Stop> = Vec::new();

    for stop in stops {
        let key = stop
            .label
            .clone()
            .unwrap_or_else(|| stop.address_key());

        match seen.get(&key) {
            None => {
                seen.insert(key, unique.len());
                unique.push(stop);
            }
            Some(&idx) => {
                if stop.window.priority() < unique[idx].window.priority() {
                    unique[idx].window = stop.window;
                }
            }
        }
    }

    order_by_window(&mut unique);
    debug!(unique = unique.len(), "converted assignments to route stops");
    unique
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Builds a ready-to-use adapter for a provider kind. The orchestrator only
/// sees this seam, so tests swap in factories that return fakes.
pub trait ProviderFactory {
    fn make(
        &self,
        kind: ProviderKind,
        ctx: RouteContext,
    ) -> Result<Box<dyn RouteProvider>, RouteError>;
}

/// Wires real network clients from [`Settings`], sharing one route cache
/// and one geocode cache across all adapters.
pub struct DefaultProviderFactory {
    settings: Settings,
    route_cache: Cache,
    geocode_cache: Cache,
}

impl DefaultProviderFactory {
    /// Route optimizations go stale with the day's stop set, so their TTL
    /// is short; geocodes barely change, so theirs is a day.
    pub const ROUTE_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 60);
    pub const GEOCODE_TTL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

    pub fn new(settings: Settings) -> Self {
        let (route_cache, geocode_cache) = match &settings.cache_dir {
            Some(dir) => (
                Cache::persistent(dir, "routes", Self::ROUTE_TTL),
                Cache::persistent(dir, "geocode", Self::GEOCODE_TTL),
            ),
            None => (
                Cache::new("routes", Self::ROUTE_TTL),
                Cache::new("geocode", Self::GEOCODE_TTL),
            ),
        };
        Self {
            settings,
            route_cache,
            geocode_cache,
        }
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn make(
        &self,
        kind: ProviderKind,
        ctx: RouteContext,
    ) -> Result<Box<dyn RouteProvider>, RouteError> {
        match kind {
            ProviderKind::Google => {
                let key = self.settings.google_api_key.as_deref().ok_or_else(|| {
                    RouteError::Build("GOOGLE_MAPS_API_KEY is required for the google provider".to_string())
                })?;
                let api = GoogleDirectionsClient::new(key)
                    .map_err(|e| RouteError::Build(e.to_string()))?;
                Ok(Box::new(GoogleMapsProvider::new(
                    ctx,
                    api,
                    self.route_cache.clone(),
                )))
            }
            ProviderKind::Mapbox => {
                let token = self.settings.mapbox_api_key.as_deref().ok_or_else(|| {
                    RouteError::Build("MAPBOX_API_KEY is required for the mapbox provider".to_string())
                })?;
                let geocoder = MapboxGeocoder::new(token)
                    .map_err(|e| RouteError::Build(e.to_string()))?;
                Ok(Box::new(MapboxProvider::new(
                    ctx,
                    CachedGeocoder::new(geocoder, self.geocode_cache.clone()),
                    HaversineMatrix::default(),
                )))
            }
            ProviderKind::Osm => {
                let geocoder = NominatimGeocoder::new()
                    .map_err(|e| RouteError::Build(e.to_string()))?;
                let trip = OsrmTripClient::new(OsrmTripConfig::default())
                    .map_err(|e| RouteError::Build(e.to_string()))?;
                Ok(Box::new(OsmProvider::new(
                    ctx,
                    CachedGeocoder::new(geocoder, self.geocode_cache.clone()),
                    trip,
                    self.route_cache.clone(),
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<B, F> {
    board: B,
    factory: F,
    default_origin: Option<String>,
}

/// Diagnostic output for manual verification of one subject's route.
#[derive(Debug)]
pub struct Preview {
    pub assignments: Vec<Assignment>,
    pub stops: Vec<Stop>,
    pub outcome: PreviewOutcome,
}

/// An empty day is a first-class outcome here too, so preview output never
/// labels it an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    NoAssignments,
    Url(String),
    Failed(String),
}

impl fmt::Display for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "================= RAW ASSIGNMENTS =================")?;
        if self.assignments.is_empty() {
            writeln!(f, "(no scheduled work)")?;
        }
        for assignment in &self.assignments {
            writeln!(
                f,
                "- {} | {} | {}",
                assignment.service_request_id.as_deref().unwrap_or("?"),
                assignment.start.as_deref().unwrap_or("?"),
                assignment.subject.as_deref().unwrap_or("?"),
            )?;
        }

        writeln!(f, "================= ROUTE STOPS =====================")?;
        for stop in &self.stops {
            writeln!(
                f,
                "- {} | {} | {}",
                stop.label.as_deref().unwrap_or("-"),
                stop.window,
                stop.address
            )?;
        }

        writeln!(f, "================= ROUTE URL =======================")?;
        match &self.outcome {
            PreviewOutcome::Url(url) => writeln!(f, "{url}"),
            PreviewOutcome::NoAssignments => writeln!(f, "(no scheduled work, nothing to route)"),
            PreviewOutcome::Failed(err) => writeln!(f, "[ERROR] {err}"),
        }
    }
}

impl<B: JobBoard, F: ProviderFactory> Orchestrator<B, F> {
    pub fn new(board: B, factory: F, default_origin: Option<String>) -> Self {
        Self {
            board,
            factory,
            default_origin,
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    fn resolve_origin(
        &self,
        subject_id: u64,
        origin_override: Option<&str>,
    ) -> Result<String, RouteError> {
        if let Some(origin) = origin_override {
            return Ok(origin.to_string());
        }
        if let Some(origin) = self.board.subject_origin_address(subject_id)? {
            return Ok(origin);
        }
        self.default_origin.clone().ok_or_else(|| {
            RouteError::Build(format!("no origin address available for subject {subject_id}"))
        })
    }

    /// Fetch, convert and route one subject's assignments.
    pub fn generate_route(
        &self,
        kind: ProviderKind,
        subject_id: u64,
        origin_override: Option<&str>,
        destination_override: Option<&str>,
        range: DateRange,
        range_type: DateRangeType,
    ) -> Result<RouteOutcome, RouteError> {
        let assignments = self
            .board
            .assignments_for_subject(subject_id, range, range_type)?;
        if assignments.is_empty() {
            info!(subject_id, "no assignments, nothing to route");
            return Ok(RouteOutcome::NoAssignments);
        }

        let stops = dedupe_converted(stops_from_assignments(&assignments));
        if stops.is_empty() {
            return Err(RouteError::NoStops);
        }

        let origin = self.resolve_origin(subject_id, origin_override)?;
        let ctx = RouteContext::new(origin)
            .with_destination(destination_override.map(str::to_string));

        let mut provider = self.factory.make(kind, ctx)?;
        provider.add_stops(stops);

        let url = provider.build_route_url()?;
        info!(subject_id, %url, "generated route url");
        Ok(RouteOutcome::Url(url))
    }

    /// Diagnostic path: raw assignments, converted stops, and the URL (or
    /// the build error) without writing anything back.
    pub fn preview(
        &self,
        kind: ProviderKind,
        subject_id: u64,
        origin_override: Option<&str>,
    ) -> Result<Preview, RouteError> {
        let assignments = self.board.assignments_for_subject(
            subject_id,
            DateRange::today(),
            DateRangeType::Scheduled,
        )?;
        let stops = dedupe_converted(stops_from_assignments(&assignments));

        if assignments.is_empty() {
            return Ok(Preview {
                assignments,
                stops,
                outcome: PreviewOutcome::NoAssignments,
            });
        }

        let origin = self.resolve_origin(subject_id, origin_override)?;
        let mut provider = self
            .factory
            .make(kind, RouteContext::new(origin))?;
        provider.add_stops(stops.clone());

        let outcome = match provider.build_route_url() {
            Ok(url) => PreviewOutcome::Url(url),
            Err(err) => PreviewOutcome::Failed(err.to_string()),
        };

        Ok(Preview {
            assignments,
            stops,
            outcome,
        })
    }
}
