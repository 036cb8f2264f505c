//! Travel-time matrices and the nearest-neighbor ordering heuristic.
//!
//! The cost-conscious provider orders stops itself instead of paying for a
//! waypoint-optimization API. It asks a [`TravelMatrix`] for pairwise travel
//! times and walks them greedily. Haversine is the always-available default;
//! the public OSRM table endpoint gives road-aware durations when reachable.

use serde::Deserialize;

use crate::geocode::Coordinate;

/// Provides a travel-time matrix (seconds) for a set of points, indexed by
/// the input order. An empty matrix means "unavailable".
pub trait TravelMatrix {
    fn matrix_for(&self, points: &[Coordinate]) -> Vec<Vec<i32>>;
}

// ---------------------------------------------------------------------------
// Haversine estimate
// ---------------------------------------------------------------------------

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle travel-time estimate. Ignores roads, but needs no network
/// and no API key.
#[derive(Debug, Clone)]
pub struct HaversineMatrix {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineMatrix {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineMatrix {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    fn haversine_km(from: Coordinate, to: Coordinate) -> f64 {
        let lat1_rad = from.lat.to_radians();
        let lat2_rad = to.lat.to_radians();
        let delta_lat = (to.lat - from.lat).to_radians();
        let delta_lon = (to.lon - from.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }

    fn km_to_seconds(&self, km: f64) -> i32 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round() as i32
    }
}

impl TravelMatrix for HaversineMatrix {
    fn matrix_for(&self, points: &[Coordinate]) -> Vec<Vec<i32>> {
        let n = points.len();
        let mut matrix = vec![vec![0; n]; n];

        for (i, from) in points.iter().enumerate() {
            for (j, to) in points.iter().enumerate() {
                if i != j {
                    let km = Self::haversine_km(*from, *to);
                    matrix[i][j] = self.km_to_seconds(km);
                }
            }
        }

        matrix
    }
}

// ---------------------------------------------------------------------------
// OSRM table endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OsrmTableConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmTableConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            profile: "driving".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Duration matrix from an OSRM `/table` service. Failures return an empty
/// matrix so callers fall back to haversine or raw order.
#[derive(Debug, Clone)]
pub struct OsrmTableClient {
    config: OsrmTableConfig,
    client: reqwest::blocking::Client,
}

impl OsrmTableClient {
    pub fn new(config: OsrmTableConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    durations: Option<Vec<Vec<f64>>>,
}

impl TravelMatrix for OsrmTableClient {
    fn matrix_for(&self, points: &[Coordinate]) -> Vec<Vec<i32>> {
        if points.is_empty() {
            return Vec::new();
        }

        let coords = points
            .iter()
            .map(Coordinate::lon_lat)
            .collect::<Vec<_>>()
            .join(";");

        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration",
            self.config.base_url, self.config.profile, coords
        );

        let response = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>());

        match response {
            Ok(body) => body
                .durations
                .unwrap_or_default()
                .into_iter()
                .map(|row| row.into_iter().map(|value| value.round() as i32).collect())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Nearest-neighbor ordering
// ---------------------------------------------------------------------------

/// Greedy visit order for `points` starting from `start`.
///
/// Returns indices into `points`. If the matrix is unavailable or ragged,
/// the input order is kept unchanged.
pub fn nearest_neighbor_order(
    matrix: &impl TravelMatrix,
    start: Coordinate,
    points: &[Coordinate],
) -> Vec<usize> {
    if points.len() < 2 {
        return (0..points.len()).collect();
    }

    // Row 0 is the start point; rows 1.. are the stops.
    let mut all = Vec::with_capacity(points.len() + 1);
    all.push(start);
    all.extend_from_slice(points);

    let table = matrix.matrix_for(&all);
    if table.len() != all.len() || table.iter().any(|row| row.len() != all.len()) {
        return (0..points.len()).collect();
    }

    let mut remaining: Vec<usize> = (0..points.len()).collect();
    let mut order = Vec::with_capacity(points.len());
    let mut current = 0usize;

    while !remaining.is_empty() {
        let (pick, _) = remaining
            .iter()
            .enumerate()
            .min_by_key(|&(_, &idx)| table[current][idx + 1])
            .map(|(pos, &idx)| (pos, idx))
            .unwrap_or((0, remaining[0]));

        let next = remaining.remove(pick);
        current = next + 1;
        order.push(next);
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon)
    }

    #[test]
    fn haversine_same_point_is_zero() {
        let dist = HaversineMatrix::haversine_km(c(36.1, -115.1), c(36.1, -115.1));
        assert!(dist < 0.001);
    }

    #[test]
    fn haversine_known_distance() {
        // Las Vegas to Los Angeles, ~370 km.
        let dist = HaversineMatrix::haversine_km(c(36.17, -115.14), c(34.05, -118.24));
        assert!(dist > 350.0 && dist < 400.0, "expected ~370km, got {dist}");
    }

    #[test]
    fn matrix_diagonal_is_zero_and_symmetric() {
        let provider = HaversineMatrix::default();
        let points = vec![c(36.1, -115.1), c(36.2, -115.2), c(36.3, -115.3)];
        let matrix = provider.matrix_for(&points);

        for i in 0..points.len() {
            assert_eq!(matrix[i][i], 0);
        }
        assert_eq!(matrix[0][1], matrix[1][0]);
    }

    #[test]
    fn km_to_seconds_uses_assumed_speed() {
        let provider = HaversineMatrix::new(40.0);
        // 10 km at 40 km/h = 900 seconds.
        assert_eq!(provider.km_to_seconds(10.0), 900);
    }

    #[test]
    fn nearest_neighbor_visits_closest_first() {
        // Start at the origin; the second point is closer than the first.
        let start = c(0.0, 0.0);
        let points = vec![c(2.0, 0.0), c(0.5, 0.0), c(1.0, 0.0)];

        let order = nearest_neighbor_order(&HaversineMatrix::default(), start, &points);
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn nearest_neighbor_keeps_order_when_matrix_unavailable() {
        struct EmptyMatrix;
        impl TravelMatrix for EmptyMatrix {
            fn matrix_for(&self, _points: &[Coordinate]) -> Vec<Vec<i32>> {
                Vec::new()
            }
        }

        let order = nearest_neighbor_order(&EmptyMatrix, c(0.0, 0.0), &[c(1.0, 0.0), c(2.0, 0.0)]);
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn nearest_neighbor_single_point() {
        let order =
            nearest_neighbor_order(&HaversineMatrix::default(), c(0.0, 0.0), &[c(1.0, 1.0)]);
        assert_eq!(order, vec![0]);
    }
}
