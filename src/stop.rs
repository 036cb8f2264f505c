//! Stop model plus the deduplication and window-grouping engine.
//!
//! A [`Stop`] is one physical address to visit. Stops carry a coarse
//! [`ServiceWindow`] instead of exact times; the window order is the
//! authoritative macro-sequence every provider must respect.

use std::collections::HashMap;
use std::fmt;

use tracing::info;

/// Technician scheduling window.
///
/// The route runs morning stops first, flexible stops next, afternoon stops
/// last, so the priority order is Morning < AllDay < Afternoon. This is a
/// scheduling policy, not a clock-time sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceWindow {
    Morning,
    AllDay,
    Afternoon,
}

impl ServiceWindow {
    /// Position in the macro-sequence. Lower runs earlier.
    pub fn priority(&self) -> u8 {
        match self {
            ServiceWindow::Morning => 0,
            ServiceWindow::AllDay => 1,
            ServiceWindow::Afternoon => 2,
        }
    }
}

impl fmt::Display for ServiceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceWindow::Morning => "AM",
            ServiceWindow::AllDay => "ALL_DAY",
            ServiceWindow::Afternoon => "PM",
        };
        write!(f, "{name}")
    }
}

/// A single stop on a technician's route.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    /// Full postal address. The only stable identity key available; must be
    /// non-empty by the time the stop reaches dedup (empty addresses are
    /// filtered during conversion).
    pub address: String,
    pub window: ServiceWindow,
    /// Ticket number or customer name. Labels concatenate when stops merge.
    pub label: Option<String>,
    /// Number of underlying jobs collapsed into this stop.
    pub job_count: usize,
}

impl Stop {
    pub fn new(address: impl Into<String>, window: ServiceWindow) -> Self {
        Self {
            address: address.into(),
            window,
            label: None,
            job_count: 1,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Case- and whitespace-insensitive identity key.
    pub fn address_key(&self) -> String {
        self.address.trim().to_lowercase()
    }
}

/// Collapse stops that share an address.
///
/// Groups by the normalized address. Singleton groups pass through
/// unchanged. Larger groups merge into one stop: labels join with `", "`
/// and gain an `"(N jobs)"` suffix, the earliest window wins, and
/// `job_count` becomes the group size. Output preserves the insertion order
/// of each address's first occurrence; callers must not assume the result
/// is window-sorted.
pub fn deduplicate_stops(stops: Vec<Stop>) -> Vec<Stop> {
    let total = stops.len();

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<Stop>> = HashMap::new();
    for stop in stops {
        let key = stop.address_key();
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(stop);
    }

    let mut unique: Vec<Stop> = Vec::with_capacity(order.len());
    for key in order {
        let mut group = grouped.remove(&key).unwrap_or_default();
        if group.len() == 1 {
            unique.extend(group);
            continue;
        }

        let count = group.len();
        let earliest = group
            .iter()
            .map(|s| s.window)
            .min_by_key(|w| w.priority())
            .unwrap_or(ServiceWindow::AllDay);

        let labels: Vec<&str> = group
            .iter()
            .filter_map(|s| s.label.as_deref())
            .filter(|l| !l.is_empty())
            .collect();
        let base = if labels.is_empty() {
            "Jobs".to_string()
        } else {
            labels.join(", ")
        };

        let mut merged = group.swap_remove(0);
        merged.label = Some(format!("{base} ({count} jobs)"));
        merged.window = earliest;
        merged.job_count = count;
        unique.push(merged);
    }

    if unique.len() != total {
        info!(
            merged = total - unique.len(),
            unique = unique.len(),
            "deduplicated redundant stops"
        );
    }

    unique
}

/// Stable sort by window priority; ties keep their relative input order.
pub fn order_by_window(stops: &mut [Stop]) {
    stops.sort_by_key(|s| s.window.priority());
}

/// Partition stops into up to three buckets in window-priority order.
///
/// Empty buckets are omitted. The bucket sequence is the macro-order every
/// provider emits; adapters optimize within a bucket but never across one.
pub fn group_by_window(stops: Vec<Stop>) -> Vec<Vec<Stop>> {
    let mut morning = Vec::new();
    let mut all_day = Vec::new();
    let mut afternoon = Vec::new();

    for stop in stops {
        match stop.window {
            ServiceWindow::Morning => morning.push(stop),
            ServiceWindow::AllDay => all_day.push(stop),
            ServiceWindow::Afternoon => afternoon.push(stop),
        }
    }

    [morning, all_day, afternoon]
        .into_iter()
        .filter(|bucket| !bucket.is_empty())
        .collect()
}
