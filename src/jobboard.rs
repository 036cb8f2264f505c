//! Scheduling-backend boundary.
//!
//! The routing engine only needs four operations from the field-service
//! backend, expressed by [`JobBoard`]. [`HttpJobBoard`] is the thin JSON
//! client; every call goes through the unbounded 429 wait loop, so rate
//! limiting never reaches the routing layer.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::BoardError;
use crate::retry::wait_on_rate_limit;

/// Fallback wait when a 429 response carries no usable hint.
const RATE_LIMIT_FALLBACK_WAIT: Duration = Duration::from_secs(10);

/// One scheduled assignment, already enriched with its service-request
/// subject and location by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub service_request_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    /// ISO datetime string, e.g. `2024-01-01T08:00:00`.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub is_complete: Option<bool>,
}

/// A technician eligible for routing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: u64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Subject {
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if name.is_empty() {
            format!("subject {}", self.id)
        } else {
            name.to_string()
        }
    }
}

/// Which assignment date field a range filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateRangeType {
    #[default]
    Scheduled,
    Created,
    Completed,
}

impl fmt::Display for DateRangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DateRangeType::Scheduled => "scheduled",
            DateRangeType::Created => "created",
            DateRangeType::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DateRangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Ok(DateRangeType::Scheduled),
            "created" => Ok(DateRangeType::Created),
            "completed" => Ok(DateRangeType::Completed),
            other => Err(format!("unknown date range type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Today's date, once — the daily batch routes the current day.
    pub fn today() -> Self {
        let today = Local::now().date_naive();
        Self {
            start: today,
            end: today,
        }
    }
}

/// The four backend operations the routing engine consumes.
pub trait JobBoard {
    fn active_subjects(&self) -> Result<Vec<Subject>, BoardError>;

    fn assignments_for_subject(
        &self,
        subject_id: u64,
        range: DateRange,
        range_type: DateRangeType,
    ) -> Result<Vec<Assignment>, BoardError>;

    /// Work address preferred over home; `None` when the backend has
    /// neither.
    fn subject_origin_address(&self, subject_id: u64) -> Result<Option<String>, BoardError>;

    fn update_route_field(
        &self,
        subject_id: u64,
        url: &str,
        field_name: &str,
    ) -> Result<(), BoardError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpJobBoard {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct OriginResponse {
    #[serde(default)]
    origin: Option<String>,
}

impl HttpJobBoard {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BoardError> {
        wait_on_rate_limit(|| {
            let response = self
                .client
                .get(format!("{}{}", self.base_url, path))
                .basic_auth(&self.api_key, Some("x"))
                .query(query)
                .send()?;

            let status = response.status();
            if status.as_u16() == 429 {
                let body = response.text().unwrap_or_default();
                return Err(BoardError::RateLimited {
                    wait: parse_retry_after(&body).unwrap_or(RATE_LIMIT_FALLBACK_WAIT),
                });
            }
            if !status.is_success() {
                return Err(BoardError::Status(status.as_u16()));
            }

            response
                .json::<T>()
                .map_err(|e| BoardError::Decode(e.to_string()))
        })
    }
}

impl JobBoard for HttpJobBoard {
    fn active_subjects(&self) -> Result<Vec<Subject>, BoardError> {
        let subjects: Vec<Subject> = self.get_json("/subjects/active", &[])?;
        debug!(count = subjects.len(), "fetched active subjects");
        Ok(subjects)
    }

    fn assignments_for_subject(
        &self,
        subject_id: u64,
        range: DateRange,
        range_type: DateRangeType,
    ) -> Result<Vec<Assignment>, BoardError> {
        self.get_json(
            &format!("/subjects/{subject_id}/assignments"),
            &[
                ("start", range.start.to_string()),
                ("end", range.end.to_string()),
                ("dateRangeType", range_type.to_string()),
            ],
        )
    }

    fn subject_origin_address(&self, subject_id: u64) -> Result<Option<String>, BoardError> {
        let response: OriginResponse = self.get_json(&format!("/subjects/{subject_id}/origin"), &[])?;
        Ok(response.origin.filter(|o| !o.trim().is_empty()))
    }

    fn update_route_field(
        &self,
        subject_id: u64,
        url: &str,
        field_name: &str,
    ) -> Result<(), BoardError> {
        wait_on_rate_limit(|| {
            let response = self
                .client
                .post(format!("{}/subjects/{subject_id}/fields", self.base_url))
                .basic_auth(&self.api_key, Some("x"))
                .json(&serde_json::json!({ "name": field_name, "value": url }))
                .send()?;

            let status = response.status();
            if status.as_u16() == 429 {
                let body = response.text().unwrap_or_default();
                return Err(BoardError::RateLimited {
                    wait: parse_retry_after(&body).unwrap_or(RATE_LIMIT_FALLBACK_WAIT),
                });
            }
            if !status.is_success() {
                return Err(BoardError::Status(status.as_u16()));
            }
            Ok(())
        })
    }
}

/// Parse a `"Try again after <RFC3339>"` hint out of a 429 body. Returns
/// the remaining wait, clamped to at least five seconds so a skewed clock
/// never produces a zero wait.
pub fn parse_retry_after(body: &str) -> Option<Duration> {
    let marker = "Try again after ";
    let rest = &body[body.find(marker)? + marker.len()..];
    let end = rest.find('Z')?;
    let stamp = &rest[..=end];

    let retry_at: DateTime<Utc> = stamp.parse().ok()?;
    let wait = (retry_at - Utc::now()).num_seconds().max(5) as u64;
    Some(Duration::from_secs(wait))
}
