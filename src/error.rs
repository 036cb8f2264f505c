//! Error taxonomy for route generation.
//!
//! Three layers: `ProviderError` for a single external call (geocode,
//! optimization), `BoardError` for the scheduling backend, and `RouteError`
//! for everything a caller of the routing pipeline can observe.

use std::time::Duration;

use thiserror::Error;

use crate::retry::Transient;

/// Failure of one external mapping-provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("no result: {0}")]
    NoResult(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            // Network-class failures are worth retrying. Empty or malformed
            // responses are not; the caller degrades immediately instead.
            ProviderError::Http(err) => !err.is_builder(),
            ProviderError::Status(code) => *code == 429 || *code >= 500,
            ProviderError::NoResult(_) | ProviderError::Decode(_) => false,
        }
    }
}

/// Failure of a scheduling-backend call.
#[derive(Debug, Error)]
pub enum BoardError {
    /// HTTP 429. Absorbed by [`crate::retry::wait_on_rate_limit`]; never
    /// surfaced past the job-board client.
    #[error("rate limited, retry after {wait:?}")]
    RateLimited { wait: Duration },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Errors observable by callers of the routing pipeline.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Zero routable stops after conversion and dedup. Recoverable; batch
    /// callers skip the subject.
    #[error("no stops available to generate a route")]
    NoStops,

    /// Optimization or geocoding failed beyond the fallback thresholds.
    #[error("route build failed: {0}")]
    Build(String),

    /// Configuration error. Fail fast, never retried.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("job board error: {0}")]
    Board(#[from] BoardError),
}
