//! Runtime settings, loaded from the environment.

use std::env;
use std::path::PathBuf;

/// Everything the binary needs to wire up real clients. Tests construct
/// this directly instead of touching the environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub board_base_url: String,
    pub board_api_key: String,
    pub google_api_key: Option<String>,
    pub mapbox_api_key: Option<String>,
    pub shortener_base_url: Option<String>,
    pub default_origin: Option<String>,
    /// Backend field that receives the finished route URL.
    pub route_field_name: String,
    /// Directory for persistent caches; `None` keeps caches in memory.
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            board_base_url: env::var("JOBBOARD_BASE_URL").unwrap_or_default(),
            board_api_key: env::var("JOBBOARD_API_KEY").unwrap_or_default(),
            google_api_key: non_empty(env::var("GOOGLE_MAPS_API_KEY").ok()),
            mapbox_api_key: non_empty(env::var("MAPBOX_API_KEY").ok()),
            shortener_base_url: non_empty(env::var("SHORTENER_BASE_URL").ok()),
            default_origin: non_empty(env::var("DEFAULT_ORIGIN").ok()),
            route_field_name: env::var("ROUTE_URL_FIELD_NAME")
                .unwrap_or_else(|_| "OptimizedRouteURL".to_string()),
            cache_dir: env::var("CACHE_DIR").ok().map(PathBuf::from),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
