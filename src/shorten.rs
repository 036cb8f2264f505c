//! URL shortener boundary.
//!
//! Shortening is strictly best-effort: any failure hands back the long URL
//! unchanged, so a flaky shortener can never block route persistence.
//! Results are cached so repeat runs over the same route make one call.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::Cache;

#[derive(Debug, Deserialize)]
struct ShortenResponse {
    #[serde(default)]
    short: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UrlShortener {
    base_url: Option<String>,
    client: reqwest::blocking::Client,
    cache: Cache,
}

impl UrlShortener {
    pub fn new(base_url: Option<String>, cache: Cache) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(6))
            .build()?;
        Ok(Self {
            base_url,
            client,
            cache,
        })
    }

    /// Shorten `long_url`, returning it unchanged on any failure.
    pub fn shorten(&self, long_url: &str) -> String {
        let Some(base) = &self.base_url else {
            warn!("no shortener configured, using the long url");
            return long_url.to_string();
        };

        if let Some(hit) = self.cache.get::<String>(long_url) {
            return hit;
        }

        let response = self
            .client
            .post(format!("{base}/new"))
            .json(&serde_json::json!({ "url": long_url }))
            .send();

        let short = match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<ShortenResponse>() {
                Ok(body) => body.short,
                Err(err) => {
                    warn!(%err, "shortener returned an unreadable body");
                    None
                }
            },
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "shortener request failed");
                None
            }
            Err(err) => {
                warn!(%err, "shortener unreachable");
                None
            }
        };

        match short {
            Some(short) if !short.is_empty() => {
                info!(%short, "shortened route url");
                self.cache.set(long_url, &short);
                short
            }
            _ => long_url.to_string(),
        }
    }
}
