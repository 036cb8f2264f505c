//! TTL key-value cache for expensive external lookups.
//!
//! Each cache owns one namespace ("routes", "geocode", ...) with its own
//! time-to-live and, optionally, a JSON file backing it across runs. Reads
//! of expired entries behave as misses and evict the entry. File I/O is
//! best-effort: a load or save failure is logged and never blocks the
//! routing computation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    data: HashMap<String, (u64, serde_json::Value)>,
    #[serde(default)]
    timestamp: u64,
}

#[derive(Debug)]
struct Inner {
    data: HashMap<String, (u64, serde_json::Value)>,
    file_path: Option<PathBuf>,
}

/// Shared-handle TTL cache. Cloning yields another handle to the same store,
/// so one cache can be injected into several components.
#[derive(Debug, Clone)]
pub struct Cache {
    name: String,
    ttl: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl Cache {
    /// In-memory cache for the given namespace.
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            inner: Arc::new(Mutex::new(Inner {
                data: HashMap::new(),
                file_path: None,
            })),
        }
    }

    /// Cache backed by `<dir>/<name>.json`, loaded eagerly if present.
    pub fn persistent(dir: impl AsRef<Path>, name: impl Into<String>, ttl: Duration) -> Self {
        let name = name.into();
        let file_path = dir.as_ref().join(format!("{name}.json"));
        let data = load_file(&name, &file_path);
        Self {
            name,
            ttl,
            inner: Arc::new(Mutex::new(Inner {
                data,
                file_path: Some(file_path),
            })),
        }
    }

    /// Fetch a value if present and younger than the TTL. Expired entries
    /// are evicted on read.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock().ok()?;
        let (ts, value) = inner.data.get(key)?;

        if now_secs().saturating_sub(*ts) > self.ttl.as_secs() {
            debug!(cache = %self.name, key, "evicting expired entry");
            inner.data.remove(key);
            save_locked(&self.name, &inner);
            return None;
        }

        match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(cache = %self.name, key, %err, "dropping undecodable cache entry");
                inner.data.remove(key);
                None
            }
        }
    }

    /// Store a value and persist it immediately (best effort).
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let encoded = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                warn!(cache = %self.name, key, %err, "failed to encode cache value");
                return;
            }
        };

        if let Ok(mut inner) = self.inner.lock() {
            inner.data.insert(key.to_string(), (now_secs(), encoded));
            save_locked(&self.name, &inner);
        }
    }

    /// Drop every entry and remove the backing file if any.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.data.clear();
            if let Some(path) = &inner.file_path {
                let _ = fs::remove_file(path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable cache key for a set of addresses: trim + lowercase each entry,
/// then FNV-1a over the byte sequence with a separator between entries.
/// Keys land in persistent cache files, so the hash must not change across
/// toolchain releases.
pub fn canonical_key(addresses: &[impl AsRef<str>]) -> String {
    let mut hash = FNV_OFFSET;
    for addr in addresses {
        for byte in addr.as_ref().trim().to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash ^= 0x1f;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn load_file(name: &str, path: &Path) -> HashMap<String, (u64, serde_json::Value)> {
    if !path.exists() {
        return HashMap::new();
    }

    match fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|raw| {
        serde_json::from_str::<CacheFile>(&raw).map_err(|e| e.to_string())
    }) {
        Ok(file) => file.data,
        Err(err) => {
            warn!(cache = name, %err, "failed to load cache file, starting empty");
            HashMap::new()
        }
    }
}

fn save_locked(name: &str, inner: &Inner) {
    let Some(path) = &inner.file_path else {
        return;
    };

    let file = CacheFile {
        data: inner.data.clone(),
        timestamp: now_secs(),
    };

    let result = serde_json::to_string_pretty(&file)
        .map_err(|e| e.to_string())
        .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));

    if let Err(err) = result {
        warn!(cache = name, %err, "failed to save cache file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = Cache::new("test", Duration::from_secs(60));
        cache.set("k", &vec!["a".to_string(), "b".to_string()]);

        let value: Option<Vec<String>> = cache.get("k");
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = Cache::new("test", Duration::from_secs(0));
        cache.set("k", &1u32);

        std::thread::sleep(Duration::from_millis(1100));
        let value: Option<u32> = cache.get("k");
        assert_eq!(value, None);
        assert!(cache.is_empty(), "expired entry should be evicted");
    }

    #[test]
    fn missing_key_is_none() {
        let cache = Cache::new("test", Duration::from_secs(60));
        let value: Option<u32> = cache.get("nope");
        assert_eq!(value, None);
    }

    #[test]
    fn clear_empties_the_store() {
        let cache = Cache::new("test", Duration::from_secs(60));
        cache.set("k", &1u32);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn clones_share_the_store() {
        let cache = Cache::new("test", Duration::from_secs(60));
        let other = cache.clone();
        cache.set("k", &7u32);
        assert_eq!(other.get::<u32>("k"), Some(7));
    }

    #[test]
    fn persistent_cache_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("fieldroute-cache-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);

        {
            let cache = Cache::persistent(&dir, "reopen", Duration::from_secs(60));
            cache.clear();
            cache.set("route", &vec!["x".to_string()]);
        }

        let cache = Cache::persistent(&dir, "reopen", Duration::from_secs(60));
        let value: Option<Vec<String>> = cache.get("route");
        assert_eq!(value, Some(vec!["x".to_string()]));
        cache.clear();
    }

    #[test]
    fn canonical_key_ignores_case_and_whitespace() {
        let a = canonical_key(&["1 Main St ", "2 Oak Ave"]);
        let b = canonical_key(&["1 main st", " 2 OAK AVE"]);
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_key_never_changes_for_known_input() {
        // Pinned value: persisted cache files rely on this staying put.
        assert_eq!(
            canonical_key(&["1 Main St", "2 Oak Ave"]),
            "8cb32f179287330f"
        );
    }

    #[test]
    fn canonical_key_is_order_sensitive() {
        let a = canonical_key(&["1 Main St", "2 Oak Ave"]);
        let b = canonical_key(&["2 Oak Ave", "1 Main St"]);
        assert_ne!(a, b);
    }
}
