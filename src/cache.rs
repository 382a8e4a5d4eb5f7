//! Result cache for incremental runs
//!
//! Remembers, per absolute file path, the modification time at which the file
//! last produced no diagnostics. Unchanged clean files are skipped on the
//! next run. The store is a flat `path=timestamp` file; a reserved entry holds
//! the hash of the configuration that produced the entries.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Key of the configuration hash entry
pub const CONFIG_HASH_KEY: &str = "configuration*?";

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, u64>,
    config_hash: String,
}

/// Path to timestamp store shared by all workers of a run
#[derive(Debug, Default)]
pub struct ResultCache {
    store: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl ResultCache {
    /// Cache that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store at `path`; a missing file yields an empty cache.
    ///
    /// Entries recorded under a different configuration hash are dropped.
    pub fn load(path: &Path, config_hash: &str) -> io::Result<Self> {
        let (entries, stored_hash) = match fs::read_to_string(path) {
            Ok(content) => parse_store(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (HashMap::new(), None),
            Err(e) => return Err(e),
        };

        let entries = if stored_hash.as_deref() == Some(config_hash) {
            entries
        } else {
            if !entries.is_empty() {
                log::info!(
                    "Configuration changed, dropping {} cached entries",
                    entries.len()
                );
            }
            HashMap::new()
        };
        log::debug!("Loaded {} cache entries from {}", entries.len(), path.display());

        Ok(Self {
            store: Some(path.to_path_buf()),
            state: Mutex::new(CacheState {
                entries,
                config_hash: config_hash.to_string(),
            }),
        })
    }

    /// True only when `path` was clean at exactly `timestamp`
    pub fn is_known_clean(&self, path: &str, timestamp: u64) -> bool {
        self.state.lock().entries.get(path) == Some(&timestamp)
    }

    /// Record that `path` produced no diagnostics at `timestamp`
    pub fn mark_clean(&self, path: &str, timestamp: u64) {
        self.state.lock().entries.insert(path.to_string(), timestamp);
    }

    /// Forget `path`
    pub fn invalidate(&self, path: &str) {
        self.state.lock().entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the persistent store, if any
    pub fn store(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    /// Write the whole store back; a no-op for in-memory caches
    pub fn save(&self) -> io::Result<()> {
        match &self.store {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    /// Write the whole store to `path`, replacing its content
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = {
            let state = self.state.lock();
            let mut keys: Vec<&String> = state.entries.keys().collect();
            keys.sort();

            let mut content = String::new();
            content.push_str(&format!("{}={}\n", CONFIG_HASH_KEY, state.config_hash));
            for key in keys {
                content.push_str(&format!("{}={}\n", key, state.entries[key]));
            }
            content
        };

        let mut file = fs::File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

/// Parse store content into entries and the recorded configuration hash
fn parse_store(content: &str) -> (HashMap<String, u64>, Option<String>) {
    let mut entries = HashMap::new();
    let mut config_hash = None;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = line.rsplit_once('=') else {
            log::warn!("Skipping malformed cache line {}: {}", i + 1, line);
            continue;
        };
        if key == CONFIG_HASH_KEY {
            config_hash = Some(value.to_string());
            continue;
        }
        match value.parse::<u64>() {
            Ok(timestamp) if !key.is_empty() => {
                entries.insert(key.to_string(), timestamp);
            }
            _ => log::warn!("Skipping malformed cache line {}: {}", i + 1, line),
        }
    }

    (entries, config_hash)
}

/// Modification time of `path` in milliseconds since the Unix epoch
pub fn file_timestamp(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

/// Hash a config for cache invalidation
pub fn hash_config(config: &impl serde::Serialize) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let json = serde_json::to_string(config).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    json.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Default cache file location
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xmlwalk")
        .join("cache.properties")
}
