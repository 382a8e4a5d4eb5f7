//! Configuration for walker runs
//!
//! Reads YAML (`.yaml`/`.yml`) or JSON (`.json`) files selected by extension.

use crate::cache::default_cache_path;
use crate::query::{QueryCheckConfig, QueryLanguage, QueryMatchCheck};
use crate::walker::Traversal;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Walker settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Traversal algorithm; unset defers to `XMLWALK_RECURSIVE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Traversal>,

    /// Process files on a thread pool
    pub parallel: bool,

    /// Number of parallel jobs (0 = auto-detect)
    pub jobs: usize,

    /// Persisted result cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<PathBuf>,

    /// Persist the cache under the user cache directory when `cache_file` is unset
    pub use_default_cache: bool,
}

/// File selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Extensions of files to check
    pub extensions: Vec<String>,

    /// Discovery patterns
    pub include: Vec<String>,

    /// Exclude patterns
    pub exclude: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include: vec!["**/*.xml".to_string()],
            exclude: Vec::new(),
        }
    }
}

/// A built-in check, tagged by its `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckSpec {
    Xpath(QueryCheckConfig),
    Xquery(QueryCheckConfig),
}

impl CheckSpec {
    pub fn language(&self) -> QueryLanguage {
        match self {
            CheckSpec::Xpath(_) => QueryLanguage::Xpath,
            CheckSpec::Xquery(_) => QueryLanguage::Xquery,
        }
    }

    pub fn config(&self) -> &QueryCheckConfig {
        match self {
            CheckSpec::Xpath(config) | CheckSpec::Xquery(config) => config,
        }
    }

    /// Fresh, uninitialized check instance
    pub fn build(&self) -> QueryMatchCheck {
        QueryMatchCheck::new(self.language(), self.config().clone())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub walker: WalkerConfig,

    pub files: FilesConfig,

    pub checks: Vec<CheckSpec>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::Invalid(format!(
                "Unknown config file format: {}",
                ext
            ))),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Traversal to use, falling back to the environment
    pub fn traversal(&self) -> Traversal {
        Traversal::resolve(self.walker.algorithm)
    }

    /// Location of the persisted result cache, if the run keeps one
    pub fn cache_path(&self) -> Option<PathBuf> {
        match &self.walker.cache_file {
            Some(path) => Some(path.clone()),
            None if self.walker.use_default_cache => Some(default_cache_path()),
            None => None,
        }
    }

    /// Effective number of worker threads
    pub fn jobs(&self) -> usize {
        if self.walker.jobs > 0 {
            self.walker.jobs
        } else {
            num_cpus::get()
        }
    }

    /// Compile the exclude patterns
    pub fn exclude_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.files.exclude {
            let glob = Glob::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("Bad exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Bad exclude patterns: {}", e)))
    }

    /// True when `path` has one of the configured extensions
    pub fn has_target_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.files
                    .extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }

    /// Stable hash used to invalidate cached results
    pub fn hash(&self) -> String {
        crate::cache::hash_config(self)
    }
}
