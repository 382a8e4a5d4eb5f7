//! Multi-file runs
//!
//! Selects target files, runs a [`TreeWalker`] over each of them and collects
//! the diagnostics into a [`RunReport`]. In parallel mode every rayon job owns
//! its own walker and check set; the result cache is the only shared state.

use crate::cache::{file_timestamp, ResultCache};
use crate::check::Check;
use crate::config::{Config, ConfigError};
use crate::diagnostic::{keys, Diagnostic, Location, Severity};
use crate::walker::{FileOutcome, TreeWalker, WALKER_ID};
use globset::GlobSet;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Produces extra checks for every walker of a run
pub type CheckFactory = Arc<dyn Fn() -> Vec<(Box<dyn Check>, Severity)> + Send + Sync>;

/// Failure that aborts a whole run
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Result cache error: {0}")]
    Cache(#[from] std::io::Error),
}

/// Result of a run
#[derive(Debug, Default)]
pub struct RunReport {
    /// All diagnostics, setup diagnostics first
    pub diagnostics: Vec<Diagnostic>,

    /// Files analyzed
    pub files_processed: usize,

    /// Files skipped as unchanged and clean
    pub files_skipped: usize,

    /// Files with errors
    pub files_with_errors: usize,

    pub error_count: usize,

    pub warning_count: usize,

    pub info_count: usize,

    /// Processing duration
    pub duration: Duration,
}

impl RunReport {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            Severity::Info => self.info_count += 1,
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Check if result is clean (no errors or warnings)
    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.warning_count == 0
    }

    /// Get exit code (0 = success, 1 = warnings, 2 = errors)
    pub fn exit_code(&self) -> i32 {
        if self.error_count > 0 {
            2
        } else if self.warning_count > 0 {
            1
        } else {
            0
        }
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: RunReport) {
        self.diagnostics.extend(other.diagnostics);
        self.files_processed += other.files_processed;
        self.files_skipped += other.files_skipped;
        self.files_with_errors += other.files_with_errors;
        self.error_count += other.error_count;
        self.warning_count += other.warning_count;
        self.info_count += other.info_count;
    }
}

/// Runs the configured checks over sets of files
pub struct Checker {
    config: Config,
    cache: Arc<ResultCache>,
    exclude: GlobSet,
    factory: Option<CheckFactory>,
}

impl Checker {
    /// Create a checker, loading the result cache named by the configuration
    pub fn new(config: Config) -> Result<Self, CheckerError> {
        let cache = match config.cache_path() {
            Some(path) => ResultCache::load(&path, &config.hash())?,
            None => ResultCache::in_memory(),
        };
        Self::with_cache(config, Arc::new(cache))
    }

    /// Create a checker sharing an existing cache
    pub fn with_cache(config: Config, cache: Arc<ResultCache>) -> Result<Self, CheckerError> {
        let exclude = config.exclude_set()?;
        Ok(Self {
            config,
            cache,
            exclude,
            factory: None,
        })
    }

    /// Add checks beyond the configured ones
    pub fn with_checks(mut self, factory: CheckFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// True when `path` has a target extension and is not excluded
    pub fn is_target(&self, path: &Path) -> bool {
        self.config.has_target_extension(path) && !self.exclude.is_match(path)
    }

    /// Expand the include patterns under `base`
    pub fn discover(&self, base: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for pattern in &self.config.files.include {
            let full = base.join(pattern);
            let Some(full) = full.to_str() else {
                continue;
            };
            match glob::glob(full) {
                Ok(paths) => files.extend(
                    paths
                        .filter_map(Result::ok)
                        .filter(|p| p.is_file())
                        .filter(|p| {
                            let relative = p.strip_prefix(base).unwrap_or(p.as_path());
                            self.is_target(relative)
                        }),
                ),
                Err(e) => log::warn!("Invalid include pattern '{}': {}", pattern, e),
            }
        }
        files.sort();
        files.dedup();
        files
    }

    fn build_walker(&self) -> TreeWalker {
        let mut walker = TreeWalker::new(self.config.traversal());
        for spec in &self.config.checks {
            walker.add_check(Box::new(spec.build()), spec.config().severity);
        }
        if let Some(factory) = &self.factory {
            for (check, severity) in factory() {
                walker.add_check(check, severity);
            }
        }
        walker
    }

    /// Check `files`, then flush the result cache
    pub fn process(&self, files: &[PathBuf]) -> Result<RunReport, CheckerError> {
        let start = Instant::now();
        let targets: Vec<&PathBuf> = files
            .iter()
            .filter(|path| {
                let keep = self.is_target(path);
                if !keep {
                    log::debug!("Ignoring non-target file {}", path.display());
                }
                keep
            })
            .collect();

        let mut walker = self.build_walker();
        let mut report = RunReport::default();
        for diagnostic in walker.setup_diagnostics().to_vec() {
            report.push(diagnostic);
        }

        let results: Vec<RunReport> = if self.config.walker.parallel {
            log::debug!(
                "Checking {} files on {} threads ({:?} traversal)",
                targets.len(),
                self.config.jobs(),
                walker.traversal()
            );
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.jobs())
                .build()
            {
                Ok(pool) => pool.install(|| {
                    targets
                        .par_iter()
                        .map_init(
                            || self.build_walker(),
                            |worker, path| check_file(worker, &self.cache, path),
                        )
                        .collect()
                }),
                Err(e) => {
                    log::warn!("Falling back to sequential run: {}", e);
                    targets
                        .iter()
                        .map(|path| check_file(&mut walker, &self.cache, path))
                        .collect()
                }
            }
        } else {
            log::debug!(
                "Checking {} files ({:?} traversal)",
                targets.len(),
                walker.traversal()
            );
            targets
                .iter()
                .map(|path| check_file(&mut walker, &self.cache, path))
                .collect()
        };

        for result in results {
            report.merge(result);
        }
        walker.destroy();
        self.cache.save()?;

        report.duration = start.elapsed();
        log::info!(
            "Checked {} files ({} skipped): {} errors, {} warnings in {:?}",
            report.files_processed,
            report.files_skipped,
            report.error_count,
            report.warning_count,
            report.duration
        );
        Ok(report)
    }
}

fn check_file(walker: &mut TreeWalker, cache: &ResultCache, path: &Path) -> RunReport {
    let mut report = RunReport::default();
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let read = file_timestamp(&path)
        .and_then(|timestamp| std::fs::read_to_string(&path).map(|text| (timestamp, text)));
    let diagnostics = match read {
        Ok((timestamp, text)) => match walker.process_file(&path, &text, timestamp, cache) {
            FileOutcome::Skipped => {
                report.files_skipped = 1;
                return report;
            }
            FileOutcome::Checked(diagnostics) => diagnostics,
        },
        Err(e) => {
            cache.invalidate(&path.to_string_lossy());
            vec![Diagnostic::new(
                WALKER_ID,
                Severity::Error,
                keys::GENERAL_EXCEPTION,
                vec![e.to_string()],
                Location::new(path.clone(), 0, 0),
            )]
        }
    };

    report.files_processed = 1;
    for diagnostic in diagnostics {
        report.push(diagnostic);
    }
    if report.error_count > 0 {
        report.files_with_errors = 1;
    }
    report
}
