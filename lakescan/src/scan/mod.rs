//! Scan planning over a resolved snapshot.
//!
//! A [`Scan`] is built from a snapshot plus an optional pushed-down
//! predicate and dynamic filter, then turned into a [`SplitEnumerator`]
//! that yields batches of splits with pruned files already removed.

use std::sync::Arc;
use std::time::Duration;

use crate::dynamic_filter::DynamicFilter;
use crate::error::require;
use crate::log_access::LogAccess;
use crate::predicate::EffectivePredicate;
use crate::snapshot::TableSnapshot;
use crate::{Error, LakeResult};

pub(crate) mod pruning;
mod split;

pub use split::{Split, SplitBatch, SplitEnumerator};

/// Tuning knobs for split generation.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Nominal split size in bytes; a file's weight is its size relative to
    /// this.
    pub target_split_size: u64,
    /// Floor applied to split weights so tiny files still cost something
    /// when balancing work across readers.
    pub min_split_weight: f64,
    /// How long enumeration may hold back waiting for a dynamic filter to
    /// complete. Zero means splits are produced immediately.
    pub dynamic_filter_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_split_size: 128 * 1024 * 1024,
            min_split_weight: 0.05,
            dynamic_filter_timeout: Duration::ZERO,
        }
    }
}

/// Builder to scan a snapshot of a table.
pub struct ScanBuilder {
    snapshot: Arc<TableSnapshot>,
    predicate: EffectivePredicate,
    dynamic_filter: Option<Arc<dyn DynamicFilter>>,
    config: ScanConfig,
}

impl std::fmt::Debug for ScanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanBuilder")
            .field("snapshot", &self.snapshot)
            .field("predicate", &self.predicate)
            .field("config", &self.config)
            .finish()
    }
}

impl ScanBuilder {
    pub fn new(snapshot: impl Into<Arc<TableSnapshot>>) -> Self {
        Self {
            snapshot: snapshot.into(),
            predicate: EffectivePredicate::all(),
            dynamic_filter: None,
            config: ScanConfig::default(),
        }
    }

    /// Predicate to prune files with. Files whose partition values or
    /// statistics prove no row can match are dropped from the scan; files
    /// that survive may still contain non-matching rows.
    pub fn with_predicate(mut self, predicate: EffectivePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// A filter that may keep narrowing while enumeration runs. Its domains
    /// are intersected with the static predicate on every batch.
    pub fn with_dynamic_filter(mut self, filter: Arc<dyn DynamicFilter>) -> Self {
        self.dynamic_filter = Some(filter);
        self
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> LakeResult<Scan> {
        require!(
            self.config.target_split_size > 0,
            Error::generic("Target split size must be positive")
        );
        require!(
            self.config.min_split_weight > 0.0 && self.config.min_split_weight <= 1.0,
            Error::generic(format!(
                "Minimum split weight must be in (0, 1], got {}",
                self.config.min_split_weight
            ))
        );
        Ok(Scan {
            snapshot: self.snapshot,
            predicate: self.predicate,
            dynamic_filter: self.dynamic_filter,
            config: self.config,
        })
    }
}

/// A validated scan plan. Immutable; enumeration state lives in the
/// [`SplitEnumerator`] it hands out.
#[derive(Clone)]
pub struct Scan {
    snapshot: Arc<TableSnapshot>,
    predicate: EffectivePredicate,
    dynamic_filter: Option<Arc<dyn DynamicFilter>>,
    config: ScanConfig,
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("snapshot", &self.snapshot)
            .field("predicate", &self.predicate)
            .field("config", &self.config)
            .finish()
    }
}

impl Scan {
    pub fn snapshot(&self) -> &Arc<TableSnapshot> {
        &self.snapshot
    }

    pub fn predicate(&self) -> &EffectivePredicate {
        &self.predicate
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Begin enumerating splits through `log`.
    pub fn split_enumerator(&self, log: Arc<LogAccess>) -> SplitEnumerator {
        SplitEnumerator::new(
            log,
            self.snapshot.clone(),
            self.predicate.clone(),
            self.dynamic_filter.clone(),
            self.config.clone(),
        )
    }
}
