//! Batched split production over a snapshot's reconciled files.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::actions::AddFileEntry;
use crate::dynamic_filter::DynamicFilter;
use crate::log_access::LogAccess;
use crate::log_replay::ActiveFiles;
use crate::predicate::EffectivePredicate;
use crate::scan::{pruning, ScanConfig};
use crate::snapshot::TableSnapshot;
use crate::LakeResult;

/// One schedulable unit of work for the execution engine.
///
/// Splits currently cover whole files; the byte range is carried so readers
/// do not need to assume that.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Absolute location of the data file.
    pub path: Url,
    /// First byte of the range.
    pub start: u64,
    /// Length of the range in bytes.
    pub length: u64,
    pub file_size: u64,
    pub modification_time: i64,
    /// Canonical partition values of the file.
    pub partition_values: HashMap<String, Option<String>>,
    /// Relative scheduling cost in `(0, 1]`.
    pub weight: f64,
}

/// The result of one [`SplitEnumerator::get_next_batch`] call.
///
/// An empty batch with `no_more_splits` unset means the enumerator was not
/// ready to produce yet and the caller should ask again.
#[derive(Debug, Clone)]
pub struct SplitBatch {
    pub splits: Vec<Split>,
    pub no_more_splits: bool,
}

impl SplitBatch {
    fn pending() -> Self {
        Self {
            splits: Vec::new(),
            no_more_splits: false,
        }
    }

    fn finished(splits: Vec<Split>) -> Self {
        Self {
            splits,
            no_more_splits: true,
        }
    }
}

/// Mutable enumeration state, held across batches.
struct EnumState {
    /// Path of the last file considered; enumeration resumes after it.
    cursor: Option<String>,
    /// Reconciled file set, resolved on the first producing batch and
    /// released once exhausted.
    files: Option<Arc<ActiveFiles>>,
    partition_columns: Vec<String>,
}

/// Pull based split source for one scan.
///
/// `get_next_batch` may suspend on log reads or on the dynamic filter gate
/// and is repeatable until a batch reports `no_more_splits`. [`close`]
/// releases the enumeration state early; a `get_next_batch` racing with it
/// may finish its work but its result is discarded by the closed check.
///
/// [`close`]: Self::close
pub struct SplitEnumerator {
    log: Arc<LogAccess>,
    snapshot: Arc<TableSnapshot>,
    predicate: EffectivePredicate,
    dynamic_filter: Option<Arc<dyn DynamicFilter>>,
    config: ScanConfig,
    /// When the dynamic filter gate stops holding batches back. Fixed at
    /// construction so slow callers cannot extend the wait.
    deadline: Instant,
    state: Mutex<EnumState>,
    closed: AtomicBool,
    finished: AtomicBool,
}

impl SplitEnumerator {
    pub(crate) fn new(
        log: Arc<LogAccess>,
        snapshot: Arc<TableSnapshot>,
        predicate: EffectivePredicate,
        dynamic_filter: Option<Arc<dyn DynamicFilter>>,
        config: ScanConfig,
    ) -> Self {
        let deadline = Instant::now() + config.dynamic_filter_timeout;
        Self {
            log,
            snapshot,
            predicate,
            dynamic_filter,
            config,
            deadline,
            state: Mutex::new(EnumState {
                cursor: None,
                files: None,
                partition_columns: Vec::new(),
            }),
            closed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Produce the next batch of at most `max_size` splits.
    ///
    /// While the dynamic filter is incomplete and its deadline has not
    /// passed, this waits for the filter instead and returns an empty
    /// pending batch when the wait resolves without completion.
    pub async fn get_next_batch(&self, max_size: usize) -> LakeResult<SplitBatch> {
        if self.is_finished() {
            return Ok(SplitBatch::finished(Vec::new()));
        }

        if let Some(filter) = &self.dynamic_filter {
            if !filter.is_complete() && filter.is_awaitable() {
                match tokio::time::timeout_at(self.deadline, filter.is_blocked()).await {
                    // Woke with new information but no final predicate yet;
                    // hand control back so the caller can decide to re-poll.
                    Ok(()) if !filter.is_complete() => return Ok(SplitBatch::pending()),
                    // Completed, or the deadline elapsed: enumerate with the
                    // predicate as it stands now.
                    Ok(()) | Err(_) => {}
                }
            }
        }
        if self.closed.load(Ordering::Acquire) {
            return Ok(SplitBatch::finished(Vec::new()));
        }

        self.enumerate(max_size).await
    }

    /// Whether enumeration is over, either exhausted or closed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.closed.load(Ordering::Acquire)
    }

    /// Stop enumeration and release held state. Idempotent, and safe to
    /// call while a `get_next_batch` is in flight.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // An in-flight batch holds the lock and drops its own state when it
        // observes the flag.
        if let Ok(mut state) = self.state.try_lock() {
            state.files = None;
        }
    }

    async fn enumerate(&self, max_size: usize) -> LakeResult<SplitBatch> {
        let effective = match &self.dynamic_filter {
            Some(filter) => self.predicate.intersect(&filter.current_predicate()),
            None => self.predicate.clone(),
        };

        let mut state = self.state.lock().await;
        if self.closed.load(Ordering::Acquire) {
            state.files = None;
            return Ok(SplitBatch::finished(Vec::new()));
        }

        // A contradictory predicate can never match a row; no point
        // resolving metadata or files for it.
        if effective.is_none() {
            state.files = None;
            self.finished.store(true, Ordering::Release);
            return Ok(SplitBatch::finished(Vec::new()));
        }

        if state.files.is_none() {
            let pair = self.log.metadata_and_protocol(&self.snapshot).await?;
            if self.closed.load(Ordering::Acquire) {
                state.files = None;
                return Ok(SplitBatch::finished(Vec::new()));
            }
            let files = self.log.active_files(&self.snapshot).await?;
            if self.closed.load(Ordering::Acquire) {
                state.files = None;
                return Ok(SplitBatch::finished(Vec::new()));
            }
            state.partition_columns = pair.0.lowercase_partition_columns();
            state.files = Some(files);
        }

        let files = state
            .files
            .clone()
            .unwrap_or_else(|| Arc::new(ActiveFiles::empty()));
        let resume_after = state.cursor.clone();
        let mut cursor = resume_after.clone();
        let mut splits = Vec::new();
        let mut exhausted = true;
        for entry in files.files_after(resume_after.as_deref()) {
            if splits.len() >= max_size {
                exhausted = false;
                break;
            }
            cursor = Some(entry.path.clone());

            let partition_values = entry.canonical_partition_values();
            if !pruning::partition_matches_predicate(
                &state.partition_columns,
                &partition_values,
                &effective,
            ) {
                continue;
            }
            let statistics = entry.statistics();
            if !pruning::file_matches_predicate(
                statistics.as_ref(),
                &state.partition_columns,
                &effective,
            ) {
                continue;
            }
            splits.push(build_split(
                self.snapshot.table_root(),
                entry,
                partition_values,
                &self.config,
            )?);
        }
        state.cursor = cursor;
        if exhausted {
            state.files = None;
            self.finished.store(true, Ordering::Release);
        }
        if self.closed.load(Ordering::Acquire) {
            state.files = None;
            return Ok(SplitBatch::finished(Vec::new()));
        }
        if exhausted {
            Ok(SplitBatch::finished(splits))
        } else {
            Ok(SplitBatch {
                splits,
                no_more_splits: false,
            })
        }
    }
}

impl std::fmt::Debug for SplitEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitEnumerator")
            .field("snapshot", &self.snapshot)
            .field("predicate", &self.predicate)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .field("finished", &self.finished.load(Ordering::Acquire))
            .finish()
    }
}

fn build_split(
    table_root: &Url,
    entry: &AddFileEntry,
    partition_values: HashMap<String, Option<String>>,
    config: &ScanConfig,
) -> LakeResult<Split> {
    let path = table_root.join(&entry.path)?;
    let size = u64::try_from(entry.size).unwrap_or(0);
    Ok(Split {
        path,
        start: 0,
        length: size,
        file_size: size,
        modification_time: entry.modification_time,
        partition_values,
        weight: split_weight(size, config),
    })
}

/// A split's scheduling cost: its share of the target split size, clamped
/// so huge files count as one full unit and tiny files never round to free.
fn split_weight(size: u64, config: &ScanConfig) -> f64 {
    (size as f64 / config.target_split_size as f64).clamp(config.min_split_weight, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: u64, min_weight: f64) -> ScanConfig {
        ScanConfig {
            target_split_size: target,
            min_split_weight: min_weight,
            ..ScanConfig::default()
        }
    }

    #[test]
    fn weight_is_proportional_within_clamp() {
        let config = config(1024, 0.05);
        assert_eq!(split_weight(512, &config), 0.5);
        assert_eq!(split_weight(1024, &config), 1.0);
        assert!((split_weight(100, &config) - 100.0 / 1024.0).abs() < 1e-9);
    }

    #[test]
    fn weight_clamps_small_and_large_files() {
        let config = config(1024, 0.05);
        assert_eq!(split_weight(0, &config), 0.05);
        assert_eq!(split_weight(10, &config), 0.05);
        assert_eq!(split_weight(2048, &config), 1.0);
    }

    #[test]
    fn split_resolves_path_against_table_root() {
        let table_root = Url::parse("memory:///warehouse/t/").unwrap();
        let entry = AddFileEntry {
            path: "part=a/data-001.parquet".to_string(),
            partition_values: HashMap::new(),
            size: 2048,
            modification_time: 7,
            data_change: true,
            stats: None,
            tags: None,
        };
        let split =
            build_split(&table_root, &entry, HashMap::new(), &config(1024, 0.05)).unwrap();
        assert_eq!(
            split.path.as_str(),
            "memory:///warehouse/t/part=a/data-001.parquet"
        );
        assert_eq!(split.start, 0);
        assert_eq!(split.length, 2048);
        assert_eq!(split.weight, 1.0);
        assert_eq!(split.modification_time, 7);
    }
}
