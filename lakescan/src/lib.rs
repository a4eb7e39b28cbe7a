//! Scan planning for log-structured lake tables.
//!
//! A table in this format is a directory of data files plus a `_delta_log`
//! directory holding an append-only change log: numbered json commit files,
//! periodic parquet checkpoints that consolidate everything up to their own
//! version, and a `_last_checkpoint` pointer naming the most recent checkpoint.
//!
//! This crate reads that log and turns it into work for a distributed query
//! engine:
//!
//! * [`LogAccess`] lists the log, resolves [`TableSnapshot`]s, and replays
//!   add/remove actions into the set of files live at a version. Snapshots,
//!   metadata, and reconciled file sets are cached with single-flight loading
//!   so concurrent queries against the same table share one computation.
//! * [`ScanBuilder`] and [`Scan`] turn a snapshot plus a predicate into a
//!   [`scan::SplitEnumerator`], which prunes files by partition values and
//!   column statistics and hands out batches of weighted [`scan::Split`]s,
//!   optionally waiting a bounded time for a runtime
//!   [`dynamic_filter::DynamicFilter`] to narrow the predicate first.
//!
//! Storage is abstracted behind the async [`Storage`] trait;
//! [`ObjectStoreStorage`] adapts any [`object_store::ObjectStore`].

pub mod actions;
pub mod dynamic_filter;
pub mod error;
pub mod listed_log_files;
pub mod log_access;
pub(crate) mod log_reader;
pub mod log_replay;
pub mod log_segment;
pub mod path;
pub mod predicate;
pub mod scan;
pub mod snapshot;
pub mod storage;

pub use error::{Error, LakeResult};
pub use log_access::LogAccess;
pub use scan::{Scan, ScanBuilder, ScanConfig};
pub use snapshot::{TableIdentity, TableSnapshot};
pub use storage::{FileMeta, ObjectStoreStorage, Storage};

/// Position of a commit or checkpoint in the table history. The first commit
/// of a table is version zero, and every commit after it increments the
/// version by exactly one.
pub type Version = u64;
