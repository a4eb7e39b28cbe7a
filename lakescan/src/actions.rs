//! Log entry types.
//!
//! Every line of a commit file and every row of a checkpoint deserializes into
//! a [`LogEntry`] carrying at most one action. Replay dispatches on the add
//! and remove actions; metadata, protocol, and commit info are surfaced
//! through their own accessors on [`crate::LogAccess`].

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use crate::error::require;
use crate::{Error, LakeResult, Version};

/// Highest reader capability version this crate understands.
pub const MAX_SUPPORTED_READER_VERSION: i32 = 3;

/// One parsed action from the log. Unrecognized action types deserialize with
/// every field `None` and are skipped.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub add: Option<AddFileEntry>,
    pub remove: Option<RemoveFileEntry>,
    pub meta_data: Option<MetadataEntry>,
    pub protocol: Option<ProtocolEntry>,
    pub commit_info: Option<CommitInfoRecord>,
}

/// An `add` action: a data file joined the table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFileEntry {
    /// Path relative to the table root. The stable key for reconciliation.
    pub path: String,
    /// Partition values as written, original case, `null` for null values.
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    pub modification_time: i64,
    #[serde(default)]
    pub data_change: bool,
    /// Per file statistics as a raw json document, absent when the writer did
    /// not collect any.
    #[serde(default)]
    pub stats: Option<String>,
    #[serde(default)]
    pub tags: Option<HashMap<String, Option<String>>>,
}

impl AddFileEntry {
    /// Partition values with lower cased column names, and the empty string
    /// mapped to null the way hive style writers record null partitions.
    /// Values themselves keep their original case.
    pub fn canonical_partition_values(&self) -> HashMap<String, Option<String>> {
        self.partition_values
            .iter()
            .map(|(column, value)| {
                let value = match value {
                    Some(v) if v.is_empty() => None,
                    other => other.clone(),
                };
                (column.to_lowercase(), value)
            })
            .collect()
    }

    /// Parse the raw statistics document. Statistics are best effort: a
    /// malformed document is dropped with a warning instead of failing the
    /// scan, which at worst costs pruning opportunities.
    pub fn statistics(&self) -> Option<FileStatistics> {
        let raw = self.stats.as_deref()?;
        match serde_json::from_str::<RawFileStatistics>(raw) {
            Ok(parsed) => Some(parsed.canonicalize()),
            Err(e) => {
                warn!("Ignoring malformed statistics for file {}: {e}", self.path);
                None
            }
        }
    }
}

fn default_true() -> bool {
    true
}

/// A `remove` action: a data file left the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFileEntry {
    pub path: String,
    #[serde(default)]
    pub deletion_timestamp: Option<i64>,
    #[serde(default = "default_true")]
    pub data_change: bool,
}

/// A `metaData` action describing the table itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    /// Unique id for this metadata revision.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub schema_string: String,
    /// Partition column names in their original case.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, Option<String>>,
    #[serde(default)]
    pub created_time: Option<i64>,
}

impl MetadataEntry {
    /// Partition column names lower cased. Partition lookups are case
    /// insensitive, so pruning always works on this projection.
    pub fn lowercase_partition_columns(&self) -> Vec<String> {
        self.partition_columns
            .iter()
            .map(|c| c.to_lowercase())
            .collect()
    }
}

/// Storage format of the table's data files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    pub provider: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".to_string(),
            options: HashMap::new(),
        }
    }
}

/// A `protocol` action declaring the capability versions required to use the
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEntry {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    #[serde(default)]
    pub reader_features: Option<Vec<String>>,
    #[serde(default)]
    pub writer_features: Option<Vec<String>>,
}

impl ProtocolEntry {
    /// Fail if the table demands reader capabilities this crate lacks.
    pub fn ensure_read_supported(&self) -> LakeResult<()> {
        require!(
            self.min_reader_version <= MAX_SUPPORTED_READER_VERSION,
            Error::UnsupportedReaderVersion(self.min_reader_version)
        );
        Ok(())
    }
}

/// A `commitInfo` action as written. The version of the commit that carried
/// it is not part of the record; see [`CommitInfoEntry`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfoRecord {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub operation_parameters: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub notebook: Option<NotebookInfo>,
    /// The log version the writer based its commit on.
    #[serde(default)]
    pub read_version: Option<i64>,
    #[serde(default)]
    pub isolation_level: Option<String>,
    /// True when the commit only appended data without replacing anything.
    #[serde(default)]
    pub is_blind_append: Option<bool>,
}

/// Identity of the notebook a commit was issued from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookInfo {
    #[serde(default)]
    pub notebook_id: Option<String>,
}

/// A commit info record stamped with the version of the commit file that
/// carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfoEntry {
    pub version: Version,
    pub info: CommitInfoRecord,
}

/// Canonicalized per file statistics.
///
/// Column keys are lower cased. Bounds keep the json scalar the writer
/// recorded; they are decoded against the type of the predicate domain that
/// consults them, since the log carries no schema for statistics. The
/// null count map distinguishes wholly absent from present, which the pruning
/// decision table depends on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileStatistics {
    pub record_count: Option<i64>,
    pub min_values: HashMap<String, serde_json::Value>,
    pub max_values: HashMap<String, serde_json::Value>,
    pub null_counts: Option<HashMap<String, i64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileStatistics {
    #[serde(default)]
    num_records: Option<i64>,
    #[serde(default)]
    min_values: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    max_values: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    null_count: Option<HashMap<String, serde_json::Value>>,
}

impl RawFileStatistics {
    fn canonicalize(self) -> FileStatistics {
        FileStatistics {
            record_count: self.num_records,
            min_values: lowercase_keys(self.min_values),
            max_values: lowercase_keys(self.max_values),
            null_counts: self.null_count.map(|counts| {
                counts
                    .into_iter()
                    .filter_map(|(column, count)| {
                        count.as_i64().map(|c| (column.to_lowercase(), c))
                    })
                    .collect()
            }),
        }
    }
}

fn lowercase_keys(
    values: Option<HashMap<String, serde_json::Value>>,
) -> HashMap<String, serde_json::Value> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|(column, value)| (column.to_lowercase(), value))
        .collect()
}
