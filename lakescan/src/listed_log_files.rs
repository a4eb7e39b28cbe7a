//! Listing the log directory.

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::require;
use crate::path::{LogPathFileType, ParsedLogPath};
use crate::storage::Storage;
use crate::{Error, LakeResult, Version};

const LAST_CHECKPOINT_FILE_NAME: &str = "_last_checkpoint";

/// The contents of the `_last_checkpoint` pointer file.
///
/// The pointer is a hint, not a source of truth: it tells the reader where to
/// start listing so old log history does not have to be enumerated. Actual
/// checkpoint discovery still goes through the listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCheckpointHint {
    /// Version of the most recently written checkpoint.
    pub version: Version,
    /// Number of actions in that checkpoint.
    #[serde(default)]
    pub size: Option<i64>,
    /// Number of parts for multi part checkpoints, absent for single part.
    #[serde(default)]
    pub parts: Option<u32>,
}

impl LastCheckpointHint {
    /// Read the hint, resolving a missing or unparseable file to `None`.
    ///
    /// A corrupt hint only costs a longer listing, so it is logged and
    /// ignored; storage failures other than not-found are real errors.
    pub(crate) async fn try_read(
        storage: &dyn Storage,
        log_root: &Url,
    ) -> LakeResult<Option<Self>> {
        let url = log_root.join(LAST_CHECKPOINT_FILE_NAME)?;
        let bytes = match storage.read(&url).await {
            Ok(bytes) => bytes,
            Err(Error::ObjectStore(object_store::Error::NotFound { .. })) => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice(&bytes) {
            Ok(hint) => Ok(Some(hint)),
            Err(e) => {
                warn!("Failed to parse {LAST_CHECKPOINT_FILE_NAME} at {url}: {e}");
                Ok(None)
            }
        }
    }
}

/// Commit and checkpoint files discovered by listing a log directory, with
/// commits in ascending version order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedLogFiles {
    pub ascending_commit_files: Vec<ParsedLogPath>,
    pub checkpoint_part: Option<ParsedLogPath>,
}

impl ListedLogFiles {
    /// List log files with versions in `[start_version, end_version]`.
    ///
    /// Only the latest checkpoint in the range is kept; commits at or below
    /// it are dropped since its state covers them.
    pub(crate) async fn list(
        storage: &dyn Storage,
        log_root: &Url,
        start_version: Option<Version>,
        end_version: Option<Version>,
    ) -> LakeResult<Self> {
        let start_from = log_root.join(&format!("{:020}", start_version.unwrap_or(0)))?;

        let mut ascending_commit_files = Vec::new();
        let mut checkpoint_part = None;
        for file in storage.list_from(&start_from).await? {
            // unversioned files such as _last_checkpoint sort into the
            // listing but are not log files
            let Some(path) = ParsedLogPath::try_from(file)? else {
                continue;
            };
            if end_version.is_some_and(|end| path.version > end) {
                break;
            }
            match path.file_type {
                LogPathFileType::Commit => ascending_commit_files.push(path),
                LogPathFileType::SinglePartCheckpoint => {
                    ascending_commit_files.retain(|commit| commit.version > path.version);
                    checkpoint_part = Some(path);
                }
                LogPathFileType::Unknown => {
                    debug!("Ignoring unrecognized log file {}", path.filename);
                }
            }
        }
        Ok(ListedLogFiles {
            ascending_commit_files,
            checkpoint_part,
        })
    }

    /// The full load path: consult `_last_checkpoint` to bound the listing,
    /// then list.
    ///
    /// A hint that names a checkpoint the listing cannot find aborts the
    /// load. Falling back to replaying the full json history could silently
    /// produce wrong results if that history has been partially cleaned up.
    pub(crate) async fn list_with_checkpoint_hint(
        storage: &dyn Storage,
        log_root: &Url,
    ) -> LakeResult<Self> {
        match LastCheckpointHint::try_read(storage, log_root).await? {
            Some(hint) => {
                let listed = Self::list(storage, log_root, Some(hint.version), None).await?;
                require!(
                    listed.checkpoint_part.is_some(),
                    Error::invalid_checkpoint(
                        "Had a _last_checkpoint hint but didn't find any checkpoints!"
                    )
                );
                Ok(listed)
            }
            None => Self::list(storage, log_root, None, None).await,
        }
    }
}
