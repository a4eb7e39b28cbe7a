//! Commit file decoding: one json action per line.

use bytes::Bytes;
use itertools::Itertools;
use url::Url;

use crate::actions::LogEntry;
use crate::path::{AsUrl, ParsedLogPath};
use crate::storage::Storage;
use crate::{Error, LakeResult, Version};

/// Read and parse a commit file.
pub(crate) async fn read_commit(
    storage: &dyn Storage,
    commit: &ParsedLogPath,
) -> LakeResult<Vec<LogEntry>> {
    let bytes = storage.read(commit.location.as_url()).await?;
    parse_commit(commit.version, commit.location.as_url(), &bytes)
}

/// Parse commit file contents into entries, in the order written.
///
/// A single malformed line fails the whole file. A truncated commit must
/// never contribute a partial set of actions to replay.
pub(crate) fn parse_commit(
    version: Version,
    location: &Url,
    bytes: &Bytes,
) -> LakeResult<Vec<LogEntry>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::malformed_commit(version, location, format!("not valid utf-8: {e}")))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<LogEntry>(line)
                .map_err(|e| Error::malformed_commit(version, location, e))
        })
        .try_collect()
}
