//! Parsing of log directory file names.
//!
//! Files that participate in log replay are named by a 20 digit zero padded
//! version number followed by a type suffix, for example
//! `00000000000000000005.json` or `00000000000000000004.checkpoint.parquet`.
//! Everything else in the directory, such as the `_last_checkpoint` pointer,
//! carries no version and is ignored by replay.

use url::Url;

use crate::storage::FileMeta;
use crate::{Error, LakeResult, Version};

/// Anything that can borrow a [`Url`], so parsed log paths can wrap either a
/// bare url or a full [`FileMeta`] from a listing.
pub trait AsUrl {
    fn as_url(&self) -> &Url;
}

impl AsUrl for Url {
    fn as_url(&self) -> &Url {
        self
    }
}

impl AsUrl for FileMeta {
    fn as_url(&self) -> &Url {
        &self.location
    }
}

/// The role a versioned file plays in the log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPathFileType {
    /// An incremental commit, `<version>.json`.
    Commit,
    /// A checkpoint covering all versions up to and including its own,
    /// `<version>.checkpoint.parquet`.
    SinglePartCheckpoint,
    /// A valid version number with an unrecognized suffix. Skipped during
    /// replay so new file types do not break existing readers.
    Unknown,
}

/// A file in the log directory whose name has been split into version and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogPath<Location: AsUrl = FileMeta> {
    pub location: Location,
    pub filename: String,
    pub extension: String,
    pub version: Version,
    pub file_type: LogPathFileType,
}

impl<Location: AsUrl> ParsedLogPath<Location> {
    /// Parse a location into a versioned log path.
    ///
    /// Returns `Ok(None)` for files without a leading version number, which
    /// are legal residents of the directory but not part of the log itself.
    pub fn try_from(location: Location) -> LakeResult<Option<ParsedLogPath<Location>>> {
        let url = location.as_url();
        let filename = url
            .path_segments()
            .ok_or_else(|| {
                Error::invalid_log_path(format!("Log path must not be a base url: {url}"))
            })?
            .next_back()
            .unwrap_or("")
            .to_string();
        if filename.is_empty() {
            return Err(Error::invalid_log_path(format!(
                "Log path must not end in '/': {url}"
            )));
        }

        let mut split = filename.split('.');
        let version = match split.next().and_then(parse_path_version) {
            Some(version) => version,
            None => return Ok(None),
        };

        let parts: Vec<&str> = split.collect();
        let file_type = match parts.as_slice() {
            ["json"] => LogPathFileType::Commit,
            ["checkpoint", "parquet"] => LogPathFileType::SinglePartCheckpoint,
            _ => LogPathFileType::Unknown,
        };
        let extension = parts.last().copied().unwrap_or("").to_string();

        Ok(Some(ParsedLogPath {
            location,
            filename,
            extension,
            version,
            file_type,
        }))
    }

    pub fn is_commit(&self) -> bool {
        matches!(self.file_type, LogPathFileType::Commit)
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self.file_type, LogPathFileType::SinglePartCheckpoint)
    }
}

/// Parse the leading filename component as a 20 digit zero padded version.
fn parse_path_version(part: &str) -> Option<Version> {
    if part.len() == 20 && part.bytes().all(|b| b.is_ascii_digit()) {
        part.parse().ok()
    } else {
        None
    }
}
