//! Contiguous, validated slices of the log.

use url::Url;

use crate::error::require;
use crate::listed_log_files::ListedLogFiles;
use crate::path::ParsedLogPath;
use crate::{Error, LakeResult, Version};

/// An ordered slice of the log holding everything needed to reconstruct table
/// state at `end_version`: an optional base checkpoint plus the commits after
/// it, with no gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSegment {
    pub end_version: Version,
    pub log_root: Url,
    /// Commit files in ascending version order, all newer than the
    /// checkpoint when one is present.
    pub ascending_commit_files: Vec<ParsedLogPath>,
    /// Checkpoint whose state the commits apply on top of.
    pub checkpoint_part: Option<ParsedLogPath>,
}

impl LogSegment {
    /// Validate a listing into a segment.
    ///
    /// Commits at or below the checkpoint version are dropped, the remaining
    /// commits must be contiguous and adjacent to the checkpoint, and when the
    /// caller knows which version it expects the segment must end there.
    pub(crate) fn try_new(
        listed_files: ListedLogFiles,
        log_root: Url,
        expected_end_version: Option<Version>,
    ) -> LakeResult<Self> {
        let ListedLogFiles {
            mut ascending_commit_files,
            checkpoint_part,
        } = listed_files;

        // Commit file versions must be greater than the checkpoint version
        if let Some(checkpoint) = &checkpoint_part {
            ascending_commit_files.retain(|commit| commit.version > checkpoint.version);
        }

        // Commit file versions must be contiguous
        require!(
            ascending_commit_files
                .windows(2)
                .all(|cfs| cfs[0].version + 1 == cfs[1].version),
            Error::generic(format!(
                "Expected ordered contiguous commit files, got versions {:?}",
                ascending_commit_files
                    .iter()
                    .map(|f| f.version)
                    .collect::<Vec<_>>()
            ))
        );

        if let (Some(checkpoint), Some(first_commit)) =
            (&checkpoint_part, ascending_commit_files.first())
        {
            require!(
                checkpoint.version + 1 == first_commit.version,
                Error::InvalidCheckpoint(format!(
                    "Gap between checkpoint version {} and first commit version {}",
                    checkpoint.version, first_commit.version
                ))
            );
        }

        let end_version = match (&checkpoint_part, ascending_commit_files.last()) {
            (_, Some(commit)) => commit.version,
            (Some(checkpoint), None) => checkpoint.version,
            (None, None) => return Err(Error::generic("No files in log segment")),
        };

        if let Some(expected) = expected_end_version {
            require!(
                end_version == expected,
                Error::generic(format!(
                    "LogSegment end version {end_version} not the same as the specified end version {expected}"
                ))
            );
        }

        Ok(LogSegment {
            end_version,
            log_root,
            ascending_commit_files,
            checkpoint_part,
        })
    }

    /// Version of the base checkpoint, if the segment has one.
    pub fn checkpoint_version(&self) -> Option<Version> {
        self.checkpoint_part.as_ref().map(|p| p.version)
    }

    /// Versions of the commit files in ascending order.
    pub fn commit_versions(&self) -> impl Iterator<Item = Version> + '_ {
        self.ascending_commit_files.iter().map(|p| p.version)
    }

    /// Whether replaying this segment alone reproduces the full table state:
    /// it starts from a checkpoint or from version zero.
    pub(crate) fn has_complete_history(&self) -> bool {
        self.checkpoint_part.is_some()
            || self
                .ascending_commit_files
                .first()
                .is_some_and(|f| f.version == 0)
    }
}
