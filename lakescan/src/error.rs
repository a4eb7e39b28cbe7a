//! Error types for log reading and scan planning.

use std::sync::Arc;

use url::Url;

use crate::Version;

/// A [`std::result::Result`] with this crate's [`Error`] as the default error type.
pub type LakeResult<T, E = Error> = std::result::Result<T, E>;

/// Anything that can go wrong while resolving snapshots or planning a scan.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A general error that cannot be usefully categorized further.
    #[error("Generic lakescan error: {0}")]
    Generic(String),

    /// An error from the underlying object store.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// A url could not be converted to an object store path.
    #[error("Object store path error: {0}")]
    ObjectStorePath(#[from] object_store::path::Error),

    /// An error raised by the parquet reader.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// A url could not be parsed or joined.
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A json document could not be parsed.
    #[error("Malformed json: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A path in the log directory does not follow the expected naming scheme.
    #[error("Invalid log path: {0}")]
    InvalidLogPath(String),

    /// A checkpoint file is missing, unreadable, or inconsistent with the log.
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// A commit file contains data that could not be parsed into log entries.
    #[error("Malformed commit file for version {version} at {location}: {message}")]
    MalformedCommit {
        version: Version,
        location: Url,
        message: String,
    },

    /// No metadata action was found in any retained log segment.
    #[error("No table metadata found in log segment")]
    MissingMetadata,

    /// No protocol action was found in any retained log segment.
    #[error("No table protocol found in log segment")]
    MissingProtocol,

    /// The table requires a reader capability version newer than this crate supports.
    #[error("Unsupported reader protocol version {0}")]
    UnsupportedReaderVersion(i32),

    /// An invariant of this crate was broken. Always a bug.
    #[error("Internal error: {0}. This is a bug in lakescan.")]
    InternalError(String),
}

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn invalid_log_path(msg: impl ToString) -> Self {
        Self::InvalidLogPath(msg.to_string())
    }

    pub fn invalid_checkpoint(msg: impl ToString) -> Self {
        Self::InvalidCheckpoint(msg.to_string())
    }

    pub fn internal_error(msg: impl ToString) -> Self {
        Self::InternalError(msg.to_string())
    }

    pub fn malformed_commit(version: Version, location: &Url, message: impl ToString) -> Self {
        Self::MalformedCommit {
            version,
            location: location.clone(),
            message: message.to_string(),
        }
    }

    /// Unwrap an error shared between concurrent cache waiters, cloning the
    /// message when another waiter still holds the original.
    pub(crate) fn from_shared(err: Arc<Error>) -> Error {
        Arc::try_unwrap(err).unwrap_or_else(|shared| Error::Generic(shared.to_string()))
    }
}

/// Return early with `$err` when `$cond` does not hold.
macro_rules! require {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err);
        }
    };
}
pub(crate) use require;
