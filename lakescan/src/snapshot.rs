//! Immutable views of a table at a fixed version.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::log_segment::LogSegment;
use crate::scan::ScanBuilder;
use crate::{LakeResult, Version};

const LOG_DIR_NAME: &str = "_delta_log/";

/// Identifies a table independent of where it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentity {
    pub namespace: String,
    pub name: String,
}

impl TableIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// A consistent view of one table at one version.
///
/// Snapshots are cheap handles: they record which log files define the state
/// but hold none of the replayed contents. Two snapshots of the same table at
/// the same version are interchangeable, and a snapshot never changes once
/// constructed; advancing to a newer version always produces a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    table: TableIdentity,
    table_root: Url,
    log_segment: LogSegment,
    version: Version,
}

impl TableSnapshot {
    pub(crate) fn new(table: TableIdentity, table_root: Url, log_segment: LogSegment) -> Self {
        let version = log_segment.end_version;
        Self {
            table,
            table_root,
            log_segment,
            version,
        }
    }

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    /// The version of the table this snapshot reflects.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn table_root(&self) -> &Url {
        &self.table_root
    }

    pub fn log_segment(&self) -> &LogSegment {
        &self.log_segment
    }

    /// Start building a scan of this snapshot.
    pub fn scan_builder(self: &Arc<Self>) -> ScanBuilder {
        ScanBuilder::new(self.clone())
    }
}

/// The url of the log directory under a table root.
pub(crate) fn log_root(table_root: &Url) -> LakeResult<Url> {
    let mut root = table_root.clone();
    if !root.path().ends_with('/') {
        root.set_path(&format!("{}/", root.path()));
    }
    Ok(root.join(LOG_DIR_NAME)?)
}
