//! Storage access used to list and read log files.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use itertools::Itertools;
use object_store::path::Path;
use object_store::ObjectStore;
use url::Url;

use crate::{Error, LakeResult};

/// Metadata of a file returned from a storage listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// The fully qualified path to the object
    pub location: Url,
    /// The last modified time as milliseconds since unix epoch
    pub last_modified: i64,
    /// The size in bytes of the object
    pub size: u64,
}

impl FileMeta {
    pub fn new(location: Url, last_modified: i64, size: u64) -> Self {
        Self {
            location,
            last_modified,
            size,
        }
    }
}

// Listings are ordered by location, the only component a name-ordered log
// directory sorts on.
impl Ord for FileMeta {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location.cmp(&other.location)
    }
}

impl PartialOrd for FileMeta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read access to the object store holding a table.
///
/// Implementations must be cheap to share across concurrent snapshot loads;
/// all methods take `&self`.
#[async_trait::async_trait]
pub trait Storage: Send + Sync + Debug {
    /// List files in the same directory as `start` whose names sort strictly
    /// after it, in ascending name order. Callers list a version range by
    /// passing the bare zero padded version, which sorts just before every
    /// file of that version.
    async fn list_from(&self, start: &Url) -> LakeResult<Vec<FileMeta>>;

    /// Read the full contents of a file.
    async fn read(&self, location: &Url) -> LakeResult<Bytes>;

    /// The size of a file in bytes.
    async fn file_size(&self, location: &Url) -> LakeResult<u64>;
}

/// [`Storage`] backed by any [`ObjectStore`] implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreStorage {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { inner: store }
    }

    fn object_path(url: &Url) -> LakeResult<Path> {
        Ok(Path::from_url_path(url.path())?)
    }
}

#[async_trait::async_trait]
impl Storage for ObjectStoreStorage {
    async fn list_from(&self, start: &Url) -> LakeResult<Vec<FileMeta>> {
        // The offset is used for list-after; the prefix restricts the listing
        // to the containing directory. `Path` strips trailing slashes, so the
        // raw url decides whether `start` is itself a directory.
        let offset = Path::from_url_path(start.path())?;
        let prefix = if start.path().ends_with('/') {
            offset.clone()
        } else {
            let mut parts = offset.parts().collect_vec();
            if parts.pop().is_none() {
                return Err(Error::Generic(format!(
                    "Listing offset must not be a root directory. Got: '{start}'"
                )));
            }
            Path::from_iter(parts)
        };

        let mut files: Vec<FileMeta> = self
            .inner
            .list_with_offset(Some(&prefix), &offset)
            .map(|meta| -> LakeResult<FileMeta> {
                let meta = meta?;
                let mut location = start.clone();
                location.set_path(&format!("/{}", meta.location.as_ref()));
                Ok(FileMeta {
                    location,
                    last_modified: meta.last_modified.timestamp_millis(),
                    size: meta.size,
                })
            })
            .try_collect()
            .await?;

        // Cloud stores return lexicographically ordered listings but the local
        // filesystem does not; sort so the contract holds for every backend.
        files.sort_unstable();
        Ok(files)
    }

    async fn read(&self, location: &Url) -> LakeResult<Bytes> {
        let path = Self::object_path(location)?;
        Ok(self.inner.get(&path).await?.bytes().await?)
    }

    async fn file_size(&self, location: &Url) -> LakeResult<u64> {
        let path = Self::object_path(location)?;
        Ok(self.inner.head(&path).await?.size)
    }
}
