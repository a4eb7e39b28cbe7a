//! Cached access to table logs.
//!
//! [`LogAccess`] is the shared entry point queries go through to resolve
//! snapshots and replayed state. It holds three caches, all keyed so entries
//! are immutable once computed:
//!
//! * snapshots by table identity, so repeat loads only list the log tail,
//! * metadata/protocol pairs by `(table, version)`,
//! * reconciled active file sets by `(table, version)`.
//!
//! Loads are single-flight per key: concurrent requesters share one
//! computation and see the same result, and a failed computation leaves no
//! entry behind. Entries expire after the configured time to live; a zero
//! time to live disables caching, forcing recomputation on every call.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use moka::future::Cache;
use tracing::debug;
use url::Url;

use crate::actions::{CommitInfoEntry, LogEntry, MetadataEntry, ProtocolEntry, RemoveFileEntry};
use crate::error::require;
use crate::listed_log_files::ListedLogFiles;
use crate::log_reader::{checkpoint, commit};
use crate::log_replay::ActiveFiles;
use crate::log_segment::LogSegment;
use crate::snapshot::{log_root, TableIdentity, TableSnapshot};
use crate::storage::Storage;
use crate::{Error, LakeResult, Version};

/// Shared, cached view over every table's log.
pub struct LogAccess {
    storage: Arc<dyn Storage>,
    cache_disabled: bool,
    snapshots: Cache<TableIdentity, Arc<TableSnapshot>>,
    pairs: Cache<(TableIdentity, Version), Arc<(MetadataEntry, ProtocolEntry)>>,
    active_files: Cache<(TableIdentity, Version), Arc<ActiveFiles>>,
}

impl LogAccess {
    /// Create a log access layer whose cache entries live for `cache_ttl`.
    /// A zero duration disables caching.
    pub fn new(storage: Arc<dyn Storage>, cache_ttl: Duration) -> Self {
        Self {
            storage,
            cache_disabled: cache_ttl.is_zero(),
            snapshots: new_cache(cache_ttl),
            pairs: new_cache(cache_ttl),
            active_files: new_cache(cache_ttl),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Drop every cached entry unconditionally.
    pub fn flush_cache(&self) {
        self.snapshots.invalidate_all();
        self.pairs.invalidate_all();
        self.active_files.invalidate_all();
    }

    /// Resolve the latest snapshot of a table.
    ///
    /// With a cached snapshot in hand this only lists the log tail after its
    /// checkpoint and returns the same snapshot when nothing new appeared.
    /// Without one it reads the `_last_checkpoint` hint and lists from there.
    /// Neither path reads the contents of any commit or checkpoint.
    pub async fn load_snapshot(
        &self,
        table: &TableIdentity,
        table_root: &Url,
    ) -> LakeResult<Arc<TableSnapshot>> {
        if self.cache_disabled {
            return self.load_snapshot_uncached(table, table_root).await;
        }
        if let Some(cached) = self.snapshots.get(table).await {
            let advanced = self.advance_snapshot(cached).await?;
            self.snapshots.insert(table.clone(), advanced.clone()).await;
            return Ok(advanced);
        }
        let entry = self
            .snapshots
            .entry_by_ref(table)
            .or_try_insert_with(self.load_snapshot_uncached(table, table_root))
            .await
            .map_err(Error::from_shared)?;
        Ok(entry.into_value())
    }

    async fn load_snapshot_uncached(
        &self,
        table: &TableIdentity,
        table_root: &Url,
    ) -> LakeResult<Arc<TableSnapshot>> {
        let log_root = log_root(table_root)?;
        let listed = ListedLogFiles::list_with_checkpoint_hint(self.storage.as_ref(), &log_root)
            .await?;
        let segment = LogSegment::try_new(listed, log_root, None)?;
        let oldest = segment
            .ascending_commit_files
            .first()
            .map_or(segment.end_version, |commit| commit.version);
        require!(
            segment.has_complete_history(),
            Error::generic(format!(
                "Cannot reconstruct state of table {table}: log starts at version {oldest} with no checkpoint"
            ))
        );
        Ok(Arc::new(TableSnapshot::new(
            table.clone(),
            table_root.clone(),
            segment,
        )))
    }

    /// Check the log for segments newer than `old` and fold them in.
    async fn advance_snapshot(
        &self,
        old: Arc<TableSnapshot>,
    ) -> LakeResult<Arc<TableSnapshot>> {
        let old_segment = old.log_segment();
        let log_root = old_segment.log_root.clone();
        let old_version = old.version();

        // List after the checkpoint the old snapshot is anchored on, so both
        // new commits and a newer checkpoint are discovered in one pass.
        let listing_start = old_segment.checkpoint_version().unwrap_or(0) + 1;
        let mut listed = ListedLogFiles::list(
            self.storage.as_ref(),
            &log_root,
            Some(listing_start),
            None,
        )
        .await?;

        if listed.ascending_commit_files.is_empty() && listed.checkpoint_part.is_none() {
            return Ok(old);
        }

        // Any checkpoint in this listing is newer than the old anchor, so the
        // snapshot rebases onto it instead of growing the commit tail.
        if listed.checkpoint_part.is_some() {
            let segment = LogSegment::try_new(listed, log_root, None)?;
            let new_end = segment.end_version;
            debug!(
                "Rebasing snapshot of {} from version {old_version} onto newer checkpoint, new end {new_end}",
                old.table()
            );
            require!(
                old_version <= new_end,
                Error::generic(format!(
                    "Unexpected state: The newest version in the log {new_end} is older than the old version {old_version}"
                ))
            );
            return Ok(Arc::new(TableSnapshot::new(
                old.table().clone(),
                old.table_root().clone(),
                segment,
            )));
        }

        listed
            .ascending_commit_files
            .retain(|commit| old_version < commit.version);
        if listed.ascending_commit_files.is_empty() {
            return Ok(old);
        }

        let combined = ListedLogFiles {
            ascending_commit_files: old_segment
                .ascending_commit_files
                .iter()
                .cloned()
                .chain(listed.ascending_commit_files)
                .collect(),
            checkpoint_part: old_segment.checkpoint_part.clone(),
        };
        let segment = LogSegment::try_new(combined, log_root, None)?;
        Ok(Arc::new(TableSnapshot::new(
            old.table().clone(),
            old.table_root().clone(),
            segment,
        )))
    }

    /// The metadata and protocol in force at `snapshot`.
    ///
    /// Commits are scanned newest first so the most recent actions win; the
    /// checkpoint is only consulted when no commit in the segment carries
    /// them. Fails when either is missing or the protocol demands reader
    /// capabilities this crate lacks.
    pub async fn metadata_and_protocol(
        &self,
        snapshot: &TableSnapshot,
    ) -> LakeResult<Arc<(MetadataEntry, ProtocolEntry)>> {
        if self.cache_disabled {
            return self.resolve_metadata_and_protocol(snapshot).await;
        }
        let key = (snapshot.table().clone(), snapshot.version());
        let entry = self
            .pairs
            .entry_by_ref(&key)
            .or_try_insert_with(self.resolve_metadata_and_protocol(snapshot))
            .await
            .map_err(Error::from_shared)?;
        Ok(entry.into_value())
    }

    async fn resolve_metadata_and_protocol(
        &self,
        snapshot: &TableSnapshot,
    ) -> LakeResult<Arc<(MetadataEntry, ProtocolEntry)>> {
        let segment = snapshot.log_segment();
        let mut metadata: Option<MetadataEntry> = None;
        let mut protocol: Option<ProtocolEntry> = None;

        for file in segment.ascending_commit_files.iter().rev() {
            if metadata.is_some() && protocol.is_some() {
                break;
            }
            let entries = commit::read_commit(self.storage.as_ref(), file).await?;
            take_newest(&entries, &mut metadata, &mut protocol);
        }

        if metadata.is_none() || protocol.is_none() {
            if let Some(file) = &segment.checkpoint_part {
                let entries = checkpoint::read_checkpoint(self.storage.as_ref(), file).await?;
                take_newest(&entries, &mut metadata, &mut protocol);
            }
        }

        let metadata = metadata.ok_or(Error::MissingMetadata)?;
        let protocol = protocol.ok_or(Error::MissingProtocol)?;
        protocol.ensure_read_supported()?;
        Ok(Arc::new((metadata, protocol)))
    }

    /// The reconciled set of files live at `snapshot`.
    ///
    /// Replays from the newest cached state at or below the snapshot version
    /// when one exists, reading only the commits after it. The checkpoint is
    /// parsed at most once per version: any cached state at or above its
    /// version supersedes it.
    pub async fn active_files(
        &self,
        snapshot: &TableSnapshot,
    ) -> LakeResult<Arc<ActiveFiles>> {
        if self.cache_disabled {
            return self.compute_active_files(snapshot).await;
        }
        let key = (snapshot.table().clone(), snapshot.version());
        let entry = self
            .active_files
            .entry_by_ref(&key)
            .or_try_insert_with(self.compute_active_files(snapshot))
            .await
            .map_err(Error::from_shared)?;
        Ok(entry.into_value())
    }

    async fn compute_active_files(
        &self,
        snapshot: &TableSnapshot,
    ) -> LakeResult<Arc<ActiveFiles>> {
        let segment = snapshot.log_segment();
        let table = snapshot.table();

        // Newest cached state below this version that the segment can extend.
        let mut base: Option<Arc<ActiveFiles>> = None;
        if !self.cache_disabled {
            let mut candidates: Vec<Version> = segment
                .commit_versions()
                .filter(|v| *v < snapshot.version())
                .collect();
            if let Some(cp) = segment.checkpoint_version() {
                if cp < snapshot.version() {
                    candidates.push(cp);
                }
            }
            candidates.sort_unstable();
            for version in candidates.iter().rev() {
                if let Some(state) = self.active_files.get(&(table.clone(), *version)).await {
                    base = Some(state);
                    break;
                }
            }
        }

        let (mut state, replay_after) = match base {
            Some(cached) => {
                let after = cached.version();
                debug!("Replaying {table} from cached state at version {after}");
                (cached.as_ref().clone(), Some(after))
            }
            None => match &segment.checkpoint_part {
                Some(file) => {
                    let entries =
                        checkpoint::read_checkpoint(self.storage.as_ref(), file).await?;
                    (
                        ActiveFiles::from_entries(file.version, &entries),
                        Some(file.version),
                    )
                }
                None => (ActiveFiles::empty(), None),
            },
        };

        for file in &segment.ascending_commit_files {
            if replay_after.is_some_and(|after| file.version <= after) {
                continue;
            }
            let entries = commit::read_commit(self.storage.as_ref(), file).await?;
            state.apply_in_place(file.version, &entries);
        }
        Ok(Arc::new(state))
    }

    /// Stream every remove action in the snapshot's range, including the
    /// retention tombstones carried by the checkpoint.
    ///
    /// The stream reads files only as it is polled and is single pass; each
    /// caller must obtain its own and drop it to release the underlying
    /// storage access.
    pub fn remove_entries(
        &self,
        snapshot: &TableSnapshot,
    ) -> BoxStream<'static, LakeResult<RemoveFileEntry>> {
        let storage = self.storage.clone();
        let segment = snapshot.log_segment();
        let files: Vec<_> = segment
            .checkpoint_part
            .clone()
            .into_iter()
            .map(|f| (f, true))
            .chain(
                segment
                    .ascending_commit_files
                    .iter()
                    .cloned()
                    .map(|f| (f, false)),
            )
            .collect();

        stream::iter(files)
            .then(move |(file, is_checkpoint)| {
                let storage = storage.clone();
                async move {
                    let entries = if is_checkpoint {
                        checkpoint::read_checkpoint(storage.as_ref(), &file).await?
                    } else {
                        commit::read_commit(storage.as_ref(), &file).await?
                    };
                    Ok::<_, Error>(
                        entries
                            .into_iter()
                            .filter_map(|e| e.remove)
                            .collect::<Vec<_>>(),
                    )
                }
            })
            .map_ok(|removes| stream::iter(removes.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Stream every commit info record in the snapshot's range, stamped with
    /// the version of the commit that carried it. Same laziness and single
    /// pass contract as [`remove_entries`](Self::remove_entries).
    pub fn commit_info_entries(
        &self,
        snapshot: &TableSnapshot,
    ) -> BoxStream<'static, LakeResult<CommitInfoEntry>> {
        let storage = self.storage.clone();
        let commits = snapshot.log_segment().ascending_commit_files.clone();

        stream::iter(commits)
            .then(move |file| {
                let storage = storage.clone();
                async move {
                    let version = file.version;
                    let entries = commit::read_commit(storage.as_ref(), &file).await?;
                    Ok::<_, Error>(
                        entries
                            .into_iter()
                            .filter_map(|e| e.commit_info)
                            .map(|info| CommitInfoEntry { version, info })
                            .collect::<Vec<_>>(),
                    )
                }
            })
            .map_ok(|infos| stream::iter(infos.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

/// Record the newest metadata and protocol actions in a file, given entries
/// in written order. Later entries in the same file win.
fn take_newest(
    entries: &[LogEntry],
    metadata: &mut Option<MetadataEntry>,
    protocol: &mut Option<ProtocolEntry>,
) {
    for entry in entries.iter().rev() {
        if metadata.is_none() {
            if let Some(m) = &entry.meta_data {
                *metadata = Some(m.clone());
            }
        }
        if protocol.is_none() {
            if let Some(p) = &entry.protocol {
                *protocol = Some(p.clone());
            }
        }
    }
}

/// A time-to-live cache. A zero duration yields an inert cache that callers
/// bypass entirely, so every load recomputes.
fn new_cache<K, V>(ttl: Duration) -> Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    if ttl.is_zero() {
        Cache::new(0)
    } else {
        Cache::builder().time_to_live(ttl).build()
    }
}
