//! End to end tests for log listing, snapshot resolution, caching, and
//! replay, asserting exactly which storage operations each path performs.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use url::Url;

use lakescan::{Error, LogAccess, TableIdentity};
use test_utils::{
    actions_to_string, add_action, add_commit, commit_info_action, metadata_action,
    protocol_action, remove_action, tracking_in_memory, write_checkpoint,
    write_last_checkpoint_hint, PanickingStorage, StorageOp, TrackingStorage,
};

const CACHE_TTL: Duration = Duration::from_secs(600);

fn table() -> TableIdentity {
    TableIdentity::new("sales", "orders")
}

fn table_root() -> Url {
    Url::parse("memory:///").unwrap()
}

fn access_over(storage: &Arc<TrackingStorage>) -> LogAccess {
    LogAccess::new(storage.clone(), CACHE_TTL)
}

fn commit_path(version: u64) -> String {
    format!("/_delta_log/{version:020}.json")
}

/// Three commits, no checkpoint. Active files at version 2 are f1 and f2.
async fn seed_plain_table(store: &InMemory) -> Result<(), Box<dyn std::error::Error>> {
    add_commit(
        store,
        0,
        actions_to_string(&[
            metadata_action(&[]),
            protocol_action(1, 2),
            add_action("f0.parquet", 100, &[], None),
        ]),
    )
    .await?;
    add_commit(
        store,
        1,
        actions_to_string(&[add_action("f1.parquet", 200, &[], None)]),
    )
    .await?;
    add_commit(
        store,
        2,
        actions_to_string(&[
            remove_action("f0.parquet"),
            add_action("f2.parquet", 300, &[], None),
        ]),
    )
    .await?;
    Ok(())
}

/// A checkpoint at version 1 with a hint, then two more commits. The file
/// removed before the checkpoint comes back at version 2.
async fn seed_checkpointed_table(store: &InMemory) -> Result<(), Box<dyn std::error::Error>> {
    add_commit(
        store,
        0,
        actions_to_string(&[
            metadata_action(&["region"]),
            protocol_action(1, 2),
            add_action("f0.parquet", 100, &[("region", Some("west"))], None),
        ]),
    )
    .await?;
    add_commit(
        store,
        1,
        actions_to_string(&[
            remove_action("f0.parquet"),
            add_action("f1.parquet", 200, &[("region", Some("east"))], None),
        ]),
    )
    .await?;
    write_checkpoint(
        store,
        1,
        &[
            metadata_action(&["region"]),
            protocol_action(1, 2),
            add_action("f1.parquet", 200, &[("region", Some("east"))], None),
            remove_action("f0.parquet"),
        ],
    )
    .await?;
    write_last_checkpoint_hint(store, 1).await?;
    add_commit(
        store,
        2,
        actions_to_string(&[add_action("f0.parquet", 150, &[("region", Some("west"))], None)]),
    )
    .await?;
    add_commit(
        store,
        3,
        actions_to_string(&[add_action("f3.parquet", 50, &[("region", Some("east"))], None)]),
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn snapshot_load_lists_without_reading_commits() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    assert_eq!(snapshot.version(), 2);
    assert_eq!(snapshot.table_root(), &table_root());
    assert_eq!(
        storage.operations(),
        vec![
            StorageOp::Read("/_delta_log/_last_checkpoint".to_string()),
            StorageOp::List("/_delta_log/00000000000000000000".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn version_keyed_lookups_are_cached() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let pair = access.metadata_and_protocol(&snapshot).await?;
    let files = access.active_files(&snapshot).await?;
    assert_eq!(files.paths(), vec!["f1.parquet", "f2.parquet"]);

    storage.clear_operations();
    let pair_again = access.metadata_and_protocol(&snapshot).await?;
    let files_again = access.active_files(&snapshot).await?;
    assert!(Arc::ptr_eq(&pair, &pair_again));
    assert!(Arc::ptr_eq(&files, &files_again));
    assert!(storage.operations().is_empty());
    Ok(())
}

#[tokio::test]
async fn unchanged_log_reuses_the_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);

    let first = access.load_snapshot(&table(), &table_root()).await?;
    storage.clear_operations();
    let second = access.load_snapshot(&table(), &table_root()).await?;
    assert!(Arc::ptr_eq(&first, &second));
    // freshness is a single listing after the (absent) checkpoint
    assert_eq!(
        storage.operations(),
        vec![StorageOp::List(
            "/_delta_log/00000000000000000001".to_string()
        )]
    );
    Ok(())
}

#[tokio::test]
async fn advancing_reads_only_the_new_tail() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    access.active_files(&snapshot).await?;

    add_commit(
        store.as_ref(),
        3,
        actions_to_string(&[add_action("f3.parquet", 400, &[], None)]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        4,
        actions_to_string(&[remove_action("f1.parquet")]),
    )
    .await?;

    storage.clear_operations();
    let advanced = access.load_snapshot(&table(), &table_root()).await?;
    assert_eq!(advanced.version(), 4);
    let files = access.active_files(&advanced).await?;
    assert_eq!(files.paths(), vec!["f2.parquet", "f3.parquet"]);

    // one listing for the tail, then only the two new commits are read; the
    // replay resumes from the cached version 2 state
    assert_eq!(
        storage.operations(),
        vec![
            StorageOp::List("/_delta_log/00000000000000000001".to_string()),
            StorageOp::Read(commit_path(3)),
            StorageOp::Read(commit_path(4)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn checkpoint_base_with_later_resurrection() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_checkpointed_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    assert_eq!(snapshot.version(), 3);

    let files = access.active_files(&snapshot).await?;
    assert_eq!(files.paths(), vec!["f0.parquet", "f1.parquet", "f3.parquet"]);
    // the re-added file carries its new size, not the pre-checkpoint one, and
    // the checkpoint's remove row did not suppress it
    assert_eq!(files.get("f0.parquet").unwrap().size, 150);

    assert_eq!(
        storage.operations(),
        vec![
            StorageOp::Read("/_delta_log/_last_checkpoint".to_string()),
            StorageOp::List("/_delta_log/00000000000000000001".to_string()),
            StorageOp::Read("/_delta_log/00000000000000000001.checkpoint.parquet".to_string()),
            StorageOp::Read(commit_path(2)),
            StorageOp::Read(commit_path(3)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn checkpoint_is_parsed_at_most_once() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_checkpointed_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    access.active_files(&snapshot).await?;

    add_commit(
        store.as_ref(),
        4,
        actions_to_string(&[add_action("f4.parquet", 75, &[("region", Some("west"))], None)]),
    )
    .await?;
    storage.clear_operations();

    let advanced = access.load_snapshot(&table(), &table_root()).await?;
    assert_eq!(advanced.version(), 4);
    let files = access.active_files(&advanced).await?;
    assert_eq!(
        files.paths(),
        vec!["f0.parquet", "f1.parquet", "f3.parquet", "f4.parquet"]
    );

    // the cached version 3 state supersedes the checkpoint as replay base
    assert_eq!(
        storage.operations(),
        vec![
            StorageOp::List("/_delta_log/00000000000000000002".to_string()),
            StorageOp::Read(commit_path(4)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn old_snapshot_stays_consistent_after_advance() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);

    let old = access.load_snapshot(&table(), &table_root()).await?;
    let old_files = access.active_files(&old).await?;
    assert_eq!(old_files.paths(), vec!["f1.parquet", "f2.parquet"]);

    add_commit(
        store.as_ref(),
        3,
        actions_to_string(&[
            remove_action("f2.parquet"),
            add_action("f3.parquet", 400, &[], None),
        ]),
    )
    .await?;
    let new = access.load_snapshot(&table(), &table_root()).await?;
    let new_files = access.active_files(&new).await?;
    assert_eq!(new_files.paths(), vec!["f1.parquet", "f3.parquet"]);

    // the old snapshot still answers from its own version
    storage.clear_operations();
    let old_again = access.active_files(&old).await?;
    assert!(Arc::ptr_eq(&old_files, &old_again));
    assert_eq!(old_again.paths(), vec!["f1.parquet", "f2.parquet"]);
    assert!(storage.operations().is_empty());
    Ok(())
}

#[tokio::test]
async fn flush_forces_a_full_reload_with_identical_result(
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let before = access.active_files(&snapshot).await?;

    access.flush_cache();
    storage.clear_operations();

    let reloaded = access.load_snapshot(&table(), &table_root()).await?;
    let after = access.active_files(&reloaded).await?;
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.paths(), after.paths());
    assert_eq!(
        storage.operations(),
        vec![
            StorageOp::Read("/_delta_log/_last_checkpoint".to_string()),
            StorageOp::List("/_delta_log/00000000000000000000".to_string()),
            StorageOp::Read(commit_path(0)),
            StorageOp::Read(commit_path(1)),
            StorageOp::Read(commit_path(2)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn zero_ttl_recomputes_every_load() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = LogAccess::new(storage.clone(), Duration::ZERO);

    let first = access.load_snapshot(&table(), &table_root()).await?;
    storage.clear_operations();
    let second = access.load_snapshot(&table(), &table_root()).await?;
    assert_eq!(first.version(), 2);
    assert_eq!(second.version(), 2);
    // nothing was retained, so the second load is a full one
    assert_eq!(
        storage.operations(),
        vec![
            StorageOp::Read("/_delta_log/_last_checkpoint".to_string()),
            StorageOp::List("/_delta_log/00000000000000000000".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn newest_metadata_wins_across_and_within_commits(
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[
            protocol_action(1, 2),
            add_action("f0.parquet", 100, &[], None),
        ]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        1,
        actions_to_string(&[
            metadata_action(&[]),
            metadata_action(&["region"]),
            add_action("f1.parquet", 200, &[], None),
        ]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        2,
        actions_to_string(&[add_action("f2.parquet", 300, &[], None)]),
    )
    .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    storage.clear_operations();
    let pair = access.metadata_and_protocol(&snapshot).await?;
    // later entries in commit 1 override earlier ones
    assert_eq!(pair.0.partition_columns, vec!["region".to_string()]);
    assert_eq!(pair.1.min_reader_version, 1);
    // commits are consulted newest first until both actions are found
    assert_eq!(
        storage.read_paths(),
        vec![commit_path(2), commit_path(1), commit_path(0)]
    );
    Ok(())
}

#[tokio::test]
async fn metadata_resolution_falls_back_to_the_checkpoint(
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_checkpointed_table(&store).await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    storage.clear_operations();
    let pair = access.metadata_and_protocol(&snapshot).await?;
    assert_eq!(pair.0.partition_columns, vec!["region".to_string()]);
    // both tail commits lack metadata and protocol, so the checkpoint is read
    assert_eq!(
        storage.read_paths(),
        vec![
            commit_path(3),
            commit_path(2),
            "/_delta_log/00000000000000000001.checkpoint.parquet".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn missing_metadata_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[
            protocol_action(1, 2),
            add_action("f0.parquet", 100, &[], None),
        ]),
    )
    .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let err = access.metadata_and_protocol(&snapshot).await.unwrap_err();
    assert!(matches!(err, Error::MissingMetadata), "{err}");
    Ok(())
}

#[tokio::test]
async fn missing_protocol_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[
            metadata_action(&[]),
            add_action("f0.parquet", 100, &[], None),
        ]),
    )
    .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let err = access.metadata_and_protocol(&snapshot).await.unwrap_err();
    assert!(matches!(err, Error::MissingProtocol), "{err}");
    Ok(())
}

#[tokio::test]
async fn unsupported_reader_version_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[
            metadata_action(&[]),
            protocol_action(4, 2),
            add_action("f0.parquet", 100, &[], None),
        ]),
    )
    .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let err = access.metadata_and_protocol(&snapshot).await.unwrap_err();
    assert!(
        err.to_string()
            .contains("Unsupported reader protocol version 4"),
        "{err}"
    );
    Ok(())
}

#[tokio::test]
async fn remove_stream_includes_checkpoint_tombstones() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[
            metadata_action(&[]),
            protocol_action(1, 2),
            add_action("f0.parquet", 100, &[], None),
        ]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        1,
        actions_to_string(&[
            remove_action("f0.parquet"),
            add_action("f1.parquet", 200, &[], None),
        ]),
    )
    .await?;
    write_checkpoint(
        store.as_ref(),
        1,
        &[
            metadata_action(&[]),
            protocol_action(1, 2),
            add_action("f1.parquet", 200, &[], None),
            remove_action("f0.parquet"),
        ],
    )
    .await?;
    write_last_checkpoint_hint(store.as_ref(), 1).await?;
    add_commit(
        store.as_ref(),
        2,
        actions_to_string(&[add_action("f2.parquet", 300, &[], None)]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        3,
        actions_to_string(&[
            remove_action("f1.parquet"),
            add_action("f3.parquet", 400, &[], None),
        ]),
    )
    .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let removes: Vec<_> = access.remove_entries(&snapshot).try_collect().await?;
    let paths: Vec<&str> = removes.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["f0.parquet", "f1.parquet"]);
    assert_eq!(removes[0].deletion_timestamp, Some(1_700_000_000_000));
    Ok(())
}

#[tokio::test]
async fn streams_read_nothing_until_polled() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    let access = access_over(&storage);
    let snapshot = access.load_snapshot(&table(), &table_root()).await?;

    // a second accessor whose storage panics on any request
    let sealed = LogAccess::new(Arc::new(PanickingStorage), CACHE_TTL);
    let removes = sealed.remove_entries(&snapshot);
    let infos = sealed.commit_info_entries(&snapshot);
    drop(removes);
    drop(infos);
    Ok(())
}

#[tokio::test]
async fn commit_info_is_stamped_with_versions() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[
            metadata_action(&[]),
            protocol_action(1, 2),
            commit_info_action("CREATE TABLE AS SELECT"),
        ]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        1,
        actions_to_string(&[
            add_action("f1.parquet", 200, &[], None),
            commit_info_action("WRITE"),
        ]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        2,
        actions_to_string(&[commit_info_action("OPTIMIZE")]),
    )
    .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let entries: Vec<_> = access.commit_info_entries(&snapshot).try_collect().await?;
    let stamped: Vec<(u64, Option<&str>)> = entries
        .iter()
        .map(|e| (e.version, e.info.operation.as_deref()))
        .collect();
    assert_eq!(
        stamped,
        vec![
            (0, Some("CREATE TABLE AS SELECT")),
            (1, Some("WRITE")),
            (2, Some("OPTIMIZE")),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn hint_without_visible_checkpoint_aborts_the_load(
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    write_last_checkpoint_hint(store.as_ref(), 5).await?;
    let access = access_over(&storage);

    let err = access
        .load_snapshot(&table(), &table_root())
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("Had a _last_checkpoint hint but didn't find any checkpoints!"),
        "{err}"
    );
    Ok(())
}

#[tokio::test]
async fn corrupt_hint_falls_back_to_a_full_listing() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    store
        .put(
            &Path::from("_delta_log/_last_checkpoint"),
            "{\"version\":".into(),
        )
        .await?;
    let access = access_over(&storage);

    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    assert_eq!(snapshot.version(), 2);
    Ok(())
}

#[tokio::test]
async fn malformed_commit_failure_is_not_cached() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    seed_plain_table(&store).await?;
    add_commit(store.as_ref(), 2, "{\"add\": {\"path\": oops".to_string()).await?;
    let access = access_over(&storage);

    // listing does not look inside commits, so the load itself succeeds
    let snapshot = access.load_snapshot(&table(), &table_root()).await?;
    let err = access.active_files(&snapshot).await.unwrap_err();
    assert!(
        err.to_string().contains("Malformed commit file for version 2"),
        "{err}"
    );

    // repair the commit; the failed computation must not have been retained
    add_commit(
        store.as_ref(),
        2,
        actions_to_string(&[
            remove_action("f0.parquet"),
            add_action("f2.parquet", 300, &[], None),
        ]),
    )
    .await?;
    let files = access.active_files(&snapshot).await?;
    assert_eq!(files.paths(), vec!["f1.parquet", "f2.parquet"]);
    Ok(())
}

#[tokio::test]
async fn version_gap_fails_the_load() -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        0,
        actions_to_string(&[metadata_action(&[]), protocol_action(1, 2)]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        1,
        actions_to_string(&[add_action("f1.parquet", 200, &[], None)]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        3,
        actions_to_string(&[add_action("f3.parquet", 400, &[], None)]),
    )
    .await?;
    let access = access_over(&storage);

    let err = access
        .load_snapshot(&table(), &table_root())
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("Expected ordered contiguous commit files"),
        "{err}"
    );
    Ok(())
}

#[tokio::test]
async fn history_starting_past_zero_without_checkpoint_fails(
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, storage) = tracking_in_memory();
    add_commit(
        store.as_ref(),
        1,
        actions_to_string(&[metadata_action(&[]), protocol_action(1, 2)]),
    )
    .await?;
    add_commit(
        store.as_ref(),
        2,
        actions_to_string(&[add_action("f2.parquet", 300, &[], None)]),
    )
    .await?;
    let access = access_over(&storage);

    let err = access
        .load_snapshot(&table(), &table_root())
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains(
            "Cannot reconstruct state of table sales.orders: log starts at version 1 with no checkpoint"
        ),
        "{err}"
    );
    Ok(())
}
