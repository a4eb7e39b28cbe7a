//! Test fixtures shared across the workspace: builders for in-memory table
//! logs, parquet checkpoint generation, and [`Storage`] implementations that
//! record or forbid access.

use std::sync::{Arc, Mutex};

use arrow::datatypes::{DataType, Field, Fields, Schema};
use arrow::json::ReaderBuilder;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use parquet::arrow::ArrowWriter;
use serde_json::{json, Value};
use url::Url;

use lakescan::{FileMeta, LakeResult, ObjectStoreStorage, Storage};

/// The log path for `version` with the given suffix, e.g.
/// `_delta_log/00000000000000000005.json`.
pub fn delta_path_for_version(version: u64, suffix: &str) -> Path {
    let path = format!("_delta_log/{version:020}.{suffix}");
    Path::from(path.as_str())
}

/// Write a commit file for `version` containing `data`.
pub async fn add_commit(
    store: &dyn ObjectStore,
    version: u64,
    data: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = delta_path_for_version(version, "json");
    store.put(&path, data.into_bytes().into()).await?;
    Ok(())
}

/// Serialize actions one document per line, the commit file layout.
pub fn actions_to_string(actions: &[Value]) -> String {
    actions
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn metadata_action(partition_columns: &[&str]) -> Value {
    json!({
        "metaData": {
            "id": "11111111-2222-3333-4444-555555555555",
            "format": { "provider": "parquet", "options": {} },
            "schemaString": "{\"type\":\"struct\",\"fields\":[]}",
            "partitionColumns": partition_columns,
            "configuration": {},
            "createdTime": 1_700_000_000_000i64,
        }
    })
}

pub fn protocol_action(min_reader_version: i32, min_writer_version: i32) -> Value {
    json!({
        "protocol": {
            "minReaderVersion": min_reader_version,
            "minWriterVersion": min_writer_version,
        }
    })
}

/// An `add` action. Partition values map to `None` for null; `stats` is the
/// raw statistics document, if any.
pub fn add_action(
    path: &str,
    size: i64,
    partition_values: &[(&str, Option<&str>)],
    stats: Option<&str>,
) -> Value {
    let partition_values: serde_json::Map<String, Value> = partition_values
        .iter()
        .map(|(column, value)| {
            let value = value.map_or(Value::Null, |v| Value::String(v.to_string()));
            (column.to_string(), value)
        })
        .collect();
    let mut add = json!({
        "path": path,
        "partitionValues": partition_values,
        "size": size,
        "modificationTime": 1_700_000_000_000i64,
        "dataChange": true,
    });
    if let Some(stats) = stats {
        add["stats"] = Value::String(stats.to_string());
    }
    json!({ "add": add })
}

pub fn remove_action(path: &str) -> Value {
    json!({
        "remove": {
            "path": path,
            "deletionTimestamp": 1_700_000_000_000i64,
            "dataChange": true,
        }
    })
}

pub fn commit_info_action(operation: &str) -> Value {
    json!({
        "commitInfo": {
            "timestamp": 1_700_000_000_000i64,
            "operation": operation,
            "isBlindAppend": true,
        }
    })
}

/// A statistics document for [`add_action`]. The value arguments are json
/// objects mapping column names to bounds or counts.
pub fn stats_document(
    num_records: i64,
    min_values: Value,
    max_values: Value,
    null_count: Value,
) -> String {
    json!({
        "numRecords": num_records,
        "minValues": min_values,
        "maxValues": max_values,
        "nullCount": null_count,
    })
    .to_string()
}

/// The arrow schema checkpoint rows are written with. Covers the action
/// fields the crate reads back; every action column is nullable since each
/// row carries exactly one action.
pub fn checkpoint_schema() -> Schema {
    let partition_values = Field::new_map(
        "partitionValues",
        "key_value",
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, true),
        false,
        true,
    );
    let meta_data = Field::new(
        "metaData",
        DataType::Struct(Fields::from(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new(
                "format",
                DataType::Struct(Fields::from(vec![Field::new(
                    "provider",
                    DataType::Utf8,
                    true,
                )])),
                true,
            ),
            Field::new("schemaString", DataType::Utf8, true),
            Field::new(
                "partitionColumns",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                true,
            ),
            Field::new("createdTime", DataType::Int64, true),
        ])),
        true,
    );
    let protocol = Field::new(
        "protocol",
        DataType::Struct(Fields::from(vec![
            Field::new("minReaderVersion", DataType::Int32, true),
            Field::new("minWriterVersion", DataType::Int32, true),
        ])),
        true,
    );
    let add = Field::new(
        "add",
        DataType::Struct(Fields::from(vec![
            Field::new("path", DataType::Utf8, true),
            partition_values,
            Field::new("size", DataType::Int64, true),
            Field::new("modificationTime", DataType::Int64, true),
            Field::new("dataChange", DataType::Boolean, true),
            Field::new("stats", DataType::Utf8, true),
        ])),
        true,
    );
    let remove = Field::new(
        "remove",
        DataType::Struct(Fields::from(vec![
            Field::new("path", DataType::Utf8, true),
            Field::new("deletionTimestamp", DataType::Int64, true),
            Field::new("dataChange", DataType::Boolean, true),
        ])),
        true,
    );
    Schema::new(vec![meta_data, protocol, add, remove])
}

/// Encode checkpoint rows, one action document per row, as the contents of a
/// parquet checkpoint file.
pub fn checkpoint_data(actions: &[Value]) -> Vec<u8> {
    let schema = Arc::new(checkpoint_schema());
    let mut decoder = ReaderBuilder::new(schema.clone())
        .build_decoder()
        .expect("checkpoint schema is decodable");
    let ndjson = actions_to_string(actions);
    let mut remaining = ndjson.as_bytes();
    while !remaining.is_empty() {
        let consumed = decoder.decode(remaining).expect("checkpoint rows decode");
        if consumed == 0 {
            break;
        }
        remaining = &remaining[consumed..];
    }
    let batch = decoder
        .flush()
        .expect("checkpoint rows flush")
        .expect("at least one checkpoint row");

    let mut data = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut data, schema, None).expect("parquet writer opens");
    writer.write(&batch).expect("batch writes");
    writer.close().expect("parquet writer closes");
    data
}

/// Write a single part checkpoint for `version`.
pub async fn write_checkpoint(
    store: &dyn ObjectStore,
    version: u64,
    actions: &[Value],
) -> Result<(), Box<dyn std::error::Error>> {
    let path = delta_path_for_version(version, "checkpoint.parquet");
    store.put(&path, checkpoint_data(actions).into()).await?;
    Ok(())
}

/// Write the `_last_checkpoint` hint pointing at `version`.
pub async fn write_last_checkpoint_hint(
    store: &dyn ObjectStore,
    version: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = json!({ "version": version }).to_string();
    store
        .put(
            &Path::from("_delta_log/_last_checkpoint"),
            body.into_bytes().into(),
        )
        .await?;
    Ok(())
}

/// One storage operation a [`TrackingStorage`] observed. Paths are recorded
/// without scheme or host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    List(String),
    Read(String),
    FileSize(String),
}

impl StorageOp {
    pub fn path(&self) -> &str {
        match self {
            StorageOp::List(path) | StorageOp::Read(path) | StorageOp::FileSize(path) => path,
        }
    }
}

/// Storage wrapper that records every operation, so tests can assert exactly
/// which files a code path touched.
#[derive(Debug)]
pub struct TrackingStorage {
    inner: Arc<dyn Storage>,
    operations: Mutex<Vec<StorageOp>>,
}

impl TrackingStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Everything observed since construction or the last clear, in order.
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().unwrap().clone()
    }

    pub fn clear_operations(&self) {
        self.operations.lock().unwrap().clear();
    }

    /// The paths of `Read` operations, in order.
    pub fn read_paths(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StorageOp::Read(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Storage for TrackingStorage {
    async fn list_from(&self, start: &Url) -> LakeResult<Vec<FileMeta>> {
        self.record(StorageOp::List(start.path().to_string()));
        self.inner.list_from(start).await
    }

    async fn read(&self, location: &Url) -> LakeResult<Bytes> {
        self.record(StorageOp::Read(location.path().to_string()));
        self.inner.read(location).await
    }

    async fn file_size(&self, location: &Url) -> LakeResult<u64> {
        self.record(StorageOp::FileSize(location.path().to_string()));
        self.inner.file_size(location).await
    }
}

/// Storage that fails the test on any access, proving a code path never
/// touches storage.
#[derive(Debug)]
pub struct PanickingStorage;

#[async_trait]
impl Storage for PanickingStorage {
    async fn list_from(&self, start: &Url) -> LakeResult<Vec<FileMeta>> {
        panic!("unexpected list from {start}");
    }

    async fn read(&self, location: &Url) -> LakeResult<Bytes> {
        panic!("unexpected read of {location}");
    }

    async fn file_size(&self, location: &Url) -> LakeResult<u64> {
        panic!("unexpected file_size of {location}");
    }
}

/// An in-memory object store plus a tracking [`Storage`] over it.
pub fn tracking_in_memory() -> (Arc<InMemory>, Arc<TrackingStorage>) {
    let store = Arc::new(InMemory::new());
    let storage = Arc::new(TrackingStorage::new(Arc::new(ObjectStoreStorage::new(
        store.clone(),
    ))));
    (store, storage)
}
