//! Checkpoint file decoding.
//!
//! A single part checkpoint is a parquet file with one action per row, using
//! the same field layout as the json commits. Rows are bridged through their
//! json representation into the same [`LogEntry`] type the commit reader
//! produces, so replay never cares where an action came from.

use bytes::Bytes;
use parquet::file::reader::{FileReader, SerializedFileReader};
use url::Url;

use crate::actions::LogEntry;
use crate::path::{AsUrl, ParsedLogPath};
use crate::storage::Storage;
use crate::{Error, LakeResult, Version};

/// Read and parse a single part checkpoint.
pub(crate) async fn read_checkpoint(
    storage: &dyn Storage,
    checkpoint: &ParsedLogPath,
) -> LakeResult<Vec<LogEntry>> {
    let url = checkpoint.location.as_url();
    let bytes = storage.read(url).await?;
    parse_checkpoint(checkpoint.version, url, bytes)
}

/// Parse checkpoint contents into entries.
///
/// Any unreadable row fails the whole checkpoint: replay from a partially
/// read base state would be silently wrong.
pub(crate) fn parse_checkpoint(
    version: Version,
    location: &Url,
    bytes: Bytes,
) -> LakeResult<Vec<LogEntry>> {
    let reader =
        SerializedFileReader::new(bytes).map_err(|e| corrupt(version, location, e))?;
    let rows = reader
        .get_row_iter(None)
        .map_err(|e| corrupt(version, location, e))?;

    let mut entries = Vec::new();
    for row in rows {
        let row = row.map_err(|e| corrupt(version, location, e))?;
        let entry: LogEntry = serde_json::from_value(row.to_json_value())
            .map_err(|e| corrupt(version, location, e))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn corrupt(version: Version, location: &Url, err: impl ToString) -> Error {
    Error::invalid_checkpoint(format!(
        "checkpoint for version {version} at {location}: {}",
        err.to_string()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::checkpoint_data;

    fn url() -> Url {
        Url::parse("memory:///_delta_log/00000000000000000002.checkpoint.parquet").unwrap()
    }

    #[test]
    fn parses_checkpoint_rows() {
        let actions: Vec<serde_json::Value> = [
            r#"{"metaData":{"id":"m1","format":{"provider":"parquet","options":{}},"schemaString":"{}","partitionColumns":["region"],"configuration":{},"createdTime":1}}"#,
            r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#,
            r#"{"add":{"path":"a.parquet","partitionValues":{"region":"east"},"size":10,"modificationTime":1,"dataChange":true,"stats":"{\"numRecords\":2}"}}"#,
            r#"{"remove":{"path":"old.parquet","deletionTimestamp":5,"dataChange":true}}"#,
        ]
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect();
        let data = checkpoint_data(&actions);

        let entries = parse_checkpoint(2, &url(), Bytes::from(data)).unwrap();
        assert_eq!(entries.len(), 4);

        let metadata = entries[0].meta_data.as_ref().unwrap();
        assert_eq!(metadata.id, "m1");
        assert_eq!(metadata.partition_columns, vec!["region"]);

        let protocol = entries[1].protocol.as_ref().unwrap();
        assert_eq!(protocol.min_reader_version, 1);

        let add = entries[2].add.as_ref().unwrap();
        assert_eq!(add.path, "a.parquet");
        assert_eq!(
            add.partition_values.get("region"),
            Some(&Some("east".to_string()))
        );
        assert_eq!(add.statistics().unwrap().record_count, Some(2));

        let remove = entries[3].remove.as_ref().unwrap();
        assert_eq!(remove.path, "old.parquet");
    }

    #[test]
    fn garbage_bytes_are_an_invalid_checkpoint() {
        let err = parse_checkpoint(2, &url(), Bytes::from_static(b"not parquet")).unwrap_err();
        assert!(matches!(err, Error::InvalidCheckpoint(_)));
        assert!(err.to_string().contains("version 2"));
    }
}
