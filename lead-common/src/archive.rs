//! Append-only, day-partitioned archive of lead records.
//!
//! Every bucket holds one JSON array per IST calendar day at `leads/<YYYY>/<MM>/<DD>/data.json`.
//! Appending reads the day's array, pushes one entry and writes the whole array back. There is
//! no locking: two invocations appending to the same day concurrently can lose one of the
//! entries.
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::normalize::{format_ist, ist, is_truthy};
use crate::store::{ObjectStore, PutObject, StoreError};

const CONTENT_TYPE: &str = "application/json";

/// Key of the nested record stored in place of the whole value when present.
const ORIGINAL_DATA_KEY: &str = "originalData";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read archive s3://{bucket}/{key}: {source}")]
    Read {
        bucket: String,
        key: String,
        source: StoreError,
    },
    #[error("archive s3://{bucket}/{key} does not contain valid JSON: {source}")]
    Corrupt {
        bucket: String,
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to serialize archive s3://{bucket}/{key}: {source}")]
    Serialize {
        bucket: String,
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to write archive s3://{bucket}/{key}: {source}")]
    Write {
        bucket: String,
        key: String,
        source: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub message_id: String,
    pub lead_data: Value,
    pub saved_at: String,
}

/// Where an entry ended up and how many entries the day's collection now holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    pub location: String,
    pub key: String,
    pub count: usize,
}

/// Partition key for the IST calendar day `now` falls on.
pub fn partition_key(now: &DateTime<Utc>) -> String {
    format!("leads/{}/data.json", now.with_timezone(&ist()).format("%Y/%m/%d"))
}

/// The stored form of `data`: its nested `originalData` if present, otherwise `data` itself.
fn lead_data(data: &Value) -> Value {
    match data.get(ORIGINAL_DATA_KEY) {
        Some(original) if is_truthy(original) => original.clone(),
        _ => data.clone(),
    }
}

#[derive(Clone)]
pub struct ArchiveClient {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Append `data` to today's collection in `bucket`.
    pub async fn append(
        &self,
        bucket: &str,
        message_id: &str,
        data: &Value,
    ) -> Result<ArchiveReceipt, ArchiveError> {
        self.append_at(bucket, message_id, data, Utc::now()).await
    }

    /// Append `data` to the collection of the IST day `now` falls on.
    pub async fn append_at(
        &self,
        bucket: &str,
        message_id: &str,
        data: &Value,
        now: DateTime<Utc>,
    ) -> Result<ArchiveReceipt, ArchiveError> {
        let key = partition_key(&now);

        let mut entries = self.load(bucket, &key).await?;
        entries.push(
            serde_json::to_value(ArchiveEntry {
                message_id: message_id.to_owned(),
                lead_data: lead_data(data),
                saved_at: format_ist(&now),
            })
            .map_err(|source| ArchiveError::Serialize {
                bucket: bucket.to_owned(),
                key: key.clone(),
                source,
            })?,
        );

        let body = serde_json::to_vec_pretty(&entries).map_err(|source| {
            ArchiveError::Serialize {
                bucket: bucket.to_owned(),
                key: key.clone(),
                source,
            }
        })?;
        let metadata = HashMap::from([
            ("message-id".to_owned(), message_id.to_owned()),
            (
                "processed-at".to_owned(),
                now.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ]);

        self.store
            .put_object(
                bucket,
                &key,
                PutObject {
                    body: Bytes::from(body),
                    content_type: CONTENT_TYPE.to_owned(),
                    metadata,
                },
            )
            .await
            .map_err(|source| ArchiveError::Write {
                bucket: bucket.to_owned(),
                key: key.clone(),
                source,
            })?;

        metrics::counter!("lead_archive_appends_total", "bucket" => bucket.to_owned())
            .increment(1);
        info!(
            bucket,
            key = %key,
            message_id,
            count = entries.len(),
            "appended lead to archive"
        );

        Ok(ArchiveReceipt {
            location: format!("s3://{bucket}/{key}"),
            key,
            count: entries.len(),
        })
    }

    /// Read the existing collection, treating a missing object as empty. A stored single object
    /// is read as a one-element collection.
    async fn load(&self, bucket: &str, key: &str) -> Result<Vec<Value>, ArchiveError> {
        let body = match self.store.get_string(bucket, key).await {
            Ok(body) => body,
            Err(StoreError::NotFound(_)) => {
                info!(bucket, key, "no archive for today yet, creating it");
                return Ok(Vec::new());
            }
            Err(source) => {
                error!(bucket, key, error = %source, "failed to read archive");
                return Err(ArchiveError::Read {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    source,
                });
            }
        };

        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(single) => Ok(vec![single]),
            Err(source) => Err(ArchiveError::Corrupt {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    const BUCKET: &str = "raw-leads";

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn stored_entries(store: &MemoryStore, key: &str) -> Vec<Value> {
        let object = store.object(BUCKET, key).expect("object was written");
        serde_json::from_slice::<Vec<Value>>(&object.body).unwrap()
    }

    #[test]
    fn test_partition_key_uses_ist_calendar_day() {
        assert_eq!(
            partition_key(&at(2024, 1, 5, 10, 0)),
            "leads/2024/01/05/data.json"
        );
        // 18:30 UTC is already midnight in IST.
        assert_eq!(
            partition_key(&at(2024, 12, 31, 18, 30)),
            "leads/2025/01/01/data.json"
        );
        assert_eq!(
            partition_key(&at(2024, 12, 31, 18, 29)),
            "leads/2024/12/31/data.json"
        );
    }

    #[tokio::test]
    async fn test_append_creates_collection() {
        let store = MemoryStore::new();
        let archive = ArchiveClient::new(Arc::new(store.clone()));
        let now = at(2024, 1, 5, 10, 0);

        let receipt = archive
            .append_at(BUCKET, "m-1", &json!({"Lead_Id": "1"}), now)
            .await
            .unwrap();

        assert_eq!(
            receipt,
            ArchiveReceipt {
                location: "s3://raw-leads/leads/2024/01/05/data.json".to_owned(),
                key: "leads/2024/01/05/data.json".to_owned(),
                count: 1,
            }
        );

        let object = store.object(BUCKET, &receipt.key).unwrap();
        assert_eq!(object.content_type, "application/json");
        assert_eq!(object.metadata["message-id"], "m-1");
        assert_eq!(object.metadata["processed-at"], "2024-01-05T10:00:00.000Z");
        // Pretty printed with two space indentation.
        assert!(std::str::from_utf8(&object.body)
            .unwrap()
            .starts_with("[\n  {\n    \"messageId\": \"m-1\""));

        assert_eq!(
            stored_entries(&store, &receipt.key),
            vec![json!({
                "messageId": "m-1",
                "leadData": {"Lead_Id": "1"},
                "savedAt": "2024-01-05T15:30:00.000+05:30",
            })]
        );
    }

    #[tokio::test]
    async fn test_append_is_monotonic() {
        let store = MemoryStore::new();
        let archive = ArchiveClient::new(Arc::new(store.clone()));
        let now = at(2024, 1, 5, 10, 0);

        for n in 1..=5 {
            let receipt = archive
                .append_at(BUCKET, &format!("m-{n}"), &json!({"n": n}), now)
                .await
                .unwrap();
            assert_eq!(receipt.count, n);
        }

        let entries = stored_entries(&store, "leads/2024/01/05/data.json");
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0]["messageId"], json!("m-1"));
        assert_eq!(entries[4]["leadData"], json!({"n": 5}));
    }

    #[tokio::test]
    async fn test_append_partitions_by_day() {
        let store = MemoryStore::new();
        let archive = ArchiveClient::new(Arc::new(store.clone()));

        archive
            .append_at(BUCKET, "m-1", &json!({}), at(2024, 1, 5, 10, 0))
            .await
            .unwrap();
        let receipt = archive
            .append_at(BUCKET, "m-2", &json!({}), at(2024, 1, 5, 20, 0))
            .await
            .unwrap();

        assert_eq!(receipt.count, 1);
        assert_eq!(
            store.keys(BUCKET),
            vec![
                "leads/2024/01/05/data.json".to_owned(),
                "leads/2024/01/06/data.json".to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn test_append_stores_original_data_when_present() {
        let store = MemoryStore::new();
        let archive = ArchiveClient::new(Arc::new(store.clone()));

        let receipt = archive
            .append_at(
                BUCKET,
                "m-1",
                &json!({"originalData": {"Lead_Id": "9"}, "debug": true}),
                at(2024, 1, 5, 10, 0),
            )
            .await
            .unwrap();

        let entries = stored_entries(&store, &receipt.key);
        assert_eq!(entries[0]["leadData"], json!({"Lead_Id": "9"}));
    }

    #[tokio::test]
    async fn test_append_wraps_single_stored_object() {
        let store = MemoryStore::new();
        store.insert(
            BUCKET,
            "leads/2024/01/05/data.json",
            r#"{"messageId": "legacy", "leadData": {}, "savedAt": "x"}"#,
        );
        let archive = ArchiveClient::new(Arc::new(store.clone()));

        let receipt = archive
            .append_at(BUCKET, "m-1", &json!({}), at(2024, 1, 5, 10, 0))
            .await
            .unwrap();

        assert_eq!(receipt.count, 2);
        let entries = stored_entries(&store, &receipt.key);
        assert_eq!(entries[0]["messageId"], json!("legacy"));
        assert_eq!(entries[1]["messageId"], json!("m-1"));
    }

    #[tokio::test]
    async fn test_append_treats_blank_object_as_empty() {
        let store = MemoryStore::new();
        store.insert(BUCKET, "leads/2024/01/05/data.json", "  \n");
        let archive = ArchiveClient::new(Arc::new(store));

        let receipt = archive
            .append_at(BUCKET, "m-1", &json!({}), at(2024, 1, 5, 10, 0))
            .await
            .unwrap();
        assert_eq!(receipt.count, 1);
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let store = MemoryStore::new().fail_get(
            BUCKET,
            "leads/2024/01/05/data.json",
            StoreError::OperationFailed("access denied".to_owned()),
        );
        let archive = ArchiveClient::new(Arc::new(store.clone()));

        let result = archive
            .append_at(BUCKET, "m-1", &json!({}), at(2024, 1, 5, 10, 0))
            .await;

        assert!(matches!(result, Err(ArchiveError::Read { .. })));
        assert!(store.keys(BUCKET).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_collection_is_fatal() {
        let store = MemoryStore::new();
        store.insert(BUCKET, "leads/2024/01/05/data.json", "[{\"messageId\":");
        let archive = ArchiveClient::new(Arc::new(store));

        let result = archive
            .append_at(BUCKET, "m-1", &json!({}), at(2024, 1, 5, 10, 0))
            .await;

        assert!(matches!(result, Err(ArchiveError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let store =
            MemoryStore::new().fail_put(BUCKET, StoreError::OperationFailed("slow down".into()));
        let archive = ArchiveClient::new(Arc::new(store));

        let result = archive
            .append_at(BUCKET, "m-1", &json!({}), at(2024, 1, 5, 10, 0))
            .await;

        assert!(matches!(result, Err(ArchiveError::Write { .. })));
    }
}
