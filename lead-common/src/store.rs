//! Keyed blob storage used by the lead archive.
//!
//! The archive only needs two operations, read a whole object and overwrite a whole object,
//! so the trait stays that small. `S3Store` talks to S3 (or anything S3 compatible) and
//! `MemoryStore` keeps objects in a map for tests and local runs.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3SdkClient;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store operation failed: {0}")]
    OperationFailed(String),
    #[error("object body is not valid UTF-8: {0}")]
    ParseError(String),
}

impl From<std::string::FromUtf8Error> for StoreError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        StoreError::ParseError(err.to_string())
    }
}

/// A single object write: body plus the attributes stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub body: Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object as a UTF-8 string. Missing objects are reported as `StoreError::NotFound`.
    async fn get_string(&self, bucket: &str, key: &str) -> Result<String, StoreError>;

    /// Create or fully replace an object.
    async fn put_object(&self, bucket: &str, key: &str, object: PutObject)
        -> Result<(), StoreError>;
}

pub struct S3Store {
    client: AwsS3SdkClient,
}

impl S3Store {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }
}

fn is_not_found(err: &SdkError<GetObjectError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => {
            matches!(service_err.err(), GetObjectError::NoSuchKey(_))
                || service_err.raw().status().as_u16() == 404
        }
        _ => false,
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_string(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::OperationFailed(format!(
                        "failed to get s3://{bucket}/{key}: {}",
                        e.into_service_error()
                    ))
                }
            })?;

        let body = output.body.collect().await.map_err(|e| {
            StoreError::OperationFailed(format!("failed to read s3://{bucket}/{key}: {e}"))
        })?;

        Ok(String::from_utf8(body.to_vec())?)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        object: PutObject,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(object.body))
            .content_type(object.content_type)
            .set_metadata(Some(object.metadata))
            .send()
            .await
            .map_err(|e| {
                StoreError::OperationFailed(format!(
                    "failed to put s3://{bucket}/{key}: {}",
                    e.into_service_error()
                ))
            })
            .map(|_| ())
    }
}

/// In-memory object store. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<String, PutObject>>>,
    get_failures: Arc<Mutex<HashMap<String, StoreError>>>,
    put_failures: Arc<Mutex<HashMap<String, StoreError>>>,
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}:{key}")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read of `bucket`/`key` fail with `error`.
    pub fn fail_get(self, bucket: &str, key: &str, error: StoreError) -> Self {
        self.get_failures
            .lock()
            .expect("poisoned MemoryStore mutex")
            .insert(object_key(bucket, key), error);
        self
    }

    /// Make every write to `bucket` fail with `error`.
    pub fn fail_put(self, bucket: &str, error: StoreError) -> Self {
        self.put_failures
            .lock()
            .expect("poisoned MemoryStore mutex")
            .insert(bucket.to_owned(), error);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, body: &str) {
        self.objects
            .lock()
            .expect("poisoned MemoryStore mutex")
            .insert(
                object_key(bucket, key),
                PutObject {
                    body: Bytes::copy_from_slice(body.as_bytes()),
                    content_type: "application/json".to_owned(),
                    metadata: HashMap::new(),
                },
            );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<PutObject> {
        self.objects
            .lock()
            .expect("poisoned MemoryStore mutex")
            .get(&object_key(bucket, key))
            .cloned()
    }

    /// Keys currently stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let prefix = object_key(bucket, "");
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .expect("poisoned MemoryStore mutex")
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_owned))
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_string(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let object_key = object_key(bucket, key);
        if let Some(error) = self
            .get_failures
            .lock()
            .expect("poisoned MemoryStore mutex")
            .get(&object_key)
        {
            return Err(error.clone());
        }

        let object = self
            .objects
            .lock()
            .expect("poisoned MemoryStore mutex")
            .get(&object_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        Ok(String::from_utf8(object.body.to_vec())?)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        object: PutObject,
    ) -> Result<(), StoreError> {
        if let Some(error) = self
            .put_failures
            .lock()
            .expect("poisoned MemoryStore mutex")
            .get(bucket)
        {
            return Err(error.clone());
        }

        self.objects
            .lock()
            .expect("poisoned MemoryStore mutex")
            .insert(object_key(bucket, key), object);
        Ok(())
    }
}
