//! The remote bucket contract.
//!
//! The hybrid store treats the remote tier as a flat namespace of named
//! objects. Only the wire-level contract is consumed here; real drivers are
//! supplied by the embedding program. [`ObjectStoreBucket`] adapts any
//! [`object_store::ObjectStore`] backend (S3, GCS, local filesystem,
//! in-memory), which covers production use. [`MockBucket`] is an in-memory
//! implementation with injectable per-operation delays for tests that need
//! to mimic network latency.
//!
//! "Object does not exist" is a non-error signal to the hybrid store: reads
//! fall back to the other tier and deletes treat it as "nothing to do". The
//! [`Bucket::is_not_exist`] predicate classifies errors accordingly; the
//! default implementation matches the structured [`BucketError::NotFound`]
//! variant, and drivers whose errors are opaque may override it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::ObjectStore;
use thiserror::Error;
use tokio::sync::RwLock;

pub type BucketResult<T> = std::result::Result<T, BucketError>;

/// An error reported by a bucket driver.
#[derive(Debug, Error)]
pub enum BucketError {
    #[error("no such object: {name}")]
    NotFound { name: String },

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl BucketError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        BucketError::Other(Box::new(err))
    }
}

/// A remote storage bucket (e.g. S3 or GCS).
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Downloads an object from the bucket.
    async fn read(&self, name: &str) -> BucketResult<Bytes>;

    /// Uploads an object to the bucket, replacing any previous content.
    async fn write(&self, name: &str, data: Bytes) -> BucketResult<()>;

    /// Deletes an object from the bucket.
    async fn delete(&self, name: &str) -> BucketResult<()>;

    /// Whether an error returned by [`read`](Bucket::read) or
    /// [`delete`](Bucket::delete) means the object does not exist.
    fn is_not_exist(&self, err: &BucketError) -> bool {
        matches!(err, BucketError::NotFound { .. })
    }
}

/// Adapts an [`object_store::ObjectStore`] backend to the [`Bucket`]
/// contract.
pub struct ObjectStoreBucket {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBucket {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

fn map_object_store_error(name: &str, err: object_store::Error) -> BucketError {
    match err {
        object_store::Error::NotFound { .. } => BucketError::NotFound {
            name: name.to_string(),
        },
        err => BucketError::other(err),
    }
}

#[async_trait]
impl Bucket for ObjectStoreBucket {
    async fn read(&self, name: &str) -> BucketResult<Bytes> {
        let path = object_store::path::Path::from(name);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| map_object_store_error(name, e))?;
        result
            .bytes()
            .await
            .map_err(|e| map_object_store_error(name, e))
    }

    async fn write(&self, name: &str, data: Bytes) -> BucketResult<()> {
        let path = object_store::path::Path::from(name);
        self.store
            .put(&path, data.into())
            .await
            .map(|_| ())
            .map_err(|e| map_object_store_error(name, e))
    }

    async fn delete(&self, name: &str) -> BucketResult<()> {
        let path = object_store::path::Path::from(name);
        self.store
            .delete(&path)
            .await
            .map_err(|e| map_object_store_error(name, e))
    }
}

/// Delays applied around a mock operation, to mimic network latency in
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationDelay {
    /// Sleep between the call and the actual operation.
    pub before: Duration,
    /// Sleep between the operation completing and the call returning.
    pub after: Duration,
}

impl OperationDelay {
    pub fn before(delay: Duration) -> Self {
        Self {
            before: delay,
            after: Duration::ZERO,
        }
    }

    async fn enter(&self) {
        if !self.before.is_zero() {
            tokio::time::sleep(self.before).await;
        }
    }

    async fn exit(&self) {
        if !self.after.is_zero() {
            tokio::time::sleep(self.after).await;
        }
    }
}

/// In-memory [`Bucket`] for tests.
#[derive(Default)]
pub struct MockBucket {
    objects: RwLock<HashMap<String, Bytes>>,
    read_delay: OperationDelay,
    write_delay: OperationDelay,
    delete_delay: OperationDelay,
}

impl MockBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_delay(mut self, delay: OperationDelay) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn with_write_delay(mut self, delay: OperationDelay) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_delete_delay(mut self, delay: OperationDelay) -> Self {
        self.delete_delay = delay;
        self
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.objects.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl Bucket for MockBucket {
    async fn read(&self, name: &str) -> BucketResult<Bytes> {
        self.read_delay.enter().await;
        let result = self
            .objects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BucketError::NotFound {
                name: name.to_string(),
            });
        self.read_delay.exit().await;
        result
    }

    async fn write(&self, name: &str, data: Bytes) -> BucketResult<()> {
        self.write_delay.enter().await;
        self.objects.write().await.insert(name.to_string(), data);
        self.write_delay.exit().await;
        Ok(())
    }

    async fn delete(&self, name: &str) -> BucketResult<()> {
        self.delete_delay.enter().await;
        let removed = self.objects.write().await.remove(name);
        self.delete_delay.exit().await;
        match removed {
            Some(_) => Ok(()),
            None => Err(BucketError::NotFound {
                name: name.to_string(),
            }),
        }
    }
}
