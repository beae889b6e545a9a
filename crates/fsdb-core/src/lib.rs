//! Core types for fsdb, a two-tier filesystem-backed key-value store.
//!
//! This crate defines the vocabulary shared by the storage engines:
//!
//! - [`Key`]: an opaque binary key
//! - [`Error`] / [`Result`]: the error taxonomy for every store operation
//! - [`ErrorBatch`]: an accumulator for operations that touch both tiers
//! - [`Fsdb`]: the store contract implemented by the local and hybrid engines
//! - [`Bucket`]: the remote object-store contract the hybrid engine consumes
//!
//! The engines themselves live in the `fsdb-local` and `fsdb-hybrid` crates.

pub mod bucket;
pub mod error;
pub mod key;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use bucket::{Bucket, BucketError, BucketResult, MockBucket, ObjectStoreBucket, OperationDelay};
pub use error::{Error, ErrorBatch, Result};
pub use key::Key;

/// Re-exported so callers don't need a direct `tokio-util` dependency just to
/// drive cancellation.
pub use tokio_util::sync::CancellationToken;

/// A streaming value handle returned by [`Fsdb::read`] and consumed by
/// [`Fsdb::write`].
///
/// Readers returned by `read` own the underlying file handle; dropping the
/// stream releases it.
pub type ValueStream = Box<dyn AsyncRead + Send + Unpin>;

/// The store contract.
///
/// All operations honor the [`CancellationToken`]: once the token is
/// cancelled, in-flight calls return [`Error::Cancelled`] at their next
/// checkpoint without corrupting on-disk state.
#[async_trait]
pub trait Fsdb: Send + Sync {
    /// Opens an entry for reading.
    ///
    /// Returns [`Error::NoSuchKey`] if the key does not exist.
    async fn read(&self, token: &CancellationToken, key: &Key) -> Result<ValueStream>;

    /// Writes an entry, replacing any previous value for the key.
    async fn write(&self, token: &CancellationToken, key: &Key, data: ValueStream) -> Result<()>;

    /// Deletes an entry.
    ///
    /// Returns [`Error::NoSuchKey`] if the key does not exist.
    async fn delete(&self, token: &CancellationToken, key: &Key) -> Result<()>;
}
