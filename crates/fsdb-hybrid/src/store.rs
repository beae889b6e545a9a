//! The hybrid store: layered reads, local-only writes, dual-tier deletes.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use fsdb_core::{
    Bucket, CancellationToken, Error, ErrorBatch, Fsdb, Key, Result, ValueStream,
};
use fsdb_local::LocalStore;

use crate::config::{HybridConfig, SkipFn};
use crate::rowlock::RowLock;
use crate::uploader;

/// A store backed by a local engine and a remote bucket.
///
/// There is no close operation; cancel the token passed to [`open`] to stop
/// the background upload loop. Drivers for the bucket side are supplied by
/// the embedding program (any `object_store` backend works through
/// `ObjectStoreBucket`).
///
/// [`open`]: HybridStore::open
pub struct HybridStore {
    pub(crate) local: Arc<LocalStore>,
    pub(crate) bucket: Arc<dyn Bucket>,
    pub(crate) config: HybridConfig,
    pub(crate) locks: RowLock,
    pub(crate) skip: RwLock<SkipFn>,
}

impl HybridStore {
    /// Opens a hybrid store and starts its upload loop.
    ///
    /// The loop runs until `token` is cancelled; in-flight uploads drain
    /// before the loop exits.
    pub fn open(
        local: Arc<LocalStore>,
        bucket: Arc<dyn Bucket>,
        config: HybridConfig,
        token: CancellationToken,
    ) -> Arc<Self> {
        let skip = RwLock::new(config.skip_fn.clone());
        let store = Arc::new(Self {
            local,
            bucket,
            config,
            locks: RowLock::new(),
            skip,
        });
        tokio::spawn(uploader::run_upload_loop(store.clone(), token));
        store
    }

    /// The underlying local engine.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// Replaces the skip predicate used by subsequent upload cycles.
    pub async fn set_skip_fn(&self, skip_fn: SkipFn) {
        *self.skip.write().await = skip_fn;
    }

    /// Reads a key: local tier first, then the bucket.
    ///
    /// A value fetched from the bucket is written back to the local tier as
    /// a cache — unless a concurrent write landed while the download was in
    /// flight, which the re-check under the row lock detects; the fresher
    /// local value wins over the stale remote payload.
    pub async fn read(&self, token: &CancellationToken, key: &Key) -> Result<ValueStream> {
        checkpoint(token)?;

        match self.local.read(token, key).await {
            Ok(reader) => return Ok(Box::new(reader)),
            Err(err) if err.is_no_such_key() => {}
            Err(err) => return Err(err),
        }

        match self.fetch_remote(token, key).await {
            Ok(payload) => {
                checkpoint(token)?;
                let _guard = self.lock_row(key).await;
                match self.local.read(token, key).await {
                    Ok(reader) => return Ok(Box::new(reader)),
                    Err(err) if err.is_no_such_key() => {}
                    Err(err) => return Err(err),
                }
                self.local.write(token, key, Cursor::new(payload)).await?;
                let reader = self.local.read(token, key).await?;
                Ok(Box::new(reader))
            }
            Err(Error::Bucket(err)) if self.bucket.is_not_exist(&err) => {
                // Missing in both tiers; the final local read yields the
                // NoSuchKey (or picks up an entry that appeared meanwhile).
                let reader = self.local.read(token, key).await?;
                Ok(Box::new(reader))
            }
            Err(err) => Err(err),
        }
    }

    /// Writes a key to the local tier. The upload loop promotes it to the
    /// bucket later.
    pub async fn write(&self, token: &CancellationToken, key: &Key, data: ValueStream) -> Result<()> {
        checkpoint(token)?;

        let _guard = self.lock_row(key).await;
        self.local.write(token, key, data).await
    }

    /// Deletes a key from both tiers.
    ///
    /// Both deletes are attempted regardless of which one fails; non-missing
    /// failures are combined into one error. If neither tier had the key the
    /// result is [`Error::NoSuchKey`].
    pub async fn delete(&self, token: &CancellationToken, key: &Key) -> Result<()> {
        checkpoint(token)?;

        let mut batch = ErrorBatch::new();
        let mut exists_neither = true;

        match self.local.delete(token, key).await {
            Ok(()) => exists_neither = false,
            Err(err) if err.is_no_such_key() => {}
            Err(err) => {
                exists_neither = false;
                batch.add(err);
            }
        }

        let name = (self.config.remote_name_fn)(key);
        match self.bucket.delete(&name).await {
            Ok(()) => exists_neither = false,
            Err(err) if self.bucket.is_not_exist(&err) => {}
            Err(err) => {
                exists_neither = false;
                batch.add(Error::Bucket(err));
            }
        }

        if exists_neither {
            return Err(Error::no_such_key(key));
        }
        batch.into_result()
    }

    /// Downloads and decompresses the remote copy of a key.
    async fn fetch_remote(&self, token: &CancellationToken, key: &Key) -> Result<Bytes> {
        checkpoint(token)?;

        let name = (self.config.remote_name_fn)(key);
        let started = Instant::now();
        let compressed = self.bucket.read(&name).await?;
        debug!(
            key = %key,
            elapsed = ?started.elapsed(),
            "downloaded object from bucket"
        );
        checkpoint(token)?;

        uploader::gunzip(compressed).await
    }

    pub(crate) async fn lock_row(&self, key: &Key) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        if self.config.use_row_lock {
            Some(self.locks.lock(key).await)
        } else {
            None
        }
    }
}

#[async_trait]
impl Fsdb for HybridStore {
    async fn read(&self, token: &CancellationToken, key: &Key) -> Result<ValueStream> {
        HybridStore::read(self, token, key).await
    }

    async fn write(&self, token: &CancellationToken, key: &Key, data: ValueStream) -> Result<()> {
        HybridStore::write(self, token, key, data).await
    }

    async fn delete(&self, token: &CancellationToken, key: &Key) -> Result<()> {
        HybridStore::delete(self, token, key).await
    }
}

pub(crate) fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
