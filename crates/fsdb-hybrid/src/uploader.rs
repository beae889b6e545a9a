//! The background upload loop.
//!
//! One cycle per timer tick: scan the local tier, pump eligible keys
//! through a bounded channel into a fixed pool of worker tasks, drain the
//! pool, log a summary. Cycles never overlap. Per-key failures are logged
//! and counted, never propagated — whatever failed is still local and the
//! next cycle retries it.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use fsdb_core::{BucketError, CancellationToken, Error, Key, Result};

use crate::store::{checkpoint, HybridStore};

/// Capacity of the scan → worker channel. Deliberately tiny: the scan must
/// block while every worker is busy, which is the back-pressure that keeps
/// a cycle's memory flat regardless of store size.
const KEY_CHANNEL_CAPACITY: usize = 1;

#[derive(Default)]
struct CycleCounters {
    scanned: AtomicU64,
    skipped: AtomicU64,
    uploaded: AtomicU64,
    failed: AtomicU64,
}

pub(crate) async fn run_upload_loop(store: Arc<HybridStore>, token: CancellationToken) {
    let mut ticker = interval(store.config.upload_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so the first cycle
    // runs one full interval after open.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("upload loop stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        run_cycle(&store, &token).await;
    }
}

async fn run_cycle(store: &Arc<HybridStore>, token: &CancellationToken) {
    let started = Instant::now();
    let counters = Arc::new(CycleCounters::default());
    let (tx, rx) = mpsc::channel::<Key>(KEY_CHANNEL_CAPACITY);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut workers = JoinSet::new();
    for _ in 0..store.config.upload_workers.max(1) {
        let store = store.clone();
        let token = token.clone();
        let rx = rx.clone();
        let counters = counters.clone();
        workers.spawn(async move {
            loop {
                let key = rx.lock().await.recv().await;
                let Some(key) = key else { return };
                if token.is_cancelled() {
                    return;
                }
                match upload_key(&store, &token, &key).await {
                    Ok(()) => {
                        counters.uploaded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        // Whatever failed is still local; the next cycle
                        // retries it.
                        warn!(key = %key, error = %err, "failed to upload key to bucket");
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });
    }

    let scan_result = store
        .local
        .scan_keys(
            token,
            |key| {
                let tx = tx.clone();
                let counters = counters.clone();
                async move {
                    counters.scanned.fetch_add(1, Ordering::Relaxed);
                    let retain = { (store.skip.read().await)(&key) };
                    if retain {
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                        return true;
                    }
                    // Blocks while every worker is busy; fails only once
                    // the workers shut down, which stops the scan.
                    tx.send(key).await.is_ok()
                }
            },
            |path, err| {
                // Vanished-file races are expected while writers and the
                // upload workers mutate the tree under the scan.
                if !is_vanished(err) {
                    warn!(path = %path.display(), error = %err, "scan reported an error");
                }
                true
            },
        )
        .await;
    drop(tx);

    if let Err(err) = scan_result {
        if !err.is_cancelled() {
            warn!(error = %err, "scan failed");
        }
    }
    while workers.join_next().await.is_some() {}

    info!(
        elapsed = ?started.elapsed(),
        scanned = counters.scanned.load(Ordering::Relaxed),
        skipped = counters.skipped.load(Ordering::Relaxed),
        uploaded = counters.uploaded.load(Ordering::Relaxed),
        failed = counters.failed.load(Ordering::Relaxed),
        "upload cycle complete"
    );
}

/// Uploads one key to the bucket and, if its value did not change while the
/// upload ran, deletes the local copy.
async fn upload_key(store: &Arc<HybridStore>, token: &CancellationToken, key: &Key) -> Result<()> {
    let (crc_before, content) = read_and_crc(store, token, key).await?;
    let compressed = gzip_best(content).await?;
    checkpoint(token)?;

    let name = (store.config.remote_name_fn)(key);
    store.bucket.write(&name, compressed).await?;
    checkpoint(token)?;

    let _guard = store.lock_row(key).await;
    let (crc_after, _) = read_and_crc(store, token, key).await?;
    checkpoint(token)?;

    if crc_after == crc_before {
        store.local.delete(token, key).await
    } else {
        debug!(key = %key, "value changed during upload, keeping local copy");
        Ok(())
    }
}

/// Reads a key's full local value and its CRC-32C.
async fn read_and_crc(
    store: &HybridStore,
    token: &CancellationToken,
    key: &Key,
) -> Result<(u32, Bytes)> {
    checkpoint(token)?;
    let reader = store.local.read(token, key).await?;
    let bytes = reader
        .into_bytes()
        .await
        .map_err(|e| Error::io(store.local.config().entry_dir(key), e))?;
    checkpoint(token)?;
    Ok((crc32c::crc32c(&bytes), bytes))
}

/// Gzips a full payload at best compression, off the async threads.
async fn gzip_best(data: Bytes) -> Result<Bytes> {
    run_codec(move || {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&data)?;
        encoder.finish()
    })
    .await
}

/// Decompresses a full gzip payload, off the async threads.
pub(crate) async fn gunzip(data: Bytes) -> Result<Bytes> {
    run_codec(move || {
        let mut decoder = GzDecoder::new(&data[..]);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        Ok(buf)
    })
    .await
}

async fn run_codec<F>(work: F) -> Result<Bytes>
where
    F: FnOnce() -> std::io::Result<Vec<u8>> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Bucket(BucketError::other(e)))?
        .map(Bytes::from)
        .map_err(|e| Error::Bucket(BucketError::other(e)))
}

fn is_vanished(err: &Error) -> bool {
    matches!(err, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
}
