//! Configuration for the hybrid store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fsdb_core::Key;
use sha2::{Digest, Sha512_224};

/// Maps a key to its object name in the remote bucket. Must be injective.
pub type RemoteNameFn = Arc<dyn Fn(&Key) -> String + Send + Sync>;

/// Decides per key whether to retain it locally (`true`) instead of
/// uploading it to the bucket (`false`).
pub type SkipFn = Arc<dyn Fn(&Key) -> bool + Send + Sync>;

pub const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_UPLOAD_WORKERS: usize = 5;

/// The default remote object name: `fsdb/data/<hex sha-512/224 of key>.gz`.
pub fn default_remote_name(key: &Key) -> String {
    let digest = Sha512_224::digest(key.as_bytes());
    format!("fsdb/data/{}.gz", hex::encode(digest))
}

/// A skip predicate that uploads everything to the bucket.
pub fn upload_all() -> SkipFn {
    Arc::new(|_| false)
}

/// A skip predicate that retains everything locally.
pub fn retain_all() -> SkipFn {
    Arc::new(|_| true)
}

/// Options for a [`HybridStore`](crate::HybridStore).
#[derive(Clone)]
pub struct HybridConfig {
    /// Period between upload cycles (default: 5 minutes).
    pub upload_interval: Duration,
    /// Concurrent uploads per cycle (default: 5). More workers upload
    /// faster at the cost of heavier disk and network load.
    pub upload_workers: usize,
    /// Whether to serialize the hybrid tier's two race windows against
    /// client writes with a per-key lock (default: true). Disabling it
    /// removes the serialization cost but permits stale remote data to
    /// overwrite a concurrent write.
    pub use_row_lock: bool,
    /// Key → remote object name (default: [`default_remote_name`]).
    pub remote_name_fn: RemoteNameFn,
    /// Initial skip predicate (default: upload everything). Replaceable at
    /// runtime via
    /// [`HybridStore::set_skip_fn`](crate::HybridStore::set_skip_fn),
    /// because a predicate may itself want to read from the store.
    pub skip_fn: SkipFn,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            upload_interval: DEFAULT_UPLOAD_INTERVAL,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            use_row_lock: true,
            remote_name_fn: Arc::new(default_remote_name),
            skip_fn: upload_all(),
        }
    }
}

impl HybridConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upload_interval(mut self, interval: Duration) -> Self {
        self.upload_interval = interval;
        self
    }

    pub fn with_upload_workers(mut self, workers: usize) -> Self {
        self.upload_workers = workers;
        self
    }

    pub fn with_row_lock(mut self, use_row_lock: bool) -> Self {
        self.use_row_lock = use_row_lock;
        self
    }

    pub fn with_remote_name_fn(mut self, remote_name_fn: RemoteNameFn) -> Self {
        self.remote_name_fn = remote_name_fn;
        self
    }

    pub fn with_skip_fn(mut self, skip_fn: SkipFn) -> Self {
        self.skip_fn = skip_fn;
        self
    }
}

impl fmt::Debug for HybridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridConfig")
            .field("upload_interval", &self.upload_interval)
            .field("upload_workers", &self.upload_workers)
            .field("use_row_lock", &self.use_row_lock)
            .finish_non_exhaustive()
    }
}
