//! Local filesystem engine for fsdb.
//!
//! This crate implements an atomic, lock-free, hash-partitioned on-disk map
//! from opaque binary keys to opaque binary blobs.
//!
//! ## On-disk layout
//!
//! Each key owns one *entry directory* derived from the hash of its bytes:
//!
//! ```text
//! <root>/
//!   data/
//!     <h0>/<h1>/<h2>/<tail>/     entry directory (two hex chars per level,
//!       key                      remainder as the final component)
//!       data                     uncompressed value, or
//!       data.gz                  gzip-compressed value
//!   _tmp/
//!     fsdb_<random>/             one staging directory per in-flight write
//! ```
//!
//! The `key` file holds the raw key bytes, which lets the engine detect hash
//! collisions between distinct keys instead of silently mixing their values.
//! The fan-out depth exists for filesystems with per-directory inode limits;
//! the default hash is SHA-512/224 (chosen for its comparatively short hex
//! form) at depth 3.
//!
//! ## Atomicity
//!
//! Writes never take a lock. A write stages both files under `_tmp/`, then
//! renames the data file into place and the key file last. Readers that
//! observe the key file therefore always observe a fully written data file
//! on the same path; a crash mid-write leaves at worst an orphan data file
//! that a later write overwrites or the scan's empty-directory sweep cleans
//! up after deletion. `data/` and `_tmp/` must live on the same filesystem
//! so that rename is atomic.
//!
//! ## Reads and compression
//!
//! The compression option only affects new writes. Reads probe the preferred
//! variant first and fall back to the other, so flipping compression on a
//! populated store is safe and converts entries incrementally as they are
//! rewritten.
//!
//! ## Example
//!
//! ```ignore
//! use fsdb_core::{CancellationToken, Fsdb, Key};
//! use fsdb_local::{LocalConfig, LocalStore};
//!
//! let store = LocalStore::open(LocalConfig::new("/var/lib/myapp"));
//! let token = CancellationToken::new();
//!
//! store.write(&token, &Key::from("foo"), Box::new(&b"bar"[..])).await?;
//! let value = store.read(&token, &Key::from("foo")).await?.into_bytes().await?;
//! ```

pub mod config;
pub mod reader;
pub mod store;

pub use config::{KeyHashFn, LocalConfig};
pub use reader::ValueReader;
pub use store::{
    ignore_all, stop_on_error, LocalStore, DATA_FILENAME, GZIP_DATA_FILENAME, KEY_FILENAME,
};
