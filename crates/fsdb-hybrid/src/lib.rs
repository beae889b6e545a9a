//! Hybrid tier for fsdb.
//!
//! A [`HybridStore`] layers a remote object-store bucket behind a local
//! filesystem engine:
//!
//! - **Read** tries the local tier first, then fetches from the bucket on a
//!   local miss, caching the value locally until the next upload cycle
//!   migrates it out again.
//! - **Write** only touches the local tier; durability in the bucket comes
//!   from the background upload loop.
//! - **Delete** removes from both tiers and combines their failures.
//!
//! ## The upload loop
//!
//! A background task scans the local tier on a fixed interval and promotes
//! eligible entries to the bucket (gzip, best compression). An entry's local
//! copy is deleted only if a post-upload re-read produces the same CRC-32C
//! as the bytes that were uploaded — if a write raced the upload, the local
//! copy stays and the next cycle uploads the new value. A configurable skip
//! predicate can pin entries to the local tier.
//!
//! Cycles never overlap: each cycle drains its worker pool before the next
//! timer tick is honored, and the scan blocks on a bounded channel while
//! all workers are busy, which keeps scan memory flat regardless of store
//! size.
//!
//! ## Races
//!
//! Two windows would otherwise lose data, and both are closed by an
//! optional per-key lock ([`RowLock`]) plus a re-check:
//!
//! 1. *Remote fill after read*: a slow bucket download finishing after a
//!    fresh local write must not overwrite it with stale remote data — the
//!    fill re-checks the local tier under the lock.
//! 2. *Delete after upload*: the uploader must not delete a local value
//!    that changed while it was uploading — the CRC-guarded commit above,
//!    performed under the same lock.

pub mod config;
pub mod rowlock;
pub mod store;
mod uploader;

pub use config::{
    default_remote_name, retain_all, upload_all, HybridConfig, RemoteNameFn, SkipFn,
};
pub use rowlock::RowLock;
pub use store::HybridStore;
