//! Error types for fsdb operations.
//!
//! All store operations return [`Result<T>`]. The variants that matter for
//! control flow are:
//!
//! - [`Error::NoSuchKey`]: read/delete of an absent key. Discriminable via
//!   [`Error::is_no_such_key`]; the hybrid tier uses it to decide when to
//!   fall through to the remote bucket.
//! - [`Error::KeyCollision`]: two distinct keys hashed to the same entry
//!   directory. Never recovered automatically.
//! - [`Error::Cancelled`]: the operation observed a cancelled token at a
//!   checkpoint. On-disk state is left consistent.
//!
//! Filesystem failures carry the offending path ([`Error::Io`]); remote
//! failures wrap the bucket driver's error ([`Error::Bucket`]); operations
//! that touch both tiers may report several causes at once
//! ([`Error::Batch`], built with [`ErrorBatch`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::bucket::BucketError;
use crate::key::Key;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such key: {key}")]
    NoSuchKey { key: Key },

    #[error("key collision detected: requested key is {requested}, stored key was {stored}")]
    KeyCollision { requested: Key, stored: Key },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),

    #[error("{}", format_batch(.0))]
    Batch(Vec<Error>),
}

fn format_batch(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Attaches path context to a filesystem error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn no_such_key(key: &Key) -> Self {
        Error::NoSuchKey { key: key.clone() }
    }

    /// True iff this error means the key does not exist.
    pub fn is_no_such_key(&self) -> bool {
        matches!(self, Error::NoSuchKey { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Accumulates zero or more failures into one reported error.
///
/// Used by operations that must attempt several independent sub-operations
/// before reporting (the hybrid delete touches both tiers regardless of
/// which one fails first).
#[derive(Debug, Default)]
pub struct ErrorBatch {
    errors: Vec<Error>,
}

impl ErrorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error to the batch. Nested batches are flattened.
    pub fn add(&mut self, err: Error) {
        match err {
            Error::Batch(children) => {
                for child in children {
                    self.add(child);
                }
            }
            err => self.errors.push(err),
        }
    }

    /// Adds the error of a failed result, if any.
    pub fn add_result<T>(&mut self, result: Result<T>) {
        if let Err(err) = result {
            self.add(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Compiles the batch: `Ok(())` for zero errors, the sole error for
    /// exactly one, the batch itself otherwise.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Batch(self.errors)),
        }
    }
}
