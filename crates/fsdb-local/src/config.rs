//! Configuration for the local engine.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use fsdb_core::Key;
use sha2::{Digest, Sha512_224};

/// Hashes key bytes into the digest that determines the entry directory.
pub type KeyHashFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Two hex characters per directory level.
const CHARS_PER_LEVEL: usize = 2;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_TEMP_DIR: &str = "_tmp";
pub const DEFAULT_DIR_LEVELS: usize = 3;

/// The default key hash, SHA-512/224.
///
/// Chosen for its relatively short digest, which keeps entry paths short.
pub fn default_hash_fn() -> KeyHashFn {
    Arc::new(|bytes| Sha512_224::digest(bytes).to_vec())
}

/// Options for a [`LocalStore`](crate::LocalStore).
///
/// The compression options are safe to change on an existing store (reads
/// probe both on-disk variants). Changing the hash function, directory
/// names, or fan-out depth on an existing store makes previously written
/// entries unreachable.
#[derive(Clone)]
pub struct LocalConfig {
    /// Installation root; `data_dir` and `temp_dir` are created under it.
    pub root: PathBuf,
    /// Name of the entry tree root under `root` (default: `data`).
    pub data_dir: String,
    /// Name of the staging area under `root` (default: `_tmp`). Must share
    /// a filesystem with `data_dir` so that rename is atomic.
    pub temp_dir: String,
    /// Number of two-hex-character directory levels (default: 3).
    pub dir_levels: usize,
    /// Whether new writes are gzip-compressed (default: false).
    pub use_gzip: bool,
    /// Gzip level for new writes, 0-9 (default: 6).
    pub gzip_level: u32,
    /// Hash from key bytes to entry-directory digest (default: SHA-512/224).
    pub hash_fn: KeyHashFn,
}

impl LocalConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            data_dir: DEFAULT_DATA_DIR.to_string(),
            temp_dir: DEFAULT_TEMP_DIR.to_string(),
            dir_levels: DEFAULT_DIR_LEVELS,
            use_gzip: false,
            gzip_level: flate2::Compression::default().level(),
            hash_fn: default_hash_fn(),
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<String>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_dir_levels(mut self, levels: usize) -> Self {
        self.dir_levels = levels;
        self
    }

    pub fn with_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = use_gzip;
        self
    }

    pub fn with_gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level;
        self
    }

    pub fn with_hash_fn(mut self, hash_fn: KeyHashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    /// Root of the entry tree.
    pub fn data_root(&self) -> PathBuf {
        self.root.join(&self.data_dir)
    }

    /// Parent of the per-write staging directories.
    pub fn temp_root(&self) -> PathBuf {
        self.root.join(&self.temp_dir)
    }

    /// The entry directory for a key.
    ///
    /// The key's digest is hex-encoded; each of the first `dir_levels`
    /// two-character slices becomes a directory component and the remainder
    /// becomes the final component. A digest shorter than the configured
    /// depth simply stops early.
    pub fn entry_dir(&self, key: &Key) -> PathBuf {
        let digest = hex::encode((self.hash_fn)(key.as_bytes()));
        let mut path = self.data_root();
        let mut rest = digest.as_str();
        for _ in 0..self.dir_levels {
            if rest.is_empty() {
                break;
            }
            let split = CHARS_PER_LEVEL.min(rest.len());
            let (level, tail) = rest.split_at(split);
            path.push(level);
            rest = tail;
        }
        if !rest.is_empty() {
            path.push(rest);
        }
        path
    }
}

impl fmt::Debug for LocalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConfig")
            .field("root", &self.root)
            .field("data_dir", &self.data_dir)
            .field("temp_dir", &self.temp_dir)
            .field("dir_levels", &self.dir_levels)
            .field("use_gzip", &self.use_gzip)
            .field("gzip_level", &self.gzip_level)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_hash(bytes: &'static [u8]) -> KeyHashFn {
        Arc::new(move |_| bytes.to_vec())
    }

    #[test]
    fn entry_dir_splits_two_hex_chars_per_level() {
        let config =
            LocalConfig::new("/root").with_hash_fn(fixed_hash(&[0xde, 0xad, 0xbe, 0xef, 0x01]));
        assert_eq!(
            config.entry_dir(&Key::from("anything")),
            PathBuf::from("/root/data/de/ad/be/ef01"),
        );
    }

    #[test]
    fn entry_dir_without_tail() {
        let config = LocalConfig::new("/root")
            .with_dir_levels(2)
            .with_hash_fn(fixed_hash(&[0xab, 0xcd]));
        assert_eq!(
            config.entry_dir(&Key::from("k")),
            PathBuf::from("/root/data/ab/cd"),
        );
    }

    #[test]
    fn entry_dir_with_short_digest() {
        let config = LocalConfig::new("/root").with_hash_fn(fixed_hash(&[0xab]));
        assert_eq!(
            config.entry_dir(&Key::from("k")),
            PathBuf::from("/root/data/ab"),
        );
    }

    #[test]
    fn default_digest_is_sha512_224() {
        let config = LocalConfig::new("/root");
        let digest = (config.hash_fn)(b"foo");
        // SHA-512/224 digests are 28 bytes, i.e. 56 hex characters:
        // 3 levels of 2 chars plus a 50-char tail.
        assert_eq!(digest.len(), 28);
        let dir = config.entry_dir(&Key::from("foo"));
        let components: Vec<_> = dir
            .strip_prefix("/root/data")
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(components.len(), 4);
        assert_eq!(components[0].len(), 2);
        assert_eq!(components[1].len(), 2);
        assert_eq!(components[2].len(), 2);
        assert_eq!(components[3].len(), 50);
        assert_eq!(components.concat(), hex::encode(&digest));
    }

    #[test]
    fn distinct_keys_use_distinct_dirs() {
        let config = LocalConfig::new("/root");
        assert_ne!(
            config.entry_dir(&Key::from("foo")),
            config.entry_dir(&Key::from("bar")),
        );
    }
}
