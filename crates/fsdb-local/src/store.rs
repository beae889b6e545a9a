//! The local store: read/write/delete pipelines and the cooperative scan.
//!
//! ## Write pipeline
//!
//! A write commits in four steps:
//!
//! 1. If a `key` file already exists at the destination, verify it matches
//!    the incoming key (mismatch is a hash collision and aborts with no
//!    state change).
//! 2. Stage the key file and the data file under a fresh directory in
//!    `_tmp/`. The staging directory is removed on every exit path.
//! 3. Create the destination directory, rename the staged data file into
//!    place, and remove a lingering other-variant data file if present.
//! 4. Rename the staged key file into place.
//!
//! Between steps 3 and 4 readers see either the old committed entry or, once
//! the key file lands, the new one; they never see a partially written data
//! file because data only ever arrives by rename.

use std::future::Future;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use fsdb_core::{CancellationToken, Error, Fsdb, Key, Result, ValueStream};

use crate::config::LocalConfig;
use crate::reader::ValueReader;

/// Filenames used under an entry directory.
pub const KEY_FILENAME: &str = "key";
pub const DATA_FILENAME: &str = "data";
pub const GZIP_DATA_FILENAME: &str = "data.gz";

const STAGING_PREFIX: &str = "fsdb_";

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// An error-callback policy for [`LocalStore::scan_keys`] that skips every
/// I/O error it encounters.
pub fn ignore_all(_path: &Path, _err: &Error) -> bool {
    true
}

/// An error-callback policy for [`LocalStore::scan_keys`] that aborts the
/// scan at the first I/O error.
pub fn stop_on_error(_path: &Path, _err: &Error) -> bool {
    false
}

/// The local filesystem engine.
///
/// Opening is cheap and touches nothing on disk; directories are created
/// lazily by the first write. There is no close operation. The configured
/// data and temp directories must share a filesystem — rename atomicity is
/// what makes writes safe against concurrent readers and crashes.
pub struct LocalStore {
    config: LocalConfig,
}

impl LocalStore {
    pub fn open(config: LocalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Opens an entry for reading.
    ///
    /// Probes the preferred data-file variant first and falls back to the
    /// other, so entries written under a different compression setting stay
    /// readable. A key file with no data file reads as [`Error::NoSuchKey`]:
    /// the entry is either mid-commit or left over from a crash, and is
    /// repaired by the next write or reaped after a delete.
    pub async fn read(&self, token: &CancellationToken, key: &Key) -> Result<ValueReader> {
        checkpoint(token)?;

        let dir = self.config.entry_dir(key);
        let stored = read_key_file(&dir.join(KEY_FILENAME))
            .await?
            .ok_or_else(|| Error::no_such_key(key))?;
        check_collision(key, stored)?;
        checkpoint(token)?;

        let order = if self.config.use_gzip {
            [true, false]
        } else {
            [false, true]
        };
        for gzip in order {
            if let Some(reader) = self.open_data(&dir, gzip).await? {
                return Ok(reader);
            }
        }
        Err(Error::no_such_key(key))
    }

    /// Writes an entry, replacing any previous value.
    pub async fn write<R>(&self, token: &CancellationToken, key: &Key, mut data: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        checkpoint(token)?;

        let dir = self.config.entry_dir(key);
        let key_path = dir.join(KEY_FILENAME);
        if let Some(stored) = read_key_file(&key_path).await? {
            check_collision(key, stored)?;
        }

        let staging = StagingDir::create(&self.config.temp_root()).await?;
        checkpoint(token)?;

        let staged_key = staging.file(KEY_FILENAME);
        write_file(&staged_key, key.as_bytes()).await?;
        checkpoint(token)?;

        let (data_filename, other_filename) = if self.config.use_gzip {
            (GZIP_DATA_FILENAME, DATA_FILENAME)
        } else {
            (DATA_FILENAME, GZIP_DATA_FILENAME)
        };
        let staged_data = staging.file(data_filename);
        if self.config.use_gzip {
            let mut buf = Vec::new();
            data.read_to_end(&mut buf)
                .await
                .map_err(|e| Error::io(&staged_data, e))?;
            let level = Compression::new(self.config.gzip_level);
            let path = staged_data.clone();
            run_blocking_io(&staged_data, move || {
                let mut encoder = GzEncoder::new(create_file_sync(&path)?, level);
                encoder.write_all(&buf)?;
                encoder.finish()?;
                Ok(())
            })
            .await?;
        } else {
            let mut file = create_file(&staged_data).await?;
            tokio::io::copy(&mut data, &mut file)
                .await
                .map_err(|e| Error::io(&staged_data, e))?;
            file.flush().await.map_err(|e| Error::io(&staged_data, e))?;
        }
        checkpoint(token)?;

        dir_builder().create(&dir).await.map_err(|e| Error::io(&dir, e))?;
        let final_data = dir.join(data_filename);
        fs::rename(&staged_data, &final_data)
            .await
            .map_err(|e| Error::io(&final_data, e))?;
        let other = dir.join(other_filename);
        match fs::remove_file(&other).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(other, e)),
        }
        checkpoint(token)?;

        // Commit: the key file appearing at its final path is what makes
        // the entry visible to readers.
        fs::rename(&staged_key, &key_path)
            .await
            .map_err(|e| Error::io(&key_path, e))
    }

    /// Deletes an entry, removing its whole directory.
    pub async fn delete(&self, token: &CancellationToken, key: &Key) -> Result<()> {
        checkpoint(token)?;

        let dir = self.config.entry_dir(key);
        let stored = read_key_file(&dir.join(KEY_FILENAME))
            .await?
            .ok_or_else(|| Error::no_such_key(key))?;
        check_collision(key, stored)?;
        checkpoint(token)?;

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(dir, e)),
        }
    }

    /// Walks the entry tree and invokes `on_key` for every stored key.
    ///
    /// `on_key` returns `false` to stop the walk early (not an error). Its
    /// result is awaited, so a callback may block — this is how the hybrid
    /// tier applies back-pressure from its upload workers.
    ///
    /// `on_err` receives every I/O error together with the offending path;
    /// returning `true` skips that subtree and continues, returning `false`
    /// aborts the walk with the error. Keys written or deleted while the
    /// walk is running have unspecified visibility, and files vanishing
    /// mid-walk are expected — they surface as `NotFound` errors on
    /// `on_err`.
    ///
    /// Every directory visited gets a best-effort empty-directory removal
    /// (removal only succeeds when the directory is empty, so this is safe
    /// against concurrent writers). A directory that only becomes empty
    /// later in the walk is collected by the next scan.
    ///
    /// This walk is heavy on I/O for large stores; use with care.
    pub async fn scan_keys<F, Fut, E>(
        &self,
        token: &CancellationToken,
        mut on_key: F,
        mut on_err: E,
    ) -> Result<()>
    where
        F: FnMut(Key) -> Fut + Send,
        Fut: Future<Output = bool> + Send,
        E: FnMut(&Path, &Error) -> bool + Send,
    {
        checkpoint(token)?;

        let mut pending = vec![self.config.data_root()];
        while let Some(dir) = pending.pop() {
            checkpoint(token)?;

            if fs::remove_dir(&dir).await.is_ok() {
                trace!(path = %dir.display(), "removed empty directory");
                continue;
            }

            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    let err = Error::io(&dir, e);
                    if on_err(&dir, &err) {
                        continue;
                    }
                    return Err(err);
                }
            };

            'listing: loop {
                checkpoint(token)?;

                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        let err = Error::io(&dir, e);
                        if on_err(&dir, &err) {
                            break 'listing;
                        }
                        return Err(err);
                    }
                };
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        let err = Error::io(&path, e);
                        if on_err(&path, &err) {
                            continue;
                        }
                        return Err(err);
                    }
                };
                if file_type.is_dir() {
                    pending.push(path);
                } else if entry.file_name() == KEY_FILENAME {
                    match fs::read(&path).await {
                        Ok(bytes) => {
                            if !on_key(Key::from(bytes)).await {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            let err = Error::io(&path, e);
                            if on_err(&path, &err) {
                                continue;
                            }
                            return Err(err);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn open_data(&self, dir: &Path, gzip: bool) -> Result<Option<ValueReader>> {
        if gzip {
            let path = dir.join(GZIP_DATA_FILENAME);
            let blocking_path = path.clone();
            let result = run_blocking_io(&path, move || {
                let file = std::fs::File::open(&blocking_path)?;
                let mut decoder = GzDecoder::new(BufReader::new(file));
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf)?;
                Ok(buf)
            })
            .await;
            match result {
                Ok(buf) => Ok(Some(ValueReader::buffered(buf))),
                Err(e) if is_not_found(&e) => Ok(None),
                Err(e) => Err(e),
            }
        } else {
            let path = dir.join(DATA_FILENAME);
            match fs::File::open(&path).await {
                Ok(file) => Ok(Some(ValueReader::plain(file))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::io(path, e)),
            }
        }
    }
}

#[async_trait]
impl Fsdb for LocalStore {
    async fn read(&self, token: &CancellationToken, key: &Key) -> Result<ValueStream> {
        let reader = LocalStore::read(self, token, key).await?;
        Ok(Box::new(reader))
    }

    async fn write(&self, token: &CancellationToken, key: &Key, data: ValueStream) -> Result<()> {
        LocalStore::write(self, token, key, data).await
    }

    async fn delete(&self, token: &CancellationToken, key: &Key) -> Result<()> {
        LocalStore::delete(self, token, key).await
    }
}

fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
}

/// Reads the stored key bytes, or `None` if the key file is absent.
async fn read_key_file(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn check_collision(requested: &Key, stored: Vec<u8>) -> Result<()> {
    if stored == requested.as_bytes() {
        Ok(())
    } else {
        Err(Error::KeyCollision {
            requested: requested.clone(),
            stored: Key::from(stored),
        })
    }
}

async fn create_file(path: &Path) -> Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options.open(path).await.map_err(|e| Error::io(path, e))
}

fn create_file_sync(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    options.open(path)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = create_file(path).await?;
    file.write_all(bytes).await.map_err(|e| Error::io(path, e))?;
    file.flush().await.map_err(|e| Error::io(path, e))
}

fn dir_builder() -> fs::DirBuilder {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder
}

async fn run_blocking_io<T, F>(path: &Path, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::io(path, std::io::Error::other(e)))?
        .map_err(|e| Error::io(path, e))
}

/// A per-write staging directory under `_tmp/`, removed on drop.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    async fn create(temp_root: &Path) -> Result<Self> {
        dir_builder()
            .create(temp_root)
            .await
            .map_err(|e| Error::io(temp_root, e))?;
        loop {
            let name = format!("{STAGING_PREFIX}{:016x}", rand::random::<u64>());
            let path = temp_root.join(name);
            let mut builder = fs::DirBuilder::new();
            #[cfg(unix)]
            builder.mode(DIR_MODE);
            match builder.create(&path).await {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::io(path, e)),
            }
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove staging directory"
                );
            }
        }
    }
}
