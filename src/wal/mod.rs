//! Write-Ahead Logging (WAL) Module
//!
//! A durable, append-only, **encrypted** write-ahead log. Every [`Entry`]
//! is AEAD-sealed before it touches disk, using the same cipher and AAD
//! binding as the SSTable data region (see [`crate::record`]), so a WAL
//! file and an SSTable's data region are byte-for-byte interchangeable in
//! framing.
//!
//! ## On-disk layout
//!
//! There is **no per-file header** — the active file and every archived
//! segment are simply a back-to-back sequence of [`crate::record::RawRecord`]
//! values:
//!
//! ```text
//! [REC_BYTES][REC_BYTES][REC_BYTES]...
//! ```
//!
//! Each record is self-describing (its own internal length fields), so
//! replay needs no outer length prefix or record count.
//!
//! ## Rotation and retention
//!
//! The active segment lives at `<dir>/wal.log`. [`Wal::rotate_now`] closes
//! it, moves it to `<dir>/wal_archive/wal_<unix_nanos>.log`, and opens a
//! fresh active file. Rotation fires on (a) a configured size threshold,
//! (b) a configured elapsed-time interval, or (c) an explicit call.
//! Retention then deletes the oldest archived segments until at most
//! `max_files` remain and the archive directory is at most `max_total_bytes`.
//!
//! ## Concurrency model
//!
//! - WAL access is synchronized via `Arc<Mutex<WalInner>>`.
//! - A background timer thread flushes the write buffer on an interval,
//!   contending the same mutex as foreground appenders.
//! - [`Wal`]'s `Drop` impl best-effort flushes outstanding buffered bytes.


use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::crypto::{self, Crypto, CryptoError};
use crate::encoding::{self, Decode, EncodingError};
use crate::engine::utils::Entry;
use crate::record::RawRecord;

/// Default buffered-write threshold before a forced flush (10 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default interval for the background flush timer.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);

const ACTIVE_FILE_NAME: &str = "wal.log";
const ARCHIVE_DIR_NAME: &str = "wal_archive";

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// AEAD seal/open failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A record failed to open under the configured master key during
    /// replay. Fatal — replay stops immediately.
    #[error("wrong key during WAL replay")]
    WrongKeyAtReplay,

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Rotation and retention tunables for a [`Wal`].
#[derive(Debug, Clone)]
pub struct WalRotationConfig {
    /// Rotate once the active file reaches this many bytes. `None` disables
    /// size-triggered rotation.
    pub size_bytes: Option<u64>,
    /// Rotate once this much time has elapsed since the active segment was
    /// opened. `None` disables interval-triggered rotation.
    pub interval: Option<Duration>,
    /// Keep at most this many archived segments (oldest deleted first).
    pub max_files: Option<usize>,
    /// Keep the archive directory under this many total bytes (oldest
    /// deleted first).
    pub max_total_bytes: Option<u64>,
}

impl Default for WalRotationConfig {
    fn default() -> Self {
        Self {
            size_bytes: Some(64 * 1024 * 1024),
            interval: None,
            max_files: Some(16),
            max_total_bytes: None,
        }
    }
}

/// Counters describing the current archive directory contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveStats {
    /// Number of archived segment files.
    pub file_count: usize,
    /// Total bytes across all archived segment files.
    pub total_bytes: u64,
}

struct WalInner {
    active_file: File,
    active_path: PathBuf,
    dir: PathBuf,
    archive_dir: PathBuf,
    buffer: Vec<u8>,
    active_file_size: u64,
    segment_opened_at: Instant,
    last_flush_at: Instant,
}

impl WalInner {
    fn flush_locked(&mut self) -> Result<(), WalError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.active_file.write_all(&self.buffer)?;
        self.active_file.sync_all()?;
        self.active_file_size += self.buffer.len() as u64;
        self.buffer.clear();
        self.last_flush_at = Instant::now();
        Ok(())
    }
}

/// A durable, encrypted, thread-safe write-ahead log.
pub struct Wal {
    inner: Arc<Mutex<WalInner>>,
    crypto: Arc<Crypto>,
    buffer_size: usize,
    rotation: WalRotationConfig,
    shutdown: Option<crossbeam::channel::Sender<()>>,
    flush_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("buffer_size", &self.buffer_size)
            .field("rotation", &self.rotation)
            .finish_non_exhaustive()
    }
}

impl Wal {
    /// Open (or create) the WAL rooted at `dir`: `<dir>/wal.log` is the
    /// active segment, `<dir>/wal_archive/` holds rotated segments.
    pub fn open(
        dir: impl AsRef<Path>,
        crypto: Arc<Crypto>,
        buffer_size: usize,
        sync_interval: Duration,
        rotation: WalRotationConfig,
    ) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let archive_dir = dir.join(ARCHIVE_DIR_NAME);
        fs::create_dir_all(&archive_dir)?;

        let active_path = dir.join(ACTIVE_FILE_NAME);
        let active_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&active_path)?;
        let active_file_size = active_file.metadata()?.len();

        debug!(path = %active_path.display(), size = active_file_size, "WAL opened");

        let inner = WalInner {
            active_file,
            active_path,
            dir,
            archive_dir,
            buffer: Vec::with_capacity(buffer_size.min(1024 * 1024)),
            active_file_size,
            segment_opened_at: Instant::now(),
            last_flush_at: Instant::now(),
        };

        let inner = Arc::new(Mutex::new(inner));
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(0);
        let flush_thread = spawn_flush_timer(Arc::clone(&inner), sync_interval, shutdown_rx);

        Ok(Self {
            inner,
            crypto,
            buffer_size,
            rotation,
            shutdown: Some(shutdown_tx),
            flush_thread: Some(flush_thread),
        })
    }

    /// Seal and append `entry`. Flushes immediately if the buffer has
    /// reached `buffer_size`; otherwise the write is picked up by the next
    /// timer tick or an explicit [`Wal::flush`].
    pub fn append(&self, entry: &Entry) -> Result<(), WalError> {
        let aad = crypto::entry_aad(&entry.key, entry.timestamp, 0, entry.deleted);
        let (nonce, ciphertext) = self.crypto.seal(&entry.value, &aad)?;
        let raw = RawRecord {
            key: entry.key.clone(),
            nonce,
            ciphertext,
            timestamp: entry.timestamp,
            deleted: entry.deleted,
            checksum: entry.checksum(),
        };
        let bytes = encoding::encode_to_vec(&raw)?;

        let should_rotate = {
            let mut guard = self.lock()?;
            guard.buffer.extend_from_slice(&bytes);

            let should_flush = guard.buffer.len() >= self.buffer_size;
            if should_flush {
                guard.flush_locked()?;
            }

            let size_trip = self
                .rotation
                .size_bytes
                .is_some_and(|limit| guard.active_file_size >= limit);
            let interval_trip = self
                .rotation
                .interval
                .is_some_and(|iv| guard.segment_opened_at.elapsed() >= iv);
            size_trip || interval_trip
        };

        if should_rotate {
            self.rotate_now()?;
        }

        trace!(key_len = entry.key.len(), "WAL entry appended");
        Ok(())
    }

    /// Force any buffered bytes to disk now.
    pub fn flush(&self) -> Result<(), WalError> {
        self.lock()?.flush_locked()
    }

    /// Stream every [`Entry`] from all current WAL files — archived
    /// segments oldest-first, then the active segment — invoking `visitor`
    /// in append order. A truncated trailing record is discarded silently;
    /// an AEAD open failure is fatal ([`WalError::WrongKeyAtReplay`]).
    pub fn replay(
        &self,
        mut visitor: impl FnMut(Entry) -> Result<(), WalError>,
    ) -> Result<(), WalError> {
        self.flush()?;

        for path in self.replay_file_order()? {
            let bytes = fs::read(&path)?;
            let mut offset = 0usize;

            while offset < bytes.len() {
                let raw = match RawRecord::decode_from(&bytes[offset..]) {
                    Ok((raw, consumed)) => {
                        offset += consumed;
                        raw
                    }
                    Err(EncodingError::UnexpectedEof { .. }) => {
                        warn!(path = %path.display(), offset, "WAL tail record truncated, discarding");
                        break;
                    }
                    Err(e) => return Err(WalError::Encoding(e)),
                };

                let aad = crypto::entry_aad(&raw.key, raw.timestamp, 0, raw.deleted);
                let plaintext = self.crypto.open(&raw.nonce, &raw.ciphertext, &aad).map_err(
                    |_| WalError::WrongKeyAtReplay,
                )?;

                let entry = Entry {
                    key: raw.key,
                    value: plaintext,
                    timestamp: raw.timestamp,
                    expires_at: 0,
                    deleted: raw.deleted,
                };

                visitor(entry)?;
            }
        }

        Ok(())
    }

    /// Atomically close the active segment, move it into the archive
    /// directory, and open a fresh active file. Then enforces retention.
    pub fn rotate_now(&self) -> Result<(), WalError> {
        let archived_path = {
            let mut guard = self.lock()?;
            guard.flush_locked()?;

            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            let archived_path = guard.archive_dir.join(format!("wal_{nanos}.log"));

            fs::rename(&guard.active_path, &archived_path)?;

            let fresh_file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&guard.active_path)?;
            guard.active_file = fresh_file;
            guard.active_file_size = 0;
            guard.segment_opened_at = Instant::now();

            debug!(path = %archived_path.display(), "WAL rotated");
            archived_path
        };
        let _ = archived_path;

        self.enforce_retention()
    }

    /// Current archive directory contents.
    pub fn archive_stats(&self) -> Result<ArchiveStats, WalError> {
        let guard = self.lock()?;
        let mut file_count = 0usize;
        let mut total_bytes = 0u64;
        for entry in fs::read_dir(&guard.archive_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                file_count += 1;
                total_bytes += entry.metadata()?.len();
            }
        }
        Ok(ArchiveStats {
            file_count,
            total_bytes,
        })
    }

    /// Current on-disk size of the active segment (excluding unflushed
    /// buffered bytes).
    pub fn active_file_size(&self) -> Result<u64, WalError> {
        Ok(self.lock()?.active_file_size)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WalInner>, WalError> {
        self.inner
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }

    fn replay_file_order(&self) -> Result<Vec<PathBuf>, WalError> {
        let guard = self.lock()?;
        let mut archived = list_archive_files(&guard.archive_dir)?;
        archived.sort_by_key(|(nanos, _)| *nanos);
        let mut paths: Vec<PathBuf> = archived.into_iter().map(|(_, p)| p).collect();
        paths.push(guard.active_path.clone());
        Ok(paths)
    }

    fn enforce_retention(&self) -> Result<(), WalError> {
        let archive_dir = self.lock()?.archive_dir.clone();
        let mut files = list_archive_files(&archive_dir)?;
        files.sort_by_key(|(nanos, _)| *nanos);

        if let Some(max_files) = self.rotation.max_files {
            while files.len() > max_files {
                let (_, oldest) = files.remove(0);
                fs::remove_file(&oldest)?;
                debug!(path = %oldest.display(), "WAL archive evicted (file count retention)");
            }
        }

        if let Some(max_total_bytes) = self.rotation.max_total_bytes {
            let mut total: u64 = files
                .iter()
                .map(|(_, p)| fs::metadata(p).map(|m| m.len()).unwrap_or(0))
                .sum();
            let mut idx = 0;
            while total > max_total_bytes && idx < files.len() {
                let (_, oldest) = &files[idx];
                let size = fs::metadata(oldest).map(|m| m.len()).unwrap_or(0);
                fs::remove_file(oldest)?;
                debug!(path = %oldest.display(), "WAL archive evicted (byte retention)");
                total = total.saturating_sub(size);
                idx += 1;
            }
        }

        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.flush_thread.take() {
            let _ = handle.join();
        }
        if let Ok(mut guard) = self.inner.lock() {
            let _ = guard.flush_locked();
        }
    }
}

fn spawn_flush_timer(
    inner: Arc<Mutex<WalInner>>,
    interval: Duration,
    shutdown: crossbeam::channel::Receiver<()>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                if let Ok(mut guard) = inner.lock() {
                    let _ = guard.flush_locked();
                }
                return;
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                if let Ok(mut guard) = inner.lock() {
                    let _ = guard.flush_locked();
                }
            }
        }
    })
}

/// List `(unix_nanos, path)` pairs for every `wal_<nanos>.log` file in
/// `archive_dir`.
fn list_archive_files(archive_dir: &Path) -> Result<Vec<(u128, PathBuf)>, WalError> {
    let mut out = Vec::new();
    if !archive_dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(archive_dir)? {
        let entry = entry?;
        let path = entry.path();
        if let Some(nanos) = parse_archive_nanos(&path) {
            out.push((nanos, path));
        }
    }
    Ok(out)
}

fn parse_archive_nanos(path: &Path) -> Option<u128> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.strip_prefix("wal_")
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse::<u128>().ok())
}
