//! # LSM Storage Engine
//!
//! Orchestrates the write-ahead log, the in-memory write buffer, and the
//! on-disk SSTables into a single embeddable key-value store, plus the
//! secure-envelope custody ledger layered on top of the same database
//! directory.
//!
//! ## Design overview
//!
//! - **Active memtable** — an in-memory ordered buffer backed by the WAL.
//!   Every write lands here after the WAL append completes.
//! - **Frozen memtables** — read-only snapshots awaiting flush, produced
//!   when the active memtable crosses [`EngineConfig::memtable_size_bytes`].
//! - **Levels** — `levels[0]` (L0) holds every flushed SSTable in the order
//!   it was published; higher levels exist as placeholders for a future
//!   compaction strategy and are never populated by this engine.
//!
//! Point reads walk active memtable → frozen memtables → L0 → higher
//! levels, each newest-first, returning the first definitive result.
//!
//! ## Concurrency model
//!
//! A single `RwLock<EngineInner>` guards the active/frozen memtables and
//! the level directory. The WAL carries its own internal mutex and is
//! never touched while this lock is held. The value cache is sharded and
//! locks independently of both. Flushing swaps the frozen pointer and
//! publishes the new SSTable under a brief write-lock acquisition each;
//! the (potentially slow) SSTable build itself runs with no lock held.
//!
//! ## Open sequence
//!
//! 1. Ensure the database directory exists.
//! 2. Resolve the master key: explicit config value, then
//!    [`crate::config::MASTER_KEY_ENV_VAR`], then `master.key` on disk,
//!    else generate one and persist it (mode 0600 on Unix).
//! 3. Open or create `key.marker`: verify against an existing marker, or
//!    seal a fresh one for the resolved key.
//! 4. Open the WAL, then scan the directory for `sst_<nanos>.db` files and
//!    load them into L0 in ascending timestamp order.
//! 5. Replay the WAL into a fresh memtable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::{ConfigError, EngineConfig, MASTER_KEY_ENV_VAR, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::crypto::{self, Crypto, CryptoError, KEY_LEN};
use crate::envelope::{
    self, CreateEnvelopeRequest, CustodyEventRequest, Envelope, EnvelopeError, EnvelopeStore, VerifyReport,
};
use crate::memtable::{FrozenMemtable, Memtable, MemtableError};
use crate::sstable::{SSTable, SstableError};
use crate::wal::{Wal, WalError};

pub mod utils;
pub use utils::Entry;
use utils::{KeyMergeItem, MergeIterator};


const MASTER_KEY_FILE: &str = "master.key";
const KEY_MARKER_FILE: &str = "key.marker";
const SSTABLE_PREFIX: &str = "sst_";
const SSTABLE_SUFFIX: &str = ".db";

/// Key-prefixes the engine claims for its own internal bookkeeping. Public
/// `put`/`delete` calls against a key under one of these are rejected with
/// [`EngineError::InvalidArgument`].
const RESERVED_PREFIXES: &[&[u8]] = &[
    b"__idx:",
    b"envelopes/",
    b"lock:",
    b"gdpr:consent:",
    b"residency:policy:",
];

/// Errors produced by [`Engine`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// AEAD, KDF, or key-marker failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// WAL append, flush, or replay failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Memtable operation failure.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// SSTable build, open, or read failure.
    #[error("SSTable error: {0}")]
    Sstable(#[from] SstableError),

    /// Envelope subsystem failure.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// A caller-supplied key or value violated a documented constraint
    /// (empty key, oversized key/value, or a reserved key prefix).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `key.marker` verification failed under the resolved master key.
    /// Returned instead of [`EngineError::Crypto`] so callers can match on
    /// it directly; `master.key` and `key.marker` are left untouched.
    #[error("wrong master key")]
    WrongMasterKey,

    /// Internal invariant violation (a poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A point-in-time snapshot of engine-level counters.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    /// Current size of the active memtable, in bytes.
    pub memtable_size_bytes: usize,
    /// Number of frozen memtables awaiting flush.
    pub frozen_count: usize,
    /// Total number of SSTables across all levels.
    pub sstable_count: usize,
    /// Number of entries currently held by the value cache.
    pub cache_len: usize,
}

struct EngineInner {
    active: Memtable,
    /// Oldest-first; drained from the front by [`Engine::flush`].
    frozen: Vec<FrozenMemtable>,
    /// `levels[0]` is L0. Higher indices are reserved for a future
    /// compaction strategy and are never populated today.
    levels: Vec<Vec<SSTable>>,
}

/// An embeddable, encrypted, LSM-backed key-value store.
///
/// Cheaply shareable across threads: every public method takes `&self`,
/// and all mutable state lives behind internal locks.
pub struct Engine {
    state: RwLock<EngineInner>,
    wal: Wal,
    cache: Cache,
    crypto: Arc<Crypto>,
    config: EngineConfig,
    data_dir: PathBuf,
}

impl Engine {
    /// Open (or create) a database rooted at `path`, per the open sequence
    /// documented on this module.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let data_dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let master_key = Self::resolve_master_key(&data_dir, &config)?;
        let crypto = Arc::new(Crypto::new(config.encryption_mode, &master_key));
        Self::open_or_verify_key_marker(&data_dir, &crypto, &master_key)?;

        let wal = Wal::open(
            &data_dir,
            Arc::clone(&crypto),
            config.wal_buffer_size_bytes,
            config.wal_sync_interval,
            config.wal_rotation.clone(),
        )?;

        let mut discovered = Self::load_sstables(&data_dir, &crypto);
        discovered.sort_by_key(|(nanos, _)| *nanos);
        let l0: Vec<SSTable> = discovered.into_iter().map(|(_, table)| table).collect();

        let active = Memtable::new();
        wal.replay(|entry| active.put(entry).map_err(|e| WalError::Internal(e.to_string())))?;

        info!(
            path = %data_dir.display(),
            sstables = l0.len(),
            memtable_entries = active.len().unwrap_or(0),
            "engine opened"
        );

        Ok(Self {
            state: RwLock::new(EngineInner {
                active,
                frozen: Vec::new(),
                levels: vec![l0],
            }),
            wal,
            cache: Cache::new(config.cache_capacity),
            crypto,
            config,
            data_dir,
        })
    }

    /// Resolve the 32-byte master key: explicit config value, then the
    /// `VELOCITY_MASTER_KEY` environment variable, then `master.key` on
    /// disk, else generate a fresh key and persist it.
    fn resolve_master_key(
        data_dir: &Path,
        config: &EngineConfig,
    ) -> Result<[u8; KEY_LEN], EngineError> {
        if let Some(key) = config.encryption_key {
            return Ok(key);
        }

        if let Ok(env_value) = std::env::var(MASTER_KEY_ENV_VAR) {
            return Ok(crypto::parse_master_key(env_value.trim().as_bytes())?);
        }

        let key_path = data_dir.join(MASTER_KEY_FILE);
        if key_path.exists() {
            let contents = fs::read(&key_path)?;
            return Ok(crypto::parse_master_key(&contents)?);
        }

        use rand::RngCore;
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        fs::write(&key_path, hex::encode(key))?;
        Self::restrict_to_owner(&key_path)?;
        debug!(path = %key_path.display(), "generated new master key");
        Ok(key)
    }

    #[cfg(unix)]
    fn restrict_to_owner(path: &Path) -> Result<(), EngineError> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn restrict_to_owner(_path: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    /// Verify an existing `key.marker` against `master_key`, or seal and
    /// write a fresh one if none exists yet. Never writes on a failed
    /// verification — the caller's files are left exactly as they were.
    fn open_or_verify_key_marker(
        data_dir: &Path,
        crypto: &Crypto,
        master_key: &[u8; KEY_LEN],
    ) -> Result<(), EngineError> {
        let marker_path = data_dir.join(KEY_MARKER_FILE);
        if marker_path.exists() {
            let marker = fs::read_to_string(&marker_path)?;
            return match crypto::verify_key_marker(crypto, master_key, &marker) {
                Ok(()) => Ok(()),
                Err(CryptoError::WrongMasterKey) => Err(EngineError::WrongMasterKey),
                Err(e) => Err(EngineError::Crypto(e)),
            };
        }

        let marker = crypto::build_key_marker(crypto, master_key)?;
        fs::write(&marker_path, marker)?;
        Ok(())
    }

    /// Scan `data_dir` for `sst_<nanos>.db` files, opening each. A table
    /// that fails to open is quarantined (renamed with a `.quarantine`
    /// suffix) and skipped rather than aborting the whole open.
    fn load_sstables(data_dir: &Path, crypto: &Arc<Crypto>) -> Vec<(u128, SSTable)> {
        let mut out = Vec::new();
        let Ok(read_dir) = fs::read_dir(data_dir) else {
            return out;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(nanos) = parse_sstable_nanos(&path) else {
                continue;
            };
            match SSTable::open(&path, Arc::clone(crypto)) {
                Ok(table) => out.push((nanos, table)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "quarantining corrupt SSTable");
                    let quarantined = path.with_extension("db.quarantine");
                    let _ = fs::rename(&path, &quarantined);
                }
            }
        }
        out
    }

    fn validate_key(key: &[u8]) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("key must not be empty".into()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "key length {} exceeds maximum {MAX_KEY_LEN}",
                key.len()
            )));
        }
        if RESERVED_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
            return Err(EngineError::InvalidArgument(
                "key uses a prefix reserved for internal use".into(),
            ));
        }
        Ok(())
    }

    fn validate_value(value: &[u8]) -> Result<(), EngineError> {
        if value.len() > MAX_VALUE_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "value length {} exceeds maximum {MAX_VALUE_LEN}",
                value.len()
            )));
        }
        Ok(())
    }

    fn lock_read(&self) -> Result<RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.state
            .read()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))
    }

    fn lock_write(&self) -> Result<RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.state
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))
    }

    /// Insert or overwrite `key` → `value`.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError> {
        Self::validate_key(&key)?;
        self.put_raw(key, value)
    }

    /// Delete `key` (writes a tombstone; a no-op if the key never existed).
    pub fn delete(&self, key: Vec<u8>) -> Result<(), EngineError> {
        Self::validate_key(&key)?;
        let entry = Entry::new_delete(key.clone(), now_nanos());
        self.wal.append(&entry)?;
        self.lock_read()?.active.put(entry)?;
        self.cache.remove(&key);
        self.maybe_flush()?;
        Ok(())
    }

    /// Look up `key`. `Ok(None)` covers both "never written" and "deleted".
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
        Self::validate_key(&key)?;
        self.get_raw(&key)
    }

    /// `true` iff `key` currently maps to a live (non-tombstone) value.
    pub fn has(&self, key: Vec<u8>) -> Result<bool, EngineError> {
        Ok(self.get(key)?.is_some())
    }

    /// All live keys matching `prefix` (an empty prefix matches every key),
    /// sorted ascending. Unions the active memtable, frozen memtables, and
    /// every SSTable level, resolving duplicates in favor of the newest
    /// source.
    pub fn keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, EngineError> {
        self.merged_keys(prefix)
    }

    /// A page of [`Engine::keys`], skipping `offset` results and returning
    /// at most `limit`.
    pub fn keys_page(
        &self,
        prefix: &[u8],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        Ok(self.merged_keys(prefix)?.into_iter().skip(offset).take(limit).collect())
    }

    fn merged_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, EngineError> {
        let inner = self.lock_read()?;

        // Every source is already key-sorted; priority 0 is the newest
        // (the active memtable), counting up through frozen memtables
        // (newest first) and then each level's tables (newest first).
        // `MergeIterator` yields `(key ASC, source_priority ASC)`, so the
        // first occurrence of a key is always its newest verdict.
        let mut sources: Vec<Box<dyn Iterator<Item = KeyMergeItem>>> = Vec::new();
        let mut priority = 0u32;

        let active_entries = inner.active.iter_for_flush()?;
        sources.push(Box::new(active_entries.into_iter().map(move |entry| KeyMergeItem {
            entry,
            source_priority: priority,
        })));
        priority += 1;

        for frozen in inner.frozen.iter().rev() {
            let entries = frozen.iter_for_flush()?;
            let p = priority;
            sources.push(Box::new(
                entries.into_iter().map(move |entry| KeyMergeItem { entry, source_priority: p }),
            ));
            priority += 1;
        }

        for level in &inner.levels {
            for table in level.iter().rev() {
                let p = priority;
                let scanned = table.scan_keys()?;
                sources.push(Box::new(scanned.into_iter().map(move |(key, deleted)| KeyMergeItem {
                    entry: Entry { key, value: Vec::new(), timestamp: 0, expires_at: 0, deleted },
                    source_priority: p,
                })));
                priority += 1;
            }
        }

        let mut out = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;
        for item in MergeIterator::new(sources) {
            if !item.entry.key.starts_with(prefix) {
                continue;
            }
            if last_key.as_deref() == Some(item.entry.key.as_slice()) {
                continue;
            }
            last_key = Some(item.entry.key.clone());
            if !item.entry.deleted {
                out.push(item.entry.key);
            }
        }

        Ok(out)
    }

    /// Read-modify-write: add `delta` to the decimal integer currently
    /// stored at `key` (treating a missing key as `0`), writing back and
    /// returning the new value.
    ///
    /// Not atomic across concurrent callers touching the same key — a
    /// racing writer can interleave between this call's read and its
    /// write. Callers needing atomicity must hold their own external lock
    /// per key.
    pub fn incr(&self, key: Vec<u8>, delta: i64) -> Result<i64, EngineError> {
        self.apply_delta(key, delta)
    }

    /// See [`Engine::incr`]; subtracts `delta` instead of adding it.
    pub fn decr(&self, key: Vec<u8>, delta: i64) -> Result<i64, EngineError> {
        self.apply_delta(key, -delta)
    }

    fn apply_delta(&self, key: Vec<u8>, delta: i64) -> Result<i64, EngineError> {
        let current = match self.get(key.clone())? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    EngineError::InvalidArgument(
                        "existing value is not a decimal integer".into(),
                    )
                })?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| EngineError::InvalidArgument("incr/decr overflowed i64".into()))?;
        self.put(key, next.to_string().into_bytes())?;
        Ok(next)
    }

    /// Block until any pending frozen memtable has been flushed to an
    /// SSTable. A no-op if nothing is pending.
    pub fn flush(&self) -> Result<(), EngineError> {
        loop {
            let popped = {
                let mut inner = self.lock_write()?;
                if !inner.active.is_empty()? {
                    let old_active = std::mem::replace(&mut inner.active, Memtable::new());
                    inner.frozen.push(old_active.freeze());
                }
                if inner.frozen.is_empty() {
                    None
                } else {
                    Some(inner.frozen.remove(0))
                }
            };

            let Some(frozen) = popped else {
                return Ok(());
            };

            let entries = frozen.iter_for_flush()?;
            if entries.is_empty() {
                continue;
            }

            let sst_path = self.next_sstable_path();
            let table =
                SSTable::build(&sst_path, entries, Arc::clone(&self.crypto), self.config.bloom_bits_per_key)?;
            debug!(path = %sst_path.display(), "flushed memtable to SSTable");

            self.lock_write()?.levels[0].push(table);
        }
    }

    fn maybe_flush(&self) -> Result<(), EngineError> {
        let over_threshold = self.lock_read()?.active.size_bytes() >= self.config.memtable_size_bytes;
        if over_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn next_sstable_path(&self) -> PathBuf {
        loop {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            let path = self.data_dir.join(format!("sst_{nanos}.db"));
            if !path.exists() {
                return path;
            }
        }
    }

    /// A snapshot of current engine counters.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.lock_read()?;
        Ok(EngineStats {
            memtable_size_bytes: inner.active.size_bytes(),
            frozen_count: inner.frozen.len(),
            sstable_count: inner.levels.iter().map(|l| l.len()).sum(),
            cache_len: self.cache.len(),
        })
    }

    /// Flush every pending write and release the WAL and all SSTables.
    pub fn close(self) -> Result<(), EngineError> {
        self.flush()?;
        self.wal.flush()?;
        Ok(())
    }

    fn put_raw(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError> {
        Self::validate_value(&value)?;
        let entry = Entry::new_put(key.clone(), value.clone(), now_nanos(), 0);
        self.wal.append(&entry)?;
        self.lock_read()?.active.put(entry)?;
        self.cache.put(key, value);
        self.maybe_flush()?;
        Ok(())
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }

        let inner = self.lock_read()?;

        if let Some(entry) = inner.active.get(key)? {
            return Ok(Self::resolve(entry, &self.cache));
        }
        for frozen in inner.frozen.iter().rev() {
            if let Some(entry) = frozen.get(key)? {
                return Ok(Self::resolve(entry, &self.cache));
            }
        }
        for level in &inner.levels {
            for table in level.iter().rev() {
                if let Some(entry) = table.get(key)? {
                    return Ok(Self::resolve(entry, &self.cache));
                }
            }
        }

        Ok(None)
    }

    fn resolve(entry: Entry, cache: &Cache) -> Option<Vec<u8>> {
        if entry.deleted {
            None
        } else {
            cache.put(entry.key.clone(), entry.value.clone());
            Some(entry.value)
        }
    }

    /// Create a new envelope `id` with `payload` as its custody subject,
    /// authored by `actor`, using default label/type/policies. Its state
    /// is stored as the value of the reserved key `envelopes/<id>`, so it
    /// is AEAD-sealed at rest like any other entry. Use
    /// [`Engine::create_envelope_with`] for full control over the
    /// envelope's label, type, case reference, and policy bundle.
    pub fn create_envelope(&self, id: &str, payload: Vec<u8>, actor: &str) -> Result<Envelope, EngineError> {
        Ok(envelope::create_envelope(self, CreateEnvelopeRequest::new(id, payload, actor))?)
    }

    /// Create a new envelope from a fully specified [`CreateEnvelopeRequest`].
    pub fn create_envelope_with(&self, req: CreateEnvelopeRequest) -> Result<Envelope, EngineError> {
        Ok(envelope::create_envelope(self, req)?)
    }

    /// Load envelope `id`. Auto-releases an expired time lock as a side
    /// effect, per `spec.md` §4.6.
    pub fn load_envelope(&self, id: &str) -> Result<Envelope, EngineError> {
        Ok(envelope::load_envelope(self, id)?)
    }

    /// Append a custody event to envelope `id`, authored by `actor`,
    /// persisting the result. Use [`Engine::append_custody_event_with`]
    /// to attach an actor fingerprint, location, or evidence state.
    pub fn append_custody_event(
        &self,
        id: &str,
        actor: &str,
        action: &str,
        notes: &str,
    ) -> Result<Envelope, EngineError> {
        Ok(envelope::append_custody_event(self, id, CustodyEventRequest::new(actor, action, notes))?)
    }

    /// Append a custody event to envelope `id` from a fully specified
    /// [`CustodyEventRequest`].
    pub fn append_custody_event_with(&self, id: &str, req: CustodyEventRequest) -> Result<Envelope, EngineError> {
        Ok(envelope::append_custody_event(self, id, req)?)
    }

    /// Record a tamper signal against envelope `id` with detector
    /// confidence `score` in `[0.0, 1.0]`. Moves the envelope to
    /// `under_review` iff `score` meets its tamper-policy threshold.
    pub fn record_tamper_signal(
        &self,
        id: &str,
        detected_by: &str,
        description: &str,
        score: f64,
    ) -> Result<Envelope, EngineError> {
        Ok(envelope::record_tamper_signal(self, id, detected_by, description, score)?)
    }

    /// Approve release of a time-locked envelope `id`, recording
    /// `approver` and `reason`.
    pub fn approve_time_lock_unlock(&self, id: &str, approver: &str, reason: &str) -> Result<Envelope, EngineError> {
        Ok(envelope::approve_time_lock_unlock(self, id, approver, reason)?)
    }

    /// Export envelope `id` to a standalone JSON file at `out_path`.
    pub fn export_envelope(&self, id: &str, out_path: impl AsRef<Path>) -> Result<(), EngineError> {
        Ok(envelope::export_envelope(self, id, out_path.as_ref())?)
    }

    /// Import an envelope JSON file at `in_path` into this database.
    pub fn import_envelope(&self, in_path: impl AsRef<Path>) -> Result<Envelope, EngineError> {
        Ok(envelope::import_envelope(self, in_path.as_ref())?)
    }

    /// Recompute and check envelope `id`'s hash chain and integrity roots.
    pub fn verify_envelope(&self, id: &str) -> Result<VerifyReport, EngineError> {
        Ok(envelope::verify_envelope(self, id)?)
    }
}

impl EnvelopeStore for Engine {
    fn envelope_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EnvelopeError> {
        self.get_raw(key).map_err(|e| EnvelopeError::Backend(e.to_string()))
    }

    fn envelope_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EnvelopeError> {
        self.put_raw(key, value).map_err(|e| EnvelopeError::Backend(e.to_string()))
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn parse_sstable_nanos(path: &Path) -> Option<u128> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(SSTABLE_PREFIX)?.strip_suffix(SSTABLE_SUFFIX)?.parse().ok()
}
