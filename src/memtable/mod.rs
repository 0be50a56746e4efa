//! # Memtable Module
//!
//! The mutable, in-memory write buffer of the storage engine: an ordered
//! `key -> Entry` map with a single, current version per key (deletes are
//! tombstones, not physical removal). Durability is the caller's
//! responsibility — the engine appends to the WAL *before* calling
//! [`Memtable::put`]/[`Memtable::delete`], so the memtable itself never
//! touches disk.
//!
//! ## Flush semantics
//!
//! [`Memtable::freeze`] converts a `Memtable` into a [`FrozenMemtable`]: a
//! read-only view over the same data that exposes only `get` and
//! `iter_for_flush`, used while the engine's background worker builds the
//! next SSTable. Freezing does not copy the map — it is an `Arc` clone.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::engine::utils::Entry;

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, thiserror::Error)]
pub enum MemtableError {
    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The mutable, in-memory write buffer of the storage engine.
///
/// Cloning a [`Memtable`] is cheap — it clones the underlying `Arc`s, so
/// every clone observes the same data.
#[derive(Clone)]
pub struct Memtable {
    tree: Arc<RwLock<BTreeMap<Vec<u8>, Entry>>>,
    size_bytes: Arc<AtomicUsize>,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    /// An empty memtable.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(BTreeMap::new())),
            size_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert or overwrite `entry` under its key.
    ///
    /// The caller (the engine) is responsible for having already durably
    /// WAL-appended `entry` before calling this.
    pub fn put(&self, entry: Entry) -> Result<(), MemtableError> {
        trace!(key_len = entry.key.len(), deleted = entry.deleted, "memtable put");
        let mut guard = self.lock_write()?;
        let new_size = entry.size_bytes();
        if let Some(old) = guard.insert(entry.key.clone(), entry) {
            self.size_bytes.fetch_sub(old.size_bytes(), Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
        Ok(())
    }

    /// Insert a tombstone for `key`, shadowing any prior value.
    pub fn delete(&self, key: Vec<u8>, timestamp: u64) -> Result<(), MemtableError> {
        self.put(Entry::new_delete(key, timestamp))
    }

    /// The current entry for `key`, whether live or a tombstone — callers
    /// distinguish via [`Entry::deleted`]. `None` means the memtable has
    /// never seen this key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, MemtableError> {
        Ok(self.lock_read()?.get(key).cloned())
    }

    /// Approximate footprint: sum of `key.len() + value.len()` across all
    /// live entries (tombstones still count their key bytes).
    pub fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Number of distinct keys (including tombstones) currently held.
    pub fn len(&self) -> Result<usize, MemtableError> {
        Ok(self.lock_read()?.len())
    }

    /// `true` if the memtable holds no entries.
    pub fn is_empty(&self) -> Result<bool, MemtableError> {
        Ok(self.lock_read()?.is_empty())
    }

    /// A key-ordered snapshot of every entry, for SSTable construction.
    /// Does not mutate or clear in-memory state.
    pub fn iter_for_flush(&self) -> Result<Vec<Entry>, MemtableError> {
        Ok(self.lock_read()?.values().cloned().collect())
    }

    /// Keys (in order) whose entry is live and matches `prefix` (an empty
    /// prefix matches everything).
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, MemtableError> {
        Ok(self
            .lock_read()?
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| !e.deleted)
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Convert into a read-only [`FrozenMemtable`] for flushing. Cheap:
    /// shares the same underlying map via `Arc` clone.
    pub fn freeze(&self) -> FrozenMemtable {
        FrozenMemtable {
            memtable: self.clone(),
        }
    }

    fn lock_read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Entry>>, MemtableError> {
        self.tree
            .read()
            .map_err(|_| MemtableError::Internal("memtable lock poisoned".into()))
    }

    fn lock_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Entry>>, MemtableError> {
        self.tree
            .write()
            .map_err(|_| MemtableError::Internal("memtable lock poisoned".into()))
    }
}

/// A read-only view of a [`Memtable`] being flushed to an SSTable.
///
/// Exists so the type system enforces that nothing writes to a memtable
/// the flush worker is iterating — it exposes only the read path.
pub struct FrozenMemtable {
    memtable: Memtable,
}

impl FrozenMemtable {
    /// See [`Memtable::get`].
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, MemtableError> {
        self.memtable.get(key)
    }

    /// See [`Memtable::iter_for_flush`].
    pub fn iter_for_flush(&self) -> Result<Vec<Entry>, MemtableError> {
        self.memtable.iter_for_flush()
    }

    /// See [`Memtable::size_bytes`].
    pub fn size_bytes(&self) -> usize {
        self.memtable.size_bytes()
    }
}
