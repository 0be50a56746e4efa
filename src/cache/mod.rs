//! Sharded LRU value cache — the optional read-side cache named C9 in the
//! storage specification's component table.
//!
//! `capacity == 0` is the caller's way of disabling the cache; every shard
//! then holds zero entries and every `get` misses. Capacity is split evenly
//! across [`SHARD_COUNT`] shards, each guarded by its own mutex, so point
//! lookups for different keys rarely contend — matching the "lock-free-
//! friendly (sharded or LRU with per-shard locks)" guidance for this
//! component.
//!
//! `remove` is exact: it evicts precisely the key given, never an
//! approximation standing in for it.


use std::collections::HashMap;
use std::sync::Mutex;

/// Number of independent LRU shards. A key's shard is chosen by a cheap
/// FNV-1a hash over its bytes, not by a cryptographic hash — cache sharding
/// has no security requirement, only an even-distribution one.
const SHARD_COUNT: usize = 16;

struct LruShard {
    capacity: usize,
    map: HashMap<Vec<u8>, usize>,
    entries: Vec<Option<(Vec<u8>, Vec<u8>)>>,
    /// Intrusive doubly-linked list over `entries`, most-recently-used at
    /// the head. `u32::MAX` stands in for "no link".
    next: Vec<u32>,
    prev: Vec<u32>,
    head: u32,
    tail: u32,
    free: Vec<u32>,
}

const NIL: u32 = u32::MAX;

impl LruShard {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            entries: Vec::new(),
            next: Vec::new(),
            prev: Vec::new(),
            head: NIL,
            tail: NIL,
            free: Vec::new(),
        }
    }

    fn unlink(&mut self, idx: u32) {
        let p = self.prev[idx as usize];
        let n = self.next[idx as usize];
        if p != NIL {
            self.next[p as usize] = n;
        } else {
            self.head = n;
        }
        if n != NIL {
            self.prev[n as usize] = p;
        } else {
            self.tail = p;
        }
    }

    fn push_front(&mut self, idx: u32) {
        self.prev[idx as usize] = NIL;
        self.next[idx as usize] = self.head;
        if self.head != NIL {
            self.prev[self.head as usize] = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn touch(&mut self, idx: u32) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let idx = *self.map.get(key)?;
        self.touch(idx);
        self.entries[idx as usize]
            .as_ref()
            .map(|(_, v)| v.clone())
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(&idx) = self.map.get(&key) {
            self.entries[idx as usize] = Some((key, value));
            self.touch(idx);
            return;
        }

        let idx = if let Some(idx) = self.free.pop() {
            idx
        } else if self.entries.len() < self.capacity {
            self.entries.push(None);
            self.next.push(NIL);
            self.prev.push(NIL);
            (self.entries.len() - 1) as u32
        } else {
            // Evict the LRU tail to make room.
            let tail = self.tail;
            self.unlink(tail);
            if let Some((old_key, _)) = self.entries[tail as usize].take() {
                self.map.remove(&old_key);
            }
            tail
        };

        self.entries[idx as usize] = Some((key.clone(), value));
        self.map.insert(key, idx);
        self.push_front(idx);
    }

    fn remove(&mut self, key: &[u8]) {
        if let Some(idx) = self.map.remove(key) {
            self.unlink(idx);
            self.entries[idx as usize] = None;
            self.free.push(idx);
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// A sharded, thread-safe LRU cache mapping keys to values.
pub struct Cache {
    shards: Vec<Mutex<LruShard>>,
}

impl Cache {
    /// Build a cache with `capacity` entries spread across shards.
    /// `capacity == 0` produces a disabled cache: a single zero-capacity
    /// shard that never retains anything, rather than allocating
    /// [`SHARD_COUNT`] shards nothing will ever populate.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            return Self {
                shards: vec![Mutex::new(LruShard::new(0))],
            };
        }
        let per_shard = (capacity / SHARD_COUNT).max(1);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(LruShard::new(per_shard)))
            .collect();
        Self { shards }
    }

    /// `true` if this cache was built with zero capacity.
    pub fn is_disabled(&self) -> bool {
        self.shards.iter().all(|s| s.lock().map(|g| g.capacity == 0).unwrap_or(true))
    }

    fn shard_for(&self, key: &[u8]) -> &Mutex<LruShard> {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in key {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Look up `key`. A hit promotes the entry to most-recently-used.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.shard_for(key).lock().ok()?.get(key)
    }

    /// Insert or overwrite `key` → `value`, evicting the shard's least-
    /// recently-used entry if it is at capacity. A no-op when the cache is
    /// disabled.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        if let Ok(mut guard) = self.shard_for(&key).lock() {
            guard.put(key, value);
        }
    }

    /// Evict exactly `key`, if present. Never evicts a different key.
    pub fn remove(&self, key: &[u8]) {
        if let Ok(mut guard) = self.shard_for(key).lock() {
            guard.remove(key);
        }
    }

    /// Total number of entries currently cached across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map(|g| g.len()).unwrap_or(0))
            .sum()
    }

    /// `true` if no shard currently holds any entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
