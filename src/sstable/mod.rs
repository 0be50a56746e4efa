//! Sorted String Table (SSTable) Module
//!
//! An immutable, disk-backed, sorted table of encrypted entries, with a
//! bloom filter for fast negative point lookups and a sparse or full index
//! for locating the right data-region offset without a full scan.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER 32B: magic|version|entry_count|index_offset|bloom_offset|bloom_size]
//! [DATA REGION: RawRecord, RawRecord, ... in ascending key order]
//! [BLOOM REGION: BloomFilter::marshal() bytes]
//! [INDEX REGION: IndexRecord, IndexRecord, ... in ascending key order]
//! ```
//!
//! The header is a fixed 32 bytes, all integers little-endian, so every
//! region's start and length can be read directly off it — there is no
//! block structure, metaindex, or footer.
//!
//! # Publication
//!
//! [`SSTable::build`] writes to `<path>.tmp.<rand>` in the same directory,
//! fills in the real header only after every region is written, `fsync`s,
//! and publishes via `rename` — atomic on POSIX filesystems. Any failure
//! during the build unlinks the temp file and the original `path` is left
//! untouched.
//!
//! # Reading
//!
//! [`SSTable::open`] `mmap`s the whole file read-only. `entry_count ≤ 1024`
//! materializes the full index in memory for binary search; larger tables
//! keep only a sparse sample (every 32nd index record) and forward-scan the
//! index region from the nearest sample on a miss.
//!
//! # Repair
//!
//! [`SSTable::repair`] tolerates a truncated or partially corrupted file: it
//! sequentially parses data-region entries from just after the header,
//! stopping at the first parse failure, AEAD-open failure, or checksum
//! mismatch, and rewrites every entry recovered so far through the normal
//! writer.


use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bloom::{BloomError, BloomFilter};
use crate::crypto::{self, Crypto, CryptoError};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::engine::utils::Entry;
use crate::record::{self, RawRecord};

/// Fixed header magic, identifying a valid SSTable file.
pub const MAGIC: u32 = 0xDEAD_BEEF;
/// On-disk format version. Bumped on any incompatible layout change.
pub const VERSION: u32 = 1;
/// Byte length of the fixed header.
pub const HEADER_LEN: usize = 32;
/// Above this many entries, the index is sampled rather than fully loaded.
pub const FULL_INDEX_THRESHOLD: usize = 1024;
/// Sampling stride for the sparse index (every Nth record is kept).
pub const SPARSE_INDEX_STRIDE: usize = 32;

/// Errors produced by SSTable construction, reading, or repair.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SstableError {
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A region failed to encode or decode.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// AEAD seal/open failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The bloom filter region failed to unmarshal.
    #[error("bloom filter error: {0}")]
    Bloom(#[from] BloomError),

    /// The header or region offsets failed validation.
    #[error("invalid SSTable header: {0}")]
    HeaderInvalid(String),

    /// A single entry failed AEAD authentication or checksum verification.
    /// Surfaced to the caller, never silently skipped.
    #[error("corrupt entry for key {key}: {reason}")]
    CorruptEntry {
        /// Hex-encoded key of the offending entry (keys are not secret).
        key: String,
        /// Human-readable cause.
        reason: String,
    },

    /// [`SSTable::repair`] recovered zero entries from the damaged file.
    #[error("no recoverable entries")]
    NoRecoverableEntries,

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SstableError {
    fn corrupt(key: &[u8], reason: impl Into<String>) -> Self {
        SstableError::CorruptEntry {
            key: hex::encode(key),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SstHeader {
    magic: u32,
    version: u32,
    entry_count: u32,
    index_offset: u64,
    bloom_offset: u64,
    bloom_size: u32,
}

impl SstHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[20..28].copy_from_slice(&self.bloom_offset.to_le_bytes());
        buf[28..32].copy_from_slice(&self.bloom_size.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, SstableError> {
        if buf.len() < HEADER_LEN {
            return Err(SstableError::HeaderInvalid("buffer shorter than header".into()));
        }
        // `buf.len() >= HEADER_LEN` was just checked, so every range below
        // is in bounds; the `try_into` conversions cannot fail.
        let take_u32 = |r: std::ops::Range<usize>| -> Result<u32, SstableError> {
            match buf[r].try_into() {
                Ok(bytes) => Ok(u32::from_le_bytes(bytes)),
                Err(_) => Err(SstableError::HeaderInvalid("malformed header field".into())),
            }
        };
        let take_u64 = |r: std::ops::Range<usize>| -> Result<u64, SstableError> {
            match buf[r].try_into() {
                Ok(bytes) => Ok(u64::from_le_bytes(bytes)),
                Err(_) => Err(SstableError::HeaderInvalid("malformed header field".into())),
            }
        };
        Ok(Self {
            magic: take_u32(0..4)?,
            version: take_u32(4..8)?,
            entry_count: take_u32(8..12)?,
            index_offset: take_u64(12..20)?,
            bloom_offset: take_u64(20..28)?,
            bloom_size: take_u32(28..32)?,
        })
    }
}

/// One index-region record: a key and where to find its sealed entry in
/// the data region.
#[derive(Debug, Clone)]
struct IndexRecord {
    key: Vec<u8>,
    data_offset: u64,
    entry_size: u32,
}

impl Encode for IndexRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.data_offset.encode_to(buf)?;
        self.entry_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (data_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (entry_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                key,
                data_offset,
                entry_size,
            },
            offset,
        ))
    }
}

/// In-memory index access plan chosen at load time based on entry count.
enum IndexPlan {
    /// `entry_count ≤ FULL_INDEX_THRESHOLD`: every record held, binary search.
    Full(Vec<IndexRecord>),
    /// Otherwise: every `SPARSE_INDEX_STRIDE`th `(key, absolute_file_offset)`
    /// pair, binary search the sample then forward-scan the index region.
    Sparse(Vec<(Vec<u8>, u64)>),
}

/// An immutable, mmap-backed, encrypted SSTable.
pub struct SSTable {
    mmap: Mmap,
    path: PathBuf,
    header: SstHeader,
    bloom: BloomFilter,
    index: IndexPlan,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    crypto: Arc<Crypto>,
}

impl SSTable {
    /// Build a new SSTable at `path` from `entries` (sorted by this call),
    /// sealing every value with `crypto` and sizing the bloom filter at
    /// `bloom_bits_per_key` bits per entry. Writes under a temp name in
    /// the same directory and atomically renames into place; on any error
    /// the temp file is removed and `path` is left untouched.
    pub fn build(
        path: impl AsRef<Path>,
        mut entries: Vec<Entry>,
        crypto: Arc<Crypto>,
        bloom_bits_per_key: u32,
    ) -> Result<Self, SstableError> {
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or("sstable");
        let tmp_path = dir.join(format!("{file_name}.tmp.{}", random_suffix()));

        match Self::write_regions(&tmp_path, &entries, &crypto, bloom_bits_per_key) {
            Ok(()) => {
                fs::rename(&tmp_path, path)?;
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        }

        debug!(path = %path.display(), entries = entries.len(), "SSTable published");
        Self::open(path, crypto)
    }

    fn write_regions(
        tmp_path: &Path,
        entries: &[Entry],
        crypto: &Crypto,
        bloom_bits_per_key: u32,
    ) -> Result<(), SstableError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        file.write_all(&[0u8; HEADER_LEN])?;

        let mut bloom = BloomFilter::new_with_bits_per_key(entries.len(), bloom_bits_per_key);
        let mut index_records = Vec::with_capacity(entries.len());
        let mut offset = HEADER_LEN as u64;

        for entry in entries {
            let aad = crypto::entry_aad(&entry.key, entry.timestamp, 0, entry.deleted);
            let (nonce, ciphertext) = crypto.seal(&entry.value, &aad)?;
            let raw = RawRecord {
                key: entry.key.clone(),
                nonce,
                ciphertext,
                timestamp: entry.timestamp,
                deleted: entry.deleted,
                checksum: entry.checksum(),
            };
            let bytes = encoding::encode_to_vec(&raw)?;
            file.write_all(&bytes)?;

            bloom.insert(&entry.key);
            index_records.push(IndexRecord {
                key: entry.key.clone(),
                data_offset: offset,
                entry_size: bytes.len() as u32,
            });
            offset += bytes.len() as u64;
        }

        let bloom_offset = offset;
        let bloom_bytes = bloom.marshal();
        file.write_all(&bloom_bytes)?;
        offset += bloom_bytes.len() as u64;
        let bloom_size = bloom_bytes.len() as u32;

        let index_offset = offset;
        for rec in &index_records {
            let bytes = encoding::encode_to_vec(rec)?;
            file.write_all(&bytes)?;
        }

        let header = SstHeader {
            magic: MAGIC,
            version: VERSION,
            entry_count: entries.len() as u32,
            index_offset,
            bloom_offset,
            bloom_size,
        };
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Open an existing, already-published SSTable file: mmaps it, validates
    /// the header, loads the bloom filter, and builds the full or sparse
    /// index access plan depending on `entry_count`.
    pub fn open(path: impl AsRef<Path>, crypto: Arc<Crypto>) -> Result<Self, SstableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the file is immutable once published (temp+rename); no
        // other writer can mutate it out from under this mapping.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN {
            return Err(SstableError::HeaderInvalid(
                "file shorter than 32-byte header".into(),
            ));
        }
        let header = SstHeader::from_bytes(&mmap[0..HEADER_LEN])?;
        if header.magic != MAGIC {
            return Err(SstableError::HeaderInvalid(format!(
                "bad magic {:#x}, expected {MAGIC:#x}",
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(SstableError::HeaderInvalid(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let bloom_end = header
            .bloom_offset
            .checked_add(header.bloom_size as u64)
            .ok_or_else(|| SstableError::HeaderInvalid("bloom region overflow".into()))?;
        if header.index_offset as usize > mmap.len()
            || header.bloom_offset as usize > mmap.len()
            || bloom_end as usize > mmap.len()
        {
            return Err(SstableError::HeaderInvalid(
                "region offsets exceed file size".into(),
            ));
        }

        let bloom_bytes = &mmap[header.bloom_offset as usize..bloom_end as usize];
        let bloom = BloomFilter::unmarshal(bloom_bytes)?;

        let loaded = load_index(&mmap, header.index_offset, header.entry_count)?;
        let min_key = loaded.first().map(|(r, _)| r.key.clone()).unwrap_or_default();
        let max_key = loaded.last().map(|(r, _)| r.key.clone()).unwrap_or_default();

        let index = if header.entry_count as usize <= FULL_INDEX_THRESHOLD {
            IndexPlan::Full(loaded.into_iter().map(|(r, _)| r).collect())
        } else {
            let sample = loaded
                .into_iter()
                .step_by(SPARSE_INDEX_STRIDE)
                .map(|(r, off)| (r.key, off))
                .collect();
            IndexPlan::Sparse(sample)
        };

        Ok(Self {
            mmap,
            path,
            header,
            bloom,
            index,
            min_key,
            max_key,
            crypto,
        })
    }

    /// Point lookup. Returns `None` on a bloom miss or absent key, and
    /// propagates [`SstableError::CorruptEntry`] rather than skipping a
    /// present-but-damaged entry.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, SstableError> {
        if !self.bloom.contains(key) {
            return Ok(None);
        }

        let found = match &self.index {
            IndexPlan::Full(records) => records
                .binary_search_by(|r| r.key.as_slice().cmp(key))
                .ok()
                .map(|i| records[i].clone()),
            IndexPlan::Sparse(sample) => {
                let start = match sample.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Ok(i) => sample[i].1,
                    Err(0) => return Ok(None),
                    Err(i) => sample[i - 1].1,
                };
                self.forward_scan_index(start, key)?
            }
        };

        match found {
            Some(rec) => self.read_entry_at(rec.data_offset, rec.entry_size, key),
            None => Ok(None),
        }
    }

    fn forward_scan_index(
        &self,
        start_offset: u64,
        key: &[u8],
    ) -> Result<Option<IndexRecord>, SstableError> {
        let mut offset = start_offset as usize;
        let end = self.mmap.len();
        while offset < end {
            let (rec, consumed) = IndexRecord::decode_from(&self.mmap[offset..])?;
            match rec.key.as_slice().cmp(key) {
                Ordering::Equal => return Ok(Some(rec)),
                Ordering::Greater => return Ok(None),
                Ordering::Less => offset += consumed,
            }
        }
        Ok(None)
    }

    fn read_entry_at(
        &self,
        data_offset: u64,
        entry_size: u32,
        expected_key: &[u8],
    ) -> Result<Option<Entry>, SstableError> {
        let start = data_offset as usize;
        let end = start
            .checked_add(entry_size as usize)
            .ok_or_else(|| SstableError::HeaderInvalid("entry size overflow".into()))?;
        if end > self.mmap.len() {
            return Err(SstableError::HeaderInvalid(
                "data entry extends past end of file".into(),
            ));
        }

        let (raw, _) = RawRecord::decode_from(&self.mmap[start..end])?;
        let aad = crypto::entry_aad(&raw.key, raw.timestamp, 0, raw.deleted);
        let plaintext = self
            .crypto
            .open(&raw.nonce, &raw.ciphertext, &aad)
            .map_err(|_| SstableError::corrupt(expected_key, "AEAD authentication failed"))?;

        let checksum = record::compute_checksum(&raw.key, &plaintext, raw.deleted);
        if checksum != raw.checksum {
            return Err(SstableError::corrupt(expected_key, "checksum mismatch"));
        }

        Ok(Some(Entry {
            key: raw.key,
            value: plaintext,
            timestamp: raw.timestamp,
            expires_at: 0,
            deleted: raw.deleted,
        }))
    }

    /// Attempt to recover as many entries as possible from a damaged
    /// `in_path`, writing them through the normal writer to `out_path`.
    /// Returns the recovered count, or [`SstableError::NoRecoverableEntries`]
    /// if nothing could be salvaged.
    pub fn repair(
        in_path: impl AsRef<Path>,
        out_path: impl AsRef<Path>,
        crypto: Arc<Crypto>,
        bloom_bits_per_key: u32,
    ) -> Result<usize, SstableError> {
        let bytes = fs::read(in_path.as_ref())?;

        let scan_bound = if bytes.len() >= HEADER_LEN {
            match SstHeader::from_bytes(&bytes[0..HEADER_LEN]) {
                Ok(header) if header.magic == MAGIC => {
                    (header.bloom_offset as usize).min(bytes.len())
                }
                _ => bytes.len(),
            }
        } else {
            bytes.len()
        };

        let mut offset = HEADER_LEN.min(bytes.len());
        let mut recovered = Vec::new();

        while offset < scan_bound {
            let raw = match RawRecord::decode_from(&bytes[offset..scan_bound]) {
                Ok((raw, consumed)) => {
                    offset += consumed;
                    raw
                }
                Err(e) => {
                    warn!(offset, error = %e, "SSTable repair stopped at parse failure");
                    break;
                }
            };

            let aad = crypto::entry_aad(&raw.key, raw.timestamp, 0, raw.deleted);
            let plaintext = match crypto.open(&raw.nonce, &raw.ciphertext, &aad) {
                Ok(p) => p,
                Err(_) => {
                    warn!(offset, "SSTable repair stopped at decrypt failure");
                    break;
                }
            };

            let checksum = record::compute_checksum(&raw.key, &plaintext, raw.deleted);
            if checksum != raw.checksum {
                warn!(offset, "SSTable repair stopped at checksum mismatch");
                break;
            }

            recovered.push(Entry {
                key: raw.key,
                value: plaintext,
                timestamp: raw.timestamp,
                expires_at: 0,
                deleted: raw.deleted,
            });
        }

        if recovered.is_empty() {
            return Err(SstableError::NoRecoverableEntries);
        }

        let count = recovered.len();
        Self::build(out_path, recovered, crypto, bloom_bits_per_key)?;
        Ok(count)
    }

    /// Every `(key, deleted)` pair in this table, in ascending key order,
    /// read directly off the data region's plaintext framing fields —
    /// values are never decrypted. Used by key-listing scans, which only
    /// need to know whether a key is live, not its value.
    pub fn scan_keys(&self) -> Result<Vec<(Vec<u8>, bool)>, SstableError> {
        let end = self.header.bloom_offset as usize;
        let mut offset = HEADER_LEN;
        let mut out = Vec::with_capacity(self.header.entry_count as usize);
        while offset < end {
            let (raw, consumed) = RawRecord::decode_from(&self.mmap[offset..end])?;
            offset += consumed;
            out.push((raw.key, raw.deleted));
        }
        Ok(out)
    }

    /// Smallest key in the table (cached at load time).
    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    /// Largest key in the table (cached at load time).
    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    /// Number of entries this table holds (including tombstones).
    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    /// On-disk path this table was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Unmaps the file. Equivalent to dropping the table.
    pub fn close(self) {
        drop(self);
    }
}

fn load_index(
    mmap: &[u8],
    index_offset: u64,
    entry_count: u32,
) -> Result<Vec<(IndexRecord, u64)>, SstableError> {
    let mut offset = index_offset as usize;
    let mut out = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let abs_offset = offset as u64;
        let (rec, consumed) = IndexRecord::decode_from(&mmap[offset..])?;
        offset += consumed;
        out.push((rec, abs_offset));
    }
    Ok(out)
}

fn random_suffix() -> u64 {
    use rand::RngCore;
    rand::rng().next_u64()
}
