//! Engine configuration surface.
//!
//! [`EngineConfig`] enumerates every tunable spec'd for [`crate::engine::Engine::open`]:
//! encryption mode/key, key-derivation parameters, memtable/WAL sizing, bloom
//! filter density, and cache capacity. `Default` supplies every documented
//! default; [`EngineConfig::validate`] rejects disallowed combinations
//! (Argon2id under FIPS) before `Engine::open` does any I/O.

use std::time::Duration;
use thiserror::Error;

use crate::crypto::{EncryptionMode, KdfMethod};
use crate::wal::WalRotationConfig;

/// Default memtable flush threshold (256 MiB).
pub const DEFAULT_MEMTABLE_SIZE_BYTES: usize = 256 * 1024 * 1024;

/// Default bloom filter density (10 bits per key).
pub const DEFAULT_BLOOM_BITS_PER_KEY: u32 = 10;

/// Maximum key length accepted by the public API (64 KiB).
pub const MAX_KEY_LEN: usize = 64 * 1024;

/// Maximum value length accepted by the public API (16 MiB).
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

/// Environment variable consulted for the master key when no explicit key
/// is supplied in [`EngineConfig::encryption_key`].
pub const MASTER_KEY_ENV_VAR: &str = "VELOCITY_MASTER_KEY";

/// Errors raised by [`EngineConfig::validate`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Argon2id was selected while [`EncryptionMode::Fips`] is active.
    #[error("argon2id key derivation is forbidden under FIPS encryption mode")]
    Argon2idForbiddenInFips,

    /// A KDF parameter was below the documented minimum.
    #[error("invalid key-derivation parameter: {0}")]
    InvalidKdfParams(String),
}

/// Key-derivation method and parameters, used only when the database is
/// opened with a passphrase rather than a raw 32-byte key (callers that
/// already hold a raw key skip the KDF entirely).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyDerivationConfig {
    /// Which KDF to run.
    pub method: KdfMethod,
    /// PBKDF2 iteration count (ignored for Argon2id). Must be ≥ 10,000.
    pub iterations: u32,
    /// Argon2id memory cost in KiB (ignored for PBKDF2). Must be ≥ 65,536.
    pub memory_kib: u32,
    /// Argon2id parallelism (ignored for PBKDF2).
    pub threads: u32,
    /// Salt length in bytes, generated fresh per derivation if not supplied
    /// by the caller. Must be ≥ 16.
    pub salt_length: usize,
}

impl Default for KeyDerivationConfig {
    fn default() -> Self {
        Self {
            method: KdfMethod::Pbkdf2,
            iterations: 100_000,
            memory_kib: 65_536,
            threads: 4,
            salt_length: 16,
        }
    }
}

/// Top-level configuration for [`crate::engine::Engine::open`].
///
/// Every field maps 1:1 onto a configuration option enumerated in the
/// storage specification's external-interfaces section. `path` is passed
/// separately to `Engine::open` rather than stored here, matching the
/// predecessor engine's `open(path, config)` call shape.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which AEAD construction backs every seal/open in this database.
    pub encryption_mode: EncryptionMode,
    /// Explicit 32-byte master key. Takes precedence over the environment
    /// variable and the `master.key` file. `None` falls through the rest
    /// of the resolution order in [`crate::engine::Engine::open`].
    pub encryption_key: Option<[u8; 32]>,
    /// Key-derivation parameters, consulted only when opening with a
    /// passphrase instead of a raw key.
    pub key_derivation: KeyDerivationConfig,
    /// Memtable flush threshold in bytes.
    pub memtable_size_bytes: usize,
    /// Optional hard ceiling on memtable growth while a flush is already
    /// in flight. `None` (the default) preserves unbounded growth — see
    /// `DESIGN.md`'s Open Question 1 decision.
    pub memtable_hard_ceiling_bytes: Option<usize>,
    /// WAL write-buffer size before a forced flush+fsync.
    pub wal_buffer_size_bytes: usize,
    /// WAL background flush-timer interval.
    pub wal_sync_interval: Duration,
    /// WAL rotation and archive-retention policy.
    pub wal_rotation: WalRotationConfig,
    /// Bloom filter density for newly built SSTables, in bits per key.
    pub bloom_bits_per_key: u32,
    /// Maximum number of entries held by the read-side value cache.
    /// `0` disables the cache entirely.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encryption_mode: EncryptionMode::Standard,
            encryption_key: None,
            key_derivation: KeyDerivationConfig::default(),
            memtable_size_bytes: DEFAULT_MEMTABLE_SIZE_BYTES,
            memtable_hard_ceiling_bytes: None,
            wal_buffer_size_bytes: crate::wal::DEFAULT_BUFFER_SIZE,
            wal_sync_interval: crate::wal::DEFAULT_SYNC_INTERVAL,
            wal_rotation: WalRotationConfig::default(),
            bloom_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            cache_capacity: 0,
        }
    }
}

impl EngineConfig {
    /// Validate cross-field constraints that are otherwise disallowed.
    /// `Engine::open` calls this once, before touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption_mode == EncryptionMode::Fips
            && self.key_derivation.method == KdfMethod::Argon2id
        {
            return Err(ConfigError::Argon2idForbiddenInFips);
        }
        if self.key_derivation.method == KdfMethod::Pbkdf2 && self.key_derivation.iterations < 10_000
        {
            return Err(ConfigError::InvalidKdfParams(format!(
                "pbkdf2 iterations {} below minimum 10000",
                self.key_derivation.iterations
            )));
        }
        if self.key_derivation.method == KdfMethod::Argon2id && self.key_derivation.memory_kib < 65_536
        {
            return Err(ConfigError::InvalidKdfParams(format!(
                "argon2id memory {} KiB below minimum 65536",
                self.key_derivation.memory_kib
            )));
        }
        if self.key_derivation.salt_length < 16 {
            return Err(ConfigError::InvalidKdfParams(format!(
                "salt length {} below minimum 16",
                self.key_derivation.salt_length
            )));
        }
        Ok(())
    }
}
