//! Authenticated encryption, key derivation, and the master-key marker.
//!
//! This module is the sole place that touches the master key and ciphertext.
//! It offers two AEAD modes — [`EncryptionMode::Standard`]
//! (XChaCha20-Poly1305, 24-byte nonces) and [`EncryptionMode::Fips`]
//! (AES-256-GCM, 12-byte nonces) — behind one uniform `seal`/`open` contract
//! on [`Crypto`], which is a tagged enum rather than a trait object: only one
//! mode is ever active per database instance, and there is no run-time
//! plugin model to support.
//!
//! Every value written to the WAL or an SSTable is sealed with the entry AAD
//! built by [`entry_aad`], binding the ciphertext to the entry's key,
//! timestamp, expiry, and tombstone flag — tampering with any of those fields
//! makes `open` fail.

#[cfg(test)]
mod tests;

use aes_gcm::Aes256Gcm;
use argon2::Argon2;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chacha20poly1305::XChaCha20Poly1305;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

/// Length in bytes of every master key and every derived key.
pub const KEY_LEN: usize = 32;

/// Fixed plaintext sealed into the key-marker file; verified on every open.
pub const KEY_MARKER_CONSTANT: &[u8] = b"aeternusdb-key-marker-v1";

/// Errors produced by crypto operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// A key was not exactly [`KEY_LEN`] bytes.
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// A nonce did not match the mode's expected length.
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected nonce length for the active mode.
        expected: usize,
        /// Actual nonce length supplied.
        actual: usize,
    },

    /// AEAD seal or open failed (tag mismatch, truncation, or AAD mismatch).
    #[error("AEAD authentication failed")]
    DecryptAuthFail,

    /// KDF parameters violate the documented minimums, or are unsupported
    /// in the active encryption mode (FIPS forbids Argon2id).
    #[error("invalid KDF parameters: {0}")]
    KdfParamsInvalid(String),

    /// The master-key marker file failed verification: either the key hash
    /// prefix did not match, or the sealed constant did not decrypt/match.
    #[error("wrong master key")]
    WrongMasterKey,

    /// The key-marker payload was truncated or not valid base64.
    #[error("malformed key marker")]
    MalformedMarker,

    /// A master-key string did not parse as raw/hex/base64 32 bytes.
    #[error("master key could not be parsed as raw, hex, or base64")]
    UnparsableMasterKey,
}

/// Which AEAD construction a database instance uses. Exactly one is active
/// per [`crate::engine::Engine`] — never negotiated per-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// XChaCha20-Poly1305, 24-byte extended nonces.
    Standard,
    /// AES-256-GCM, 12-byte nonces.
    Fips,
}

impl Default for EncryptionMode {
    fn default() -> Self {
        EncryptionMode::Standard
    }
}

/// Key-derivation function selection and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfMethod {
    /// PBKDF2-HMAC-SHA256.
    Pbkdf2,
    /// Argon2id. Forbidden when [`EncryptionMode::Fips`] is active.
    Argon2id,
}

/// An active AEAD construction bound to one 32-byte key.
///
/// Modeled as a tagged variant rather than a trait object per the "dynamic
/// dispatch" design guidance: the set of providers is closed and known at
/// compile time, so there is no value in paying for a vtable.
pub enum Crypto {
    /// XChaCha20-Poly1305.
    Standard(XChaCha20Poly1305),
    /// AES-256-GCM.
    Fips(Aes256Gcm),
}

impl Crypto {
    /// Construct a [`Crypto`] for `mode`, bound to `key`.
    pub fn new(mode: EncryptionMode, key: &[u8; KEY_LEN]) -> Self {
        match mode {
            EncryptionMode::Standard => {
                Crypto::Standard(XChaCha20Poly1305::new(key.into()))
            }
            EncryptionMode::Fips => Crypto::Fips(Aes256Gcm::new(key.into())),
        }
    }

    /// The nonce length required by the active mode: 24 bytes for
    /// `Standard`, 12 bytes for `Fips`.
    pub fn nonce_len(&self) -> usize {
        match self {
            Crypto::Standard(_) => 24,
            Crypto::Fips(_) => 12,
        }
    }

    /// Seal `plaintext` under `aad`, generating a fresh random nonce.
    ///
    /// Returns `(nonce, ciphertext)`. Ciphertext length is
    /// `plaintext.len() + 16` (the AEAD tag). The nonce is never reused
    /// under the same key: it is drawn fresh from the OS RNG every call.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let payload = Payload { msg: plaintext, aad };
        match self {
            Crypto::Standard(cipher) => {
                let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, payload)
                    .map_err(|_| CryptoError::DecryptAuthFail)?;
                Ok((nonce.to_vec(), ciphertext))
            }
            Crypto::Fips(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, payload)
                    .map_err(|_| CryptoError::DecryptAuthFail)?;
                Ok((nonce.to_vec(), ciphertext))
            }
        }
    }

    /// Open `ciphertext` sealed under `aad` with `nonce`.
    ///
    /// Fails with [`CryptoError::DecryptAuthFail`] on tag mismatch,
    /// truncation, or AAD mismatch; with [`CryptoError::InvalidNonceLength`]
    /// if `nonce` does not match the active mode's expected length.
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let expected = self.nonce_len();
        if nonce.len() != expected {
            return Err(CryptoError::InvalidNonceLength {
                expected,
                actual: nonce.len(),
            });
        }
        let payload = Payload { msg: ciphertext, aad };
        match self {
            Crypto::Standard(cipher) => cipher
                .decrypt(nonce.into(), payload)
                .map_err(|_| CryptoError::DecryptAuthFail),
            Crypto::Fips(cipher) => cipher
                .decrypt(nonce.into(), payload)
                .map_err(|_| CryptoError::DecryptAuthFail),
        }
    }
}

/// Build the canonical entry AAD: binds ciphertext to every mutable
/// metadata field of an entry so tampering with any of them fails `open`.
///
/// Layout: `u32_le(len(key)) || key || u64_le(timestamp) ||
/// u64_le(expires_at) || u8(deleted ? 1 : 0)`.
pub fn entry_aad(key: &[u8], timestamp: u64, expires_at: u64, deleted: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + key.len() + 8 + 8 + 1);
    aad.extend_from_slice(&(key.len() as u32).to_le_bytes());
    aad.extend_from_slice(key);
    aad.extend_from_slice(&timestamp.to_le_bytes());
    aad.extend_from_slice(&expires_at.to_le_bytes());
    aad.push(u8::from(deleted));
    aad
}

/// Parse a master key from caller input, trying raw bytes, then hex, then
/// base64, in that order — the first successful decode wins.
pub fn parse_master_key(input: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    if input.len() == KEY_LEN {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(input);
        return Ok(key);
    }

    if let Ok(text) = std::str::from_utf8(input) {
        let text = text.trim();
        if let Ok(bytes) = hex::decode(text) {
            if bytes.len() == KEY_LEN {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&bytes);
                return Ok(key);
            }
        }
        if let Ok(bytes) = B64.decode(text) {
            if bytes.len() == KEY_LEN {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&bytes);
                return Ok(key);
            }
        }
    }

    Err(CryptoError::UnparsableMasterKey)
}

/// Derive a 32-byte key via PBKDF2-HMAC-SHA256.
///
/// `iterations` must be at least 10,000 and `salt` at least 16 bytes.
pub fn derive_key_pbkdf2(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<[u8; KEY_LEN], CryptoError> {
    if iterations < 10_000 {
        return Err(CryptoError::KdfParamsInvalid(format!(
            "pbkdf2 iterations {iterations} below minimum 10000"
        )));
    }
    if salt.len() < 16 {
        return Err(CryptoError::KdfParamsInvalid(format!(
            "pbkdf2 salt length {} below minimum 16",
            salt.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
    Ok(key)
}

/// Derive a 32-byte key via Argon2id.
///
/// `memory_kib` must be at least 65,536 (64 MiB), `threads` is typically 4,
/// `iterations` typically 3. Forbidden in [`EncryptionMode::Fips`] — callers
/// must enforce that at config-validation time.
pub fn derive_key_argon2id(
    password: &[u8],
    salt: &[u8],
    memory_kib: u32,
    iterations: u32,
    threads: u32,
) -> Result<[u8; KEY_LEN], CryptoError> {
    if memory_kib < 65_536 {
        return Err(CryptoError::KdfParamsInvalid(format!(
            "argon2id memory {memory_kib} KiB below minimum 65536 KiB"
        )));
    }
    if salt.len() < 16 {
        return Err(CryptoError::KdfParamsInvalid(format!(
            "argon2id salt length {} below minimum 16",
            salt.len()
        )));
    }
    let params = argon2::Params::new(memory_kib, iterations, threads, Some(KEY_LEN))
        .map_err(|e| CryptoError::KdfParamsInvalid(e.to_string()))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| CryptoError::KdfParamsInvalid(e.to_string()))?;
    Ok(key)
}

/// Derive a per-object key from the master key via HKDF-Extract/Expand
/// (SHA-256), using `object_id` as the `info` parameter.
///
/// If `salt` is absent, a fresh random 32-byte salt is generated. Returns
/// `(derived_key, salt_used)`.
pub fn derive_object_key(
    master_key: &[u8; KEY_LEN],
    object_id: &[u8],
    salt: Option<&[u8]>,
) -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
    use rand::RngCore;

    let mut generated_salt = [0u8; KEY_LEN];
    let salt = match salt {
        Some(s) if s.len() == KEY_LEN => {
            generated_salt.copy_from_slice(s);
            &generated_salt
        }
        _ => {
            rand::rng().fill_bytes(&mut generated_salt);
            &generated_salt
        }
    };

    let hk = Hkdf::<Sha256>::new(Some(salt), master_key);
    let mut okm = [0u8; KEY_LEN];
    // `object_id` is bounded (envelope ids, cache keys); expand only fails
    // when the requested output exceeds 255 * hash_len, which 32 never does.
    let _ = hk.expand(object_id, &mut okm);
    (okm, *salt)
}

/// Overwrite `buf` with zeroes. Best-effort compiler-barrier against
/// dead-store elimination via [`zeroize::Zeroize`].
pub fn secure_zero(buf: &mut [u8]) {
    buf.zeroize();
}

/// Build the key-marker payload for `master_key` under the active AEAD mode.
///
/// Layout (before base64): `sha256(master_key)[32] || nonce || ciphertext`,
/// where `ciphertext` is the AEAD seal of [`KEY_MARKER_CONSTANT`] with AAD
/// `sha256(master_key)`.
pub fn build_key_marker(crypto: &Crypto, master_key: &[u8; KEY_LEN]) -> Result<String, CryptoError> {
    let key_hash = Sha256::digest(master_key);
    let (nonce, ciphertext) = crypto.seal(KEY_MARKER_CONSTANT, &key_hash)?;

    let mut payload = Vec::with_capacity(32 + nonce.len() + ciphertext.len());
    payload.extend_from_slice(&key_hash);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);

    Ok(B64.encode(payload))
}

/// Verify that `marker_b64` was produced for `master_key` under `crypto`.
///
/// Performs a constant-time comparison of the stored key-hash prefix before
/// attempting the AEAD open, then checks the opened plaintext equals
/// [`KEY_MARKER_CONSTANT`]. Any failure returns
/// [`CryptoError::WrongMasterKey`] — the caller must not proceed to WAL
/// replay on this path.
pub fn verify_key_marker(
    crypto: &Crypto,
    master_key: &[u8; KEY_LEN],
    marker_b64: &str,
) -> Result<(), CryptoError> {
    let payload = B64
        .decode(marker_b64.trim())
        .map_err(|_| CryptoError::MalformedMarker)?;

    let nonce_len = crypto.nonce_len();
    if payload.len() < 32 + nonce_len {
        return Err(CryptoError::MalformedMarker);
    }

    let stored_hash = &payload[0..32];
    let key_hash = Sha256::digest(master_key);

    if stored_hash.ct_eq(key_hash.as_slice()).unwrap_u8() != 1 {
        return Err(CryptoError::WrongMasterKey);
    }

    let nonce = &payload[32..32 + nonce_len];
    let ciphertext = &payload[32 + nonce_len..];

    let plaintext = crypto
        .open(nonce, ciphertext, &key_hash)
        .map_err(|_| CryptoError::WrongMasterKey)?;

    if plaintext != KEY_MARKER_CONSTANT {
        return Err(CryptoError::WrongMasterKey);
    }

    Ok(())
}
