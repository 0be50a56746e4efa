//! On-disk encrypted record layout shared by the WAL and the SSTable data
//! region.
//!
//! Both formats use the identical framing: `key_len(u32) || key ||
//! nonce_len(u16) || nonce || value_len(u32) || ciphertext || timestamp(u64)
//! || deleted(u8) || checksum(u32)`, all little-endian. Keeping one decoder
//! for this shape means the WAL replay path and the SSTable reader can never
//! drift apart on framing.

use crate::encoding::{self, Decode, Encode, EncodingError};

/// One sealed, on-disk entry: a key in the clear, alongside its AEAD nonce,
/// ciphertext, and the plaintext-adjacent metadata (timestamp, tombstone
/// flag, checksum) needed to open and verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// The key, stored unencrypted (required for bloom/index lookups).
    pub key: Vec<u8>,
    /// AEAD nonce used to seal `ciphertext`.
    pub nonce: Vec<u8>,
    /// AEAD-sealed value. Empty for tombstones (still authenticated).
    pub ciphertext: Vec<u8>,
    /// Monotonic nanosecond timestamp of the writing node.
    pub timestamp: u64,
    /// Tombstone flag.
    pub deleted: bool,
    /// CRC32 over `key` (tombstone) or `key || value` (plaintext, re-derived
    /// at write/verify time — never over the ciphertext).
    pub checksum: u32,
}

impl Encode for RawRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let key_len = u32::try_from(self.key.len())
            .map_err(|_| EncodingError::LengthOverflow("record key too long".into()))?;
        let nonce_len = u16::try_from(self.nonce.len())
            .map_err(|_| EncodingError::LengthOverflow("record nonce too long".into()))?;
        let value_len = u32::try_from(self.ciphertext.len())
            .map_err(|_| EncodingError::LengthOverflow("record ciphertext too long".into()))?;

        key_len.encode_to(buf)?;
        buf.extend_from_slice(&self.key);
        nonce_len.encode_to(buf)?;
        buf.extend_from_slice(&self.nonce);
        value_len.encode_to(buf)?;
        buf.extend_from_slice(&self.ciphertext);
        self.timestamp.encode_to(buf)?;
        self.deleted.encode_to(buf)?;
        self.checksum.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for RawRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;

        let (key_len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let key = take(buf, offset, key_len as usize)?;
        offset += key.len();

        let (nonce_len, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        let nonce = take(buf, offset, nonce_len as usize)?;
        offset += nonce.len();

        let (value_len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let ciphertext = take(buf, offset, value_len as usize)?;
        offset += ciphertext.len();

        let (timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (deleted, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        let (checksum, n) = u32::decode_from(&buf[offset..])?;
        offset += n;

        Ok((
            Self {
                key: key.to_vec(),
                nonce: nonce.to_vec(),
                ciphertext: ciphertext.to_vec(),
                timestamp,
                deleted,
                checksum,
            },
            offset,
        ))
    }
}

/// Slice `len` bytes out of `buf` starting at `offset`, bounds-checked.
fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], EncodingError> {
    if buf.len() < offset + len {
        return Err(EncodingError::UnexpectedEof {
            needed: offset + len,
            available: buf.len(),
        });
    }
    Ok(&buf[offset..offset + len])
}

/// Recomputes the CRC32 checksum for a record: over `key` alone for
/// tombstones, over `key || value` otherwise. `value` here is always the
/// *plaintext*, never the ciphertext.
pub fn compute_checksum(key: &[u8], value: &[u8], deleted: bool) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    if !deleted {
        hasher.update(value);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let record = RawRecord {
            key: b"hello".to_vec(),
            nonce: vec![1; 24],
            ciphertext: vec![2; 21],
            timestamp: 12345,
            deleted: false,
            checksum: 0xDEADBEEF,
        };
        let bytes = encoding::encode_to_vec(&record).unwrap();
        let (decoded, consumed) = encoding::decode_from_slice::<RawRecord>(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn checksum_differs_for_tombstone_vs_value() {
        let c1 = compute_checksum(b"k", b"v", false);
        let c2 = compute_checksum(b"k", b"v", true);
        assert_ne!(c1, c2);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let bytes = vec![5, 0, 0, 0, b'h', b'e']; // claims 5-byte key, only 2 present
        let err = encoding::decode_from_slice::<RawRecord>(&bytes).unwrap_err();
        assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
    }
}
