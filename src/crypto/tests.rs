use super::*;

fn key(byte: u8) -> [u8; KEY_LEN] {
    [byte; KEY_LEN]
}

#[test]
fn seal_open_round_trip_standard() {
    let crypto = Crypto::new(EncryptionMode::Standard, &key(7));
    let aad = entry_aad(b"hello", 1, 0, false);
    let (nonce, ciphertext) = crypto.seal(b"world", &aad).unwrap();
    assert_eq!(nonce.len(), 24);
    let plaintext = crypto.open(&nonce, &ciphertext, &aad).unwrap();
    assert_eq!(plaintext, b"world");
}

#[test]
fn seal_open_round_trip_fips() {
    let crypto = Crypto::new(EncryptionMode::Fips, &key(9));
    let aad = entry_aad(b"hello", 1, 0, false);
    let (nonce, ciphertext) = crypto.seal(b"world", &aad).unwrap();
    assert_eq!(nonce.len(), 12);
    let plaintext = crypto.open(&nonce, &ciphertext, &aad).unwrap();
    assert_eq!(plaintext, b"world");
}

#[test]
fn open_fails_on_aad_mismatch() {
    let crypto = Crypto::new(EncryptionMode::Standard, &key(1));
    let aad = entry_aad(b"k", 1, 0, false);
    let (nonce, ciphertext) = crypto.seal(b"v", &aad).unwrap();
    let tampered_aad = entry_aad(b"k", 2, 0, false);
    assert!(matches!(
        crypto.open(&nonce, &ciphertext, &tampered_aad),
        Err(CryptoError::DecryptAuthFail)
    ));
}

#[test]
fn open_fails_on_ciphertext_tamper() {
    let crypto = Crypto::new(EncryptionMode::Fips, &key(3));
    let aad = entry_aad(b"k", 1, 0, false);
    let (nonce, mut ciphertext) = crypto.seal(b"value", &aad).unwrap();
    ciphertext[0] ^= 0xFF;
    assert!(crypto.open(&nonce, &ciphertext, &aad).is_err());
}

#[test]
fn open_rejects_wrong_nonce_length() {
    let crypto = Crypto::new(EncryptionMode::Standard, &key(4));
    let err = crypto.open(&[0u8; 12], b"whatever", b"").unwrap_err();
    assert!(matches!(
        err,
        CryptoError::InvalidNonceLength {
            expected: 24,
            actual: 12
        }
    ));
}

#[test]
fn empty_plaintext_seals_and_opens() {
    let crypto = Crypto::new(EncryptionMode::Standard, &key(5));
    let aad = entry_aad(b"tombstone-key", 1, 0, true);
    let (nonce, ciphertext) = crypto.seal(b"", &aad).unwrap();
    assert_eq!(ciphertext.len(), 16); // tag only
    assert_eq!(crypto.open(&nonce, &ciphertext, &aad).unwrap(), b"");
}

#[test]
fn parse_master_key_raw() {
    let raw = [42u8; KEY_LEN];
    assert_eq!(parse_master_key(&raw).unwrap(), raw);
}

#[test]
fn parse_master_key_hex() {
    let raw = [1u8; KEY_LEN];
    let hexed = hex::encode(raw);
    assert_eq!(parse_master_key(hexed.as_bytes()).unwrap(), raw);
}

#[test]
fn parse_master_key_base64() {
    let raw = [2u8; KEY_LEN];
    let b64 = B64.encode(raw);
    assert_eq!(parse_master_key(b64.as_bytes()).unwrap(), raw);
}

#[test]
fn parse_master_key_rejects_garbage() {
    assert!(matches!(
        parse_master_key(b"not a key at all"),
        Err(CryptoError::UnparsableMasterKey)
    ));
}

#[test]
fn pbkdf2_rejects_low_iterations() {
    let err = derive_key_pbkdf2(b"password", &[0u8; 16], 100).unwrap_err();
    assert!(matches!(err, CryptoError::KdfParamsInvalid(_)));
}

#[test]
fn pbkdf2_rejects_short_salt() {
    let err = derive_key_pbkdf2(b"password", &[0u8; 8], 10_000).unwrap_err();
    assert!(matches!(err, CryptoError::KdfParamsInvalid(_)));
}

#[test]
fn pbkdf2_is_deterministic() {
    let salt = [9u8; 16];
    let a = derive_key_pbkdf2(b"password", &salt, 10_000).unwrap();
    let b = derive_key_pbkdf2(b"password", &salt, 10_000).unwrap();
    assert_eq!(a, b);
}

#[test]
fn argon2id_rejects_low_memory() {
    let err = derive_key_argon2id(b"password", &[0u8; 16], 1024, 3, 4).unwrap_err();
    assert!(matches!(err, CryptoError::KdfParamsInvalid(_)));
}

#[test]
fn argon2id_is_deterministic() {
    let salt = [3u8; 16];
    let a = derive_key_argon2id(b"password", &salt, 65_536, 3, 4).unwrap();
    let b = derive_key_argon2id(b"password", &salt, 65_536, 3, 4).unwrap();
    assert_eq!(a, b);
}

#[test]
fn derive_object_key_is_deterministic_given_salt() {
    let master = key(11);
    let (k1, salt1) = derive_object_key(&master, b"object-1", None);
    let (k2, salt2) = derive_object_key(&master, b"object-1", Some(&salt1));
    assert_eq!(k1, k2);
    assert_eq!(salt1, salt2);
}

#[test]
fn derive_object_key_differs_per_object_id() {
    let master = key(12);
    let (_, salt) = derive_object_key(&master, b"object-a", None);
    let (ka, _) = derive_object_key(&master, b"object-a", Some(&salt));
    let (kb, _) = derive_object_key(&master, b"object-b", Some(&salt));
    assert_ne!(ka, kb);
}

#[test]
fn key_marker_round_trips_for_correct_key() {
    let master = key(13);
    let crypto = Crypto::new(EncryptionMode::Standard, &master);
    let marker = build_key_marker(&crypto, &master).unwrap();
    verify_key_marker(&crypto, &master, &marker).unwrap();
}

#[test]
fn key_marker_rejects_wrong_key() {
    let master = key(14);
    let wrong = key(15);
    let crypto_master = Crypto::new(EncryptionMode::Standard, &master);
    let crypto_wrong = Crypto::new(EncryptionMode::Standard, &wrong);
    let marker = build_key_marker(&crypto_master, &master).unwrap();
    let err = verify_key_marker(&crypto_wrong, &wrong, &marker).unwrap_err();
    assert!(matches!(err, CryptoError::WrongMasterKey));
}

#[test]
fn key_marker_rejects_malformed_base64() {
    let master = key(16);
    let crypto = Crypto::new(EncryptionMode::Standard, &master);
    let err = verify_key_marker(&crypto, &master, "not-valid-base64!!").unwrap_err();
    assert!(matches!(err, CryptoError::MalformedMarker));
}

#[test]
fn secure_zero_clears_buffer() {
    let mut buf = [1u8, 2, 3, 4];
    secure_zero(&mut buf);
    assert_eq!(buf, [0u8; 4]);
}
