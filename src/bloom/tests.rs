use super::*;

#[test]
fn no_false_negatives_after_insert() {
    let mut bloom = BloomFilter::new(1000, 0.01);
    let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key-{i}").into_bytes()).collect();
    for k in &keys {
        bloom.insert(k);
    }
    for k in &keys {
        assert!(bloom.contains(k), "false negative for {k:?}");
    }
}

#[test]
fn false_positive_rate_within_bound() {
    let n = 2000usize;
    let target_fpp = 0.01;
    let mut bloom = BloomFilter::new(n, target_fpp);

    let inserted: Vec<Vec<u8>> = (0..n).map(|i| format!("present-{i}").into_bytes()).collect();
    for k in &inserted {
        bloom.insert(k);
    }

    let mut false_positives = 0usize;
    let trials = 20_000usize;
    for i in 0..trials {
        let probe = format!("absent-{i}").into_bytes();
        if bloom.contains(&probe) {
            false_positives += 1;
        }
    }

    let observed_fpp = false_positives as f64 / trials as f64;
    assert!(
        observed_fpp <= target_fpp * 2.0,
        "observed FPP {observed_fpp} exceeds 2x target {target_fpp}"
    );
}

#[test]
fn marshal_unmarshal_round_trip() {
    let mut bloom = BloomFilter::new(100, 0.02);
    for i in 0..100 {
        bloom.insert(format!("k{i}").as_bytes());
    }

    let bytes = bloom.marshal();
    assert_eq!(bytes.len(), bloom.marshaled_len());

    let restored = BloomFilter::unmarshal(&bytes).unwrap();
    assert_eq!(restored.num_bits(), bloom.num_bits());
    assert_eq!(restored.num_hashes(), bloom.num_hashes());
    for i in 0..100 {
        assert!(restored.contains(format!("k{i}").as_bytes()));
    }
}

#[test]
fn unmarshal_rejects_truncated_header() {
    let err = BloomFilter::unmarshal(&[1, 2, 3]).unwrap_err();
    assert!(matches!(err, BloomError::Truncated));
}

#[test]
fn unmarshal_rejects_short_bit_vector() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&128u64.to_le_bytes()); // claims 128 bits -> 2 words
    buf.extend_from_slice(&4u64.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes()); // only one word present
    let err = BloomFilter::unmarshal(&buf).unwrap_err();
    assert!(matches!(err, BloomError::LengthMismatch { .. }));
}

#[test]
fn num_hashes_clamped_to_sixteen() {
    // An absurdly low false-positive rate would otherwise push k far past 16.
    let bloom = BloomFilter::new(10, 1e-30);
    assert!(bloom.num_hashes() <= 16);
}

#[test]
fn empty_filter_contains_nothing_spuriously_often() {
    let bloom = BloomFilter::new(0, 0.01);
    assert!(!bloom.contains(b"anything"));
}

#[test]
fn bits_per_key_constructor_has_zero_false_negatives() {
    let mut bloom = BloomFilter::new_with_bits_per_key(1000, 10);
    for i in 0..1000u32 {
        bloom.insert(&i.to_le_bytes());
    }
    for i in 0..1000u32 {
        assert!(bloom.contains(&i.to_le_bytes()));
    }
}

#[test]
fn bits_per_key_sizing_is_roughly_ten_bits_per_key() {
    let bloom = BloomFilter::new_with_bits_per_key(1000, 10);
    // next_power_of_two(10_000) == 16384
    assert_eq!(bloom.num_bits(), 16384);
}
