use super::*;

#[test]
fn put_then_get_returns_live_entry() {
    let mt = Memtable::new();
    mt.put(Entry::new_put(b"k".to_vec(), b"v".to_vec(), 1, 0)).unwrap();
    let got = mt.get(b"k").unwrap().unwrap();
    assert_eq!(got.value, b"v");
    assert!(!got.deleted);
}

#[test]
fn missing_key_returns_none() {
    let mt = Memtable::new();
    assert!(mt.get(b"nope").unwrap().is_none());
}

#[test]
fn delete_shadows_prior_put_as_tombstone() {
    let mt = Memtable::new();
    mt.put(Entry::new_put(b"k".to_vec(), b"v".to_vec(), 1, 0)).unwrap();
    mt.delete(b"k".to_vec(), 2).unwrap();
    let got = mt.get(b"k").unwrap().unwrap();
    assert!(got.deleted);
    assert!(got.value.is_empty());
}

#[test]
fn size_bytes_tracks_overwrites_not_just_inserts() {
    let mt = Memtable::new();
    mt.put(Entry::new_put(b"k".to_vec(), b"v".to_vec(), 1, 0)).unwrap();
    let after_first = mt.size_bytes();
    mt.put(Entry::new_put(b"k".to_vec(), b"vv".to_vec(), 2, 0)).unwrap();
    let after_second = mt.size_bytes();
    assert_eq!(after_second, after_first + 1);
}

#[test]
fn iter_for_flush_yields_keys_in_order() {
    let mt = Memtable::new();
    mt.put(Entry::new_put(b"b".to_vec(), b"2".to_vec(), 1, 0)).unwrap();
    mt.put(Entry::new_put(b"a".to_vec(), b"1".to_vec(), 1, 0)).unwrap();
    mt.put(Entry::new_put(b"c".to_vec(), b"3".to_vec(), 1, 0)).unwrap();
    let keys: Vec<Vec<u8>> = mt.iter_for_flush().unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn keys_with_prefix_excludes_tombstones() {
    let mt = Memtable::new();
    mt.put(Entry::new_put(b"user:1".to_vec(), b"x".to_vec(), 1, 0)).unwrap();
    mt.put(Entry::new_put(b"user:2".to_vec(), b"y".to_vec(), 1, 0)).unwrap();
    mt.delete(b"user:2".to_vec(), 2).unwrap();
    mt.put(Entry::new_put(b"other:1".to_vec(), b"z".to_vec(), 1, 0)).unwrap();

    let keys = mt.keys_with_prefix(b"user:").unwrap();
    assert_eq!(keys, vec![b"user:1".to_vec()]);
}

#[test]
fn freeze_is_a_consistent_read_only_snapshot() {
    let mt = Memtable::new();
    mt.put(Entry::new_put(b"k".to_vec(), b"v".to_vec(), 1, 0)).unwrap();
    let frozen = mt.freeze();
    assert_eq!(frozen.get(b"k").unwrap().unwrap().value, b"v");
    assert_eq!(frozen.size_bytes(), mt.size_bytes());
}

#[test]
fn clone_shares_underlying_state() {
    let mt = Memtable::new();
    let clone = mt.clone();
    mt.put(Entry::new_put(b"k".to_vec(), b"v".to_vec(), 1, 0)).unwrap();
    assert_eq!(clone.get(b"k").unwrap().unwrap().value, b"v");
}
