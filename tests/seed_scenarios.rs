use std::sync::Arc;

use aeternusdb::config::EngineConfig;
use aeternusdb::crypto::{Crypto, EncryptionMode};
use aeternusdb::engine::utils::Entry;
use aeternusdb::engine::{Engine, EngineError};
use aeternusdb::envelope::EnvelopeError;
use aeternusdb::sstable::SSTable;
use tempfile::tempdir;

fn config_with_key(key: [u8; 32]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.encryption_key = Some(key);
    config
}

/// S1 — writes survive a close/reopen cycle by replaying the WAL.
#[test]
fn s1_wal_replay_recovers_unflushed_writes() {
    let dir = tempdir().unwrap();
    let key = [101u8; 32];

    {
        let engine = Engine::open(dir.path(), config_with_key(key)).unwrap();
        engine.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
        engine.put(b"k2".to_vec(), b"v2".to_vec()).unwrap();
        engine.close().unwrap();
    }

    let reopened = Engine::open(dir.path(), config_with_key(key)).unwrap();
    assert_eq!(reopened.get(b"k1".to_vec()).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(reopened.get(b"k2".to_vec()).unwrap(), Some(b"v2".to_vec()));
}

/// S2 — flushing 10,000 keys publishes exactly one SSTable, atomically,
/// and every key remains readable afterward.
#[test]
fn s2_bulk_flush_publishes_one_sstable_atomically() {
    let dir = tempdir().unwrap();
    let key = [102u8; 32];
    let engine = Engine::open(dir.path(), config_with_key(key)).unwrap();

    for i in 0..10_000u32 {
        engine
            .put(format!("key-{i:05}").into_bytes(), format!("value-{i}").into_bytes())
            .unwrap();
    }
    engine.flush().unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
    let sst_files: Vec<_> = entries
        .iter()
        .filter(|e| e.file_name().to_string_lossy().starts_with("sst_"))
        .collect();
    let tmp_files: Vec<_> = entries
        .iter()
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
        .collect();

    assert_eq!(sst_files.len(), 1, "expected exactly one sstable, found {sst_files:?}");
    assert!(tmp_files.is_empty(), "expected no leftover temp files, found {tmp_files:?}");

    for i in 0..10_000u32 {
        let got = engine.get(format!("key-{i:05}").into_bytes()).unwrap();
        assert_eq!(got, Some(format!("value-{i}").into_bytes()));
    }
}

/// S3 — a custody chain built across three officers survives export and
/// import into a fresh database with its hash chain and root intact.
#[test]
fn s3_custody_chain_round_trips_through_export_and_import() {
    let src_dir = tempdir().unwrap();
    let dst_dir = tempdir().unwrap();
    let export_path = src_dir.path().join("envelope-export.json");

    let src_engine = Engine::open(src_dir.path(), config_with_key([103u8; 32])).unwrap();
    src_engine
        .create_envelope("case-001", b"evidence payload".to_vec(), "officer-A")
        .unwrap();
    src_engine
        .append_custody_event("case-001", "officer-B", "transfer", "moved to cold storage")
        .unwrap();
    src_engine
        .append_custody_event("case-001", "officer-C", "review", "reviewed for chain of custody")
        .unwrap();
    src_engine
        .append_custody_event("case-001", "officer-D", "archive", "archived pending trial")
        .unwrap();

    src_engine.export_envelope("case-001", &export_path).unwrap();

    let dst_engine = Engine::open(dst_dir.path(), config_with_key([104u8; 32])).unwrap();
    let imported = dst_engine.import_envelope(&export_path).unwrap();

    assert_eq!(imported.custody_ledger.len(), 4);
    for (i, event) in imported.custody_ledger.iter().enumerate() {
        assert_eq!(event.sequence, i as u64 + 1);
    }
    for pair in imported.custody_ledger.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].event_hash);
    }

    let report = dst_engine.verify_envelope("case-001").unwrap();
    assert!(report.ok);
    assert_eq!(report.recomputed_ledger_root, imported.integrity.ledger_root);
}

/// S4 — tampering with a custody note after export is caught on import
/// and verification, pinpointing the broken position.
#[test]
fn s4_tampered_custody_note_breaks_the_chain_at_its_position() {
    let src_dir = tempdir().unwrap();
    let dst_dir = tempdir().unwrap();
    let export_path = src_dir.path().join("envelope-export.json");

    let src_engine = Engine::open(src_dir.path(), config_with_key([105u8; 32])).unwrap();
    src_engine
        .create_envelope("case-002", b"evidence payload".to_vec(), "officer-A")
        .unwrap();
    src_engine
        .append_custody_event("case-002", "officer-B", "transfer", "moved to cold storage")
        .unwrap();
    src_engine
        .append_custody_event("case-002", "officer-C", "review", "reviewed for chain of custody")
        .unwrap();
    src_engine.export_envelope("case-002", &export_path).unwrap();

    let raw = std::fs::read_to_string(&export_path).unwrap();
    let mut envelope: aeternusdb::envelope::Envelope = serde_json::from_str(&raw).unwrap();
    envelope.custody_ledger[1].notes = "tampered note".to_string();
    std::fs::write(&export_path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

    let dst_engine = Engine::open(dst_dir.path(), config_with_key([106u8; 32])).unwrap();
    dst_engine.import_envelope(&export_path).unwrap();

    let err = dst_engine.verify_envelope("case-002").unwrap_err();
    match err {
        EngineError::Envelope(EnvelopeError::LedgerChainBroken { position, .. }) => {
            assert_eq!(position, 1);
        }
        other => panic!("expected LedgerChainBroken at position 1, got {other:?}"),
    }
}

/// S5 — reopening with the wrong master key is rejected without touching
/// `master.key`/`key.marker`; reopening with the right key still works.
#[test]
fn s5_wrong_master_key_is_rejected_and_leaves_key_material_untouched() {
    let dir = tempdir().unwrap();
    let k1 = [107u8; 32];
    let k2 = [108u8; 32];

    {
        let engine = Engine::open(dir.path(), config_with_key(k1)).unwrap();
        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        engine.close().unwrap();
    }

    let marker_path = dir.path().join("key.marker");
    let master_key_path = dir.path().join("master.key");
    let marker_before = std::fs::read(&marker_path).unwrap();
    let master_key_before = std::fs::read(&master_key_path).unwrap();

    let err = Engine::open(dir.path(), config_with_key(k2)).unwrap_err();
    assert!(matches!(err, EngineError::WrongMasterKey));

    assert_eq!(std::fs::read(&marker_path).unwrap(), marker_before);
    assert_eq!(std::fs::read(&master_key_path).unwrap(), master_key_before);

    let reopened = Engine::open(dir.path(), config_with_key(k1)).unwrap();
    assert_eq!(reopened.get(b"k".to_vec()).unwrap(), Some(b"v".to_vec()));
}

/// S6 — repairing an SSTable with a corrupted tail recovers every entry
/// written before the corruption.
#[test]
fn s6_sstable_repair_recovers_entries_before_corruption() {
    let dir = tempdir().unwrap();
    let good_path = dir.path().join("sst_good.db");
    let repaired_path = dir.path().join("sst_repaired.db");
    let crypto = Arc::new(Crypto::new(EncryptionMode::Standard, &[109u8; 32]));

    let source = vec![
        Entry::new_put(b"alpha".to_vec(), b"1".to_vec(), 1_000, 0),
        Entry::new_put(b"bravo".to_vec(), b"2".to_vec(), 1_001, 0),
        Entry::new_put(b"charlie".to_vec(), b"3".to_vec(), 1_002, 0),
    ];
    SSTable::build(&good_path, source.clone(), Arc::clone(&crypto), 10).unwrap();

    let mut bytes = std::fs::read(&good_path).unwrap();
    let corrupt_from = bytes.len().saturating_sub(20);
    for b in &mut bytes[corrupt_from..] {
        *b ^= 0xFF;
    }
    std::fs::write(&good_path, &bytes).unwrap();

    let recovered = SSTable::repair(&good_path, &repaired_path, Arc::clone(&crypto), 10).unwrap();
    assert!(recovered >= 2, "expected at least 2 recovered entries, got {recovered}");

    let repaired = SSTable::open(&repaired_path, crypto).unwrap();
    let first = repaired.get(&source[0].key).unwrap().expect("first entry recoverable");
    assert_eq!(first.value, source[0].value);
}
