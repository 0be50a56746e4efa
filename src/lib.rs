//! # AeternusDB
//!
//! An embeddable, encrypted key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture, with a secure
//! evidence-custody ledger (the **Envelope** subsystem) layered on top of
//! the plain key-value API. Designed for fast, durable, crash-safe writes
//! where every on-disk byte is sealed under an authenticated cipher.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐                 ┌─────────────┐      │
//! │  │  MemTable   │   freeze/flush  │  SSTables   │      │
//! │  │  + WAL      │ ───────────────►│  (on disk)  │      │
//! │  └─────┬───────┘                 └──────┬──────┘      │
//! │        │ put/get/delete                 │ newest-to-oldest read │
//! │        ▼                                ▼             │
//! │  ┌────────────┐                 ┌─────────────┐      │
//! │  │  LRU cache  │                 │ bloom filter│      │
//! │  └────────────┘                 └─────────────┘      │
//! │                                                      │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │  Envelope ledger (custody events, hash chain)    │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crypto`] | AEAD (XChaCha20-Poly1305 / AES-256-GCM), KDFs, master-key marker |
//! | [`record`] | Shared on-disk encrypted entry framing (WAL + SSTable) |
//! | [`wal`] | Durable, encrypted write-ahead log with rotation and retention |
//! | [`memtable`] | In-memory, ordered write buffer |
//! | [`bloom`] | Fixed-size double-hashed bloom filter |
//! | [`sstable`] | Immutable, sorted, on-disk table with bloom filter and index |
//! | [`cache`] | Sharded LRU value cache |
//! | [`envelope`] | Append-only custody ledger with hash-chain integrity |
//! | [`config`] | Engine configuration surface |
//! | [`engine`] | Orchestrates WAL + MemTable + SSTables + cache + envelopes |
//!
//! ## Key Features
//!
//! - **Encrypted write-ahead logging** — every mutation is sealed with an
//!   AEAD cipher and persisted to the WAL before being acknowledged.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Atomic SSTable publication** — tables are built under a temp name
//!   and atomically renamed into place; corrupt tables are quarantined.
//! - **Secure Envelope ledger** — an append-only, hash-chained custody
//!   record for evidentiary payloads, with time-lock release policies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aeternusdb::config::EngineConfig;
//! use aeternusdb::engine::Engine;
//!
//! let config = EngineConfig::default();
//! let engine = Engine::open("/tmp/my_db", config).unwrap();
//!
//! // Write
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), None);
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod engine;
pub mod envelope;
pub mod memtable;
pub mod record;
pub mod sstable;
pub mod wal;
