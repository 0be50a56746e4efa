//! Secure Envelope custody ledger.
//!
//! An envelope is a self-contained, tamper-evident bundle: a payload plus
//! an append-only custody ledger, a general audit trail, a tamper-signal
//! log, and a time-lock release policy. Unlike a typical KV value, an
//! envelope's state is never overwritten in place — every mutation reads
//! the current value, appends to one of its logs, recomputes the affected
//! integrity root, and writes the whole envelope back as one value.
//!
//! Envelope state lives **inside** the encrypted LSM store, as the value
//! of the reserved key `envelopes/<envelope_id>` (see
//! [`crate::engine::Engine`]'s `RESERVED_PREFIXES`) — it goes through the
//! same WAL, memtable, and SSTable machinery as any other key, and is
//! therefore AEAD-sealed at rest like every other entry. This module does
//! not touch the filesystem directly; it is generic over an
//! [`EnvelopeStore`] that the engine implements. The only filesystem I/O
//! here is [`export_envelope`]/[`import_envelope`], which produce or
//! consume a standalone, human-legible JSON file at a caller-chosen path,
//! written atomically (temp file + rename) the same way
//! [`crate::sstable`] publishes its on-disk tables.
//!
//! ## Integrity scheme
//!
//! `ledger_root` and `audit_root` are flat hash-chain tips, not Merkle
//! roots: each is the `event_hash` of the *last* entry in its log (or
//! `sha256("")`'s hex digest for an empty log). Every entry's hash commits
//! to its own fields plus the previous entry's hash, so editing any field
//! anywhere in the chain changes every hash after it — [`verify_envelope`]
//! walks the whole chain and reports exactly where it breaks.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[cfg(test)]
mod tests;

const SCHEMA_VERSION: u32 = 1;

/// Storage backend an envelope operation reads and writes through.
/// [`crate::engine::Engine`] implements this directly over its own
/// `put`/`get` machinery (bypassing the public reserved-prefix check,
/// since writing `envelopes/<id>` is exactly what this module is for).
pub trait EnvelopeStore {
    /// Fetch the raw bytes stored at `key`, or `None` if absent.
    fn envelope_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EnvelopeError>;
    /// Store `value` at `key`, creating or overwriting it.
    fn envelope_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EnvelopeError>;
}

/// Errors produced by envelope operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// Underlying filesystem error (export/import only).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The envelope value failed to (de)serialize as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing KV store reported an error while reading or writing
    /// the envelope's value.
    #[error("envelope store error: {0}")]
    Backend(String),

    /// No envelope exists for the given id.
    #[error("envelope not found: {0}")]
    NotFound(String),

    /// [`create_envelope`] was called for an id that already has a value.
    #[error("envelope already exists: {0}")]
    AlreadyExists(String),

    /// The envelope is time-locked and the unlock time has not yet passed.
    #[error("time-lock active until unix time {unlock_not_before}")]
    TimeLockActive {
        /// Unix timestamp (seconds) at which the lock releases.
        unlock_not_before: u64,
    },

    /// A new custody event was rejected because the envelope is archived.
    #[error("envelope {id} is archived and accepts no further events")]
    Archived {
        /// The envelope id.
        id: String,
    },

    /// The custody or audit hash chain does not reproduce from its stored
    /// fields, or the stored root does not match the recomputed tip.
    #[error("ledger chain broken at position {position}: {reason}")]
    LedgerChainBroken {
        /// Index into the ledger (or audit log) where the break was found.
        position: usize,
        /// Human-readable cause.
        reason: String,
    },

    /// The stored `payload_hash` does not match a fresh hash of the
    /// decoded inline payload.
    #[error("payload hash mismatch")]
    PayloadHashMismatch,

    /// An imported file did not parse as a well-formed envelope.
    #[error("invalid envelope schema: {0}")]
    InvalidSchema(String),

    /// A freshly generated event id collided with one already in the
    /// ledger (astronomically unlikely; surfaced rather than silently
    /// retried so a caller can decide how to react).
    #[error("duplicate custody event id: {0}")]
    DuplicateEventId(String),
}

/// Lifecycle state of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    /// Created but never had a custody event beyond its own creation.
    Draft,
    /// Has at least one custody event recorded after creation.
    Sealed,
    /// A tamper signal at or above threshold has been recorded.
    UnderReview,
    /// Retained for record-keeping only; accepts no further events except
    /// `archive.verify`.
    Archived,
}

/// The regulatory/operational category of an envelope's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Material submitted as evidence in a court proceeding.
    CourtEvidence,
    /// Material compiled as part of an ongoing investigation.
    InvestigationRecord,
    /// Standalone proof of a custody transfer.
    CustodyProof,
    /// Archived closed-circuit camera footage.
    CctvArchive,
}

/// The envelope's carried content: either inlined directly or referenced
/// by path in an external object store (out of this crate's scope; see
/// `spec.md` §1's "objects/" collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadMeta {
    /// Caller-chosen content kind (e.g. `"image"`, `"video"`, `"document"`).
    pub kind: String,
    /// Path into an external object store, if the payload is referenced
    /// rather than inlined.
    pub object_path: Option<String>,
    /// Base64-encoded payload bytes, when carried inline.
    pub inline_data: Option<String>,
    /// Free-form hint about `inline_data`'s encoding (e.g. `"utf-8"`,
    /// `"jpeg"`), for the caller's own interpretation.
    pub encoding_hint: Option<String>,
    /// Caller-supplied key/value metadata, carried verbatim.
    pub metadata: BTreeMap<String, String>,
}

/// Release-gating policy: the envelope may not be unlocked before this
/// unix timestamp (seconds). `0` means no gate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeLockPolicy {
    /// Unix timestamp (seconds) before which release must not occur.
    pub unlock_not_before: u64,
}

/// Whether custody events on this envelope are expected to carry an
/// `actor_fingerprint` (device/biometric attestation, supplied by an
/// external collaborator).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FingerprintPolicy {
    /// Whether fingerprint attestation is required on custody events.
    pub required: bool,
}

/// The tamper-signal score at or above which the envelope is
/// automatically moved to [`EnvelopeStatus::UnderReview`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TamperPolicy {
    /// Score threshold in `[0.0, 1.0]`.
    pub threshold: f64,
}

impl Default for TamperPolicy {
    fn default() -> Self {
        Self { threshold: 0.75 }
    }
}

/// Whether this envelope's payload is eligible for cold-storage tiering
/// by an external collaborator. The core neither implements nor enforces
/// tiering; it only carries the flag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ColdStoragePolicy {
    /// Whether cold-storage tiering is permitted for this envelope.
    pub enabled: bool,
}

/// The full policy bundle an envelope is created with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policies {
    /// Release-gating policy.
    pub time_lock: TimeLockPolicy,
    /// Actor-fingerprint attestation policy.
    pub fingerprint: FingerprintPolicy,
    /// Tamper-signal review threshold.
    pub tamper: TamperPolicy,
    /// Cold-storage eligibility.
    pub cold_storage: ColdStoragePolicy,
}

/// Current time-lock state, derived from [`TimeLockPolicy`] at creation
/// and mutated only by [`approve_time_lock_unlock`] or by the automatic
/// deadline check in [`load_envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeLockState {
    /// Whether the envelope is currently locked.
    pub active: bool,
    /// Unix timestamp (seconds) before which release must not occur.
    pub unlock_not_before: u64,
    /// Who approved release, once approved.
    pub unlock_approved_by: Option<String>,
    /// Free-text justification supplied at approval time.
    pub unlock_reason: Option<String>,
    /// Unix timestamp (seconds) release was approved, once approved.
    pub unlock_at: Option<u64>,
}

/// One append-only custody-chain entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyEvent {
    /// Random hex id, unique within this envelope's ledger.
    pub event_id: String,
    /// 1-based position in the ledger.
    pub sequence: u64,
    /// Unix timestamp (seconds) the event was recorded.
    pub timestamp: u64,
    /// Who performed the action (e.g. `"officer-B"`).
    pub actor: String,
    /// Device/biometric attestation for `actor`, if supplied.
    pub actor_fingerprint: Option<String>,
    /// What was done (e.g. `"create"`, `"transfer"`, `"archive"`).
    pub action: String,
    /// Where the action took place, if supplied.
    pub location: Option<String>,
    /// Free-text context.
    pub notes: String,
    /// Caller-described state of the evidence at this event, if supplied.
    pub evidence_state: Option<String>,
    /// `event_hash` of the preceding entry (`sha256("")`'s hex for the
    /// first entry).
    pub prev_hash: String,
    /// Hash over this event's own fields plus `prev_hash`, hex-encoded.
    pub event_hash: String,
}

/// One append-only tamper-signal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TamperSignal {
    /// Random hex id, unique within this envelope's signal log.
    pub signal_id: String,
    /// 1-based position in the signal log.
    pub sequence: u64,
    /// Unix timestamp (seconds) the signal was recorded.
    pub timestamp: u64,
    /// Who or what detected the signal.
    pub detected_by: String,
    /// Free-text description of what was observed.
    pub description: String,
    /// Detector-assigned confidence score in `[0.0, 1.0]`.
    pub score: f64,
    /// The [`TamperPolicy::threshold`] in effect when this signal was
    /// recorded.
    pub threshold: f64,
}

/// One append-only general operations-log entry, recorded on every
/// mutating envelope call. Distinct from [`CustodyEvent`] (domain-specific
/// chain-of-custody semantics) and [`TamperSignal`] (raw detector output);
/// this is the trail [`Integrity::audit_root`] is computed over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Random hex id, unique within this envelope's audit log.
    pub entry_id: String,
    /// 1-based position in the audit log.
    pub sequence: u64,
    /// Unix timestamp (seconds) the entry was recorded.
    pub timestamp: u64,
    /// Which operation produced this entry (e.g. `"create_envelope"`,
    /// `"append_custody_event"`).
    pub action: String,
    /// Free-text detail about the operation.
    pub detail: String,
    /// `event_hash` of the preceding entry (`sha256("")`'s hex for the
    /// first entry).
    pub prev_hash: String,
    /// Hash over this entry's own fields plus `prev_hash`, hex-encoded.
    pub event_hash: String,
}

/// Integrity roots stored alongside an envelope, recomputed and checked
/// by [`verify_envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integrity {
    /// `sha256` of the decoded inline payload, hex-encoded. Not checked
    /// by [`verify_envelope`] when the payload is reference-only (no
    /// `inline_data`), since recomputing it would require fetching the
    /// referenced object from an external collaborator.
    pub payload_hash: String,
    /// Flat hash-chain tip over `custody_ledger`.
    pub ledger_root: String,
    /// Flat hash-chain tip over `audit_log`.
    pub audit_root: String,
    /// A binding over the time-lock policy and current state, refreshed
    /// whenever either changes. Informational only — not re-verified by
    /// [`verify_envelope`], since `spec.md` names no invariant for it.
    pub time_seal: TimeSeal,
}

/// See [`Integrity::time_seal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeal {
    /// `sha256(unlock_not_before || active || unlock_at)`, hex-encoded.
    pub hash: String,
    /// Unix timestamp (seconds) the seal was last computed.
    pub sealed_at: u64,
}

/// A self-contained, tamper-evident custody bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// On-disk/on-wire schema version, for forward compatibility.
    pub schema_version: u32,
    /// Globally unique identifier; also the KV key suffix under
    /// `envelopes/`.
    pub envelope_id: String,
    /// Caller-facing display label.
    pub label: String,
    /// Regulatory/operational category.
    pub envelope_type: EnvelopeType,
    /// Unix timestamp (seconds) of [`create_envelope`].
    pub created_at: u64,
    /// Who created the envelope.
    pub created_by: String,
    /// Free-text case/matter reference, for the caller's own linkage.
    pub case_reference: String,
    /// The carried content.
    pub payload: PayloadMeta,
    /// The policy bundle this envelope was created with.
    pub policies: Policies,
    /// Current lifecycle state.
    pub status: EnvelopeStatus,
    /// Append-only custody chain, oldest first. Entry 1 is always the
    /// envelope's own creation.
    pub custody_ledger: Vec<CustodyEvent>,
    /// Append-only general operations log, oldest first.
    pub audit_log: Vec<AuditEntry>,
    /// Append-only tamper-signal log, oldest first.
    pub tamper_signals: Vec<TamperSignal>,
    /// Current time-lock state.
    pub time_lock_status: TimeLockState,
    /// Integrity roots.
    pub integrity: Integrity,
}

/// Result of a successful [`verify_envelope`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Always `true` — a broken chain returns an error instead.
    pub ok: bool,
    /// Recomputed `ledger_root`, equal to the stored one when `ok` is `true`.
    pub recomputed_ledger_root: String,
    /// Recomputed `audit_root`, equal to the stored one when `ok` is `true`.
    pub recomputed_audit_root: String,
}

/// Inputs to [`create_envelope`]. Use [`CreateEnvelopeRequest::new`] for
/// sensible defaults, then override with the `with_*` builder methods.
#[derive(Debug, Clone)]
pub struct CreateEnvelopeRequest {
    id: String,
    label: String,
    envelope_type: EnvelopeType,
    created_by: String,
    case_reference: String,
    payload: Vec<u8>,
    policies: Policies,
}

impl CreateEnvelopeRequest {
    /// Start a request for envelope `id` carrying `payload`, authored by
    /// `created_by`. Defaults: `label = id`, `envelope_type =
    /// CourtEvidence`, `case_reference` empty, default [`Policies`].
    pub fn new(id: impl Into<String>, payload: Vec<u8>, created_by: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            envelope_type: EnvelopeType::CourtEvidence,
            created_by: created_by.into(),
            case_reference: String::new(),
            id,
            payload,
            policies: Policies::default(),
        }
    }

    /// Override the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Override the envelope type.
    pub fn with_type(mut self, envelope_type: EnvelopeType) -> Self {
        self.envelope_type = envelope_type;
        self
    }

    /// Override the case reference.
    pub fn with_case_reference(mut self, case_reference: impl Into<String>) -> Self {
        self.case_reference = case_reference.into();
        self
    }

    /// Override the policy bundle.
    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }
}

/// Inputs to [`append_custody_event`]. Use
/// [`CustodyEventRequest::new`] for the required fields, then override
/// with the `with_*` builder methods.
#[derive(Debug, Clone)]
pub struct CustodyEventRequest {
    actor: String,
    actor_fingerprint: Option<String>,
    action: String,
    location: Option<String>,
    notes: String,
    evidence_state: Option<String>,
}

impl CustodyEventRequest {
    /// Start a request authored by `actor` performing `action`, with
    /// free-text `notes`.
    pub fn new(actor: impl Into<String>, action: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            actor_fingerprint: None,
            action: action.into(),
            location: None,
            notes: notes.into(),
            evidence_state: None,
        }
    }

    /// Attach an actor-fingerprint attestation.
    pub fn with_actor_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.actor_fingerprint = Some(fingerprint.into());
        self
    }

    /// Attach a location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach a caller-described evidence state.
    pub fn with_evidence_state(mut self, evidence_state: impl Into<String>) -> Self {
        self.evidence_state = Some(evidence_state.into());
        self
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn chain_hash(id: &str, sequence: u64, fields: &[&str], timestamp: u64, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    for field in fields {
        hasher.update(field.as_bytes());
    }
    hasher.update(timestamp.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

fn ledger_root(events: &[CustodyEvent]) -> String {
    events.last().map(|e| e.event_hash.clone()).unwrap_or_else(|| sha256_hex(b""))
}

fn audit_root(entries: &[AuditEntry]) -> String {
    entries.last().map(|e| e.event_hash.clone()).unwrap_or_else(|| sha256_hex(b""))
}

fn time_seal(state: &TimeLockState, sealed_at: u64) -> TimeSeal {
    let mut hasher = Sha256::new();
    hasher.update(state.unlock_not_before.to_le_bytes());
    hasher.update([state.active as u8]);
    hasher.update(state.unlock_at.unwrap_or(0).to_le_bytes());
    TimeSeal {
        hash: hex::encode(hasher.finalize()),
        sealed_at,
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn random_id() -> String {
    let mut buf = [0u8; 16];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn key_for(id: &str) -> Vec<u8> {
    format!("envelopes/{id}").into_bytes()
}

fn push_audit_entry(envelope: &mut Envelope, action: &str, detail: &str) {
    let prev_hash = audit_root(&envelope.audit_log);
    let sequence = envelope.audit_log.len() as u64 + 1;
    let timestamp = now_secs();
    let entry_id = random_id();
    let event_hash = chain_hash(&entry_id, sequence, &[action, detail], timestamp, &prev_hash);
    envelope.audit_log.push(AuditEntry {
        entry_id,
        sequence,
        timestamp,
        action: action.to_string(),
        detail: detail.to_string(),
        prev_hash,
        event_hash,
    });
    envelope.integrity.audit_root = audit_root(&envelope.audit_log);
}

fn read_envelope(store: &impl EnvelopeStore, id: &str) -> Result<Envelope, EnvelopeError> {
    match store.envelope_get(&key_for(id))? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Err(EnvelopeError::NotFound(id.to_string())),
    }
}

fn write_envelope(store: &impl EnvelopeStore, envelope: &Envelope) -> Result<(), EnvelopeError> {
    let bytes = serde_json::to_vec(envelope)?;
    store.envelope_put(key_for(&envelope.envelope_id), bytes)
}

/// Auto-release a time lock whose deadline has already passed, persisting
/// the transition. A no-op if the lock is inactive or the deadline has
/// not yet arrived.
fn apply_automatic_unlock(store: &impl EnvelopeStore, envelope: &mut Envelope) -> Result<(), EnvelopeError> {
    if envelope.time_lock_status.active && now_secs() >= envelope.time_lock_status.unlock_not_before {
        envelope.time_lock_status.active = false;
        envelope.integrity.time_seal = time_seal(&envelope.time_lock_status, now_secs());
        write_envelope(store, envelope)?;
    }
    Ok(())
}

/// Create a new envelope per `req`. Recorded as custody event #1 (action
/// `"create"`), authored by `req.created_by`.
pub fn create_envelope(store: &impl EnvelopeStore, req: CreateEnvelopeRequest) -> Result<Envelope, EnvelopeError> {
    if store.envelope_get(&key_for(&req.id))?.is_some() {
        return Err(EnvelopeError::AlreadyExists(req.id));
    }

    let payload_hash = sha256_hex(&req.payload);
    let timestamp = now_secs();
    let event_id = random_id();
    let genesis = sha256_hex(b"");
    let event_hash = chain_hash(
        &event_id,
        1,
        &[&req.created_by, "create", "envelope created"],
        timestamp,
        &genesis,
    );

    let custody_ledger = vec![CustodyEvent {
        event_id,
        sequence: 1,
        timestamp,
        actor: req.created_by.clone(),
        actor_fingerprint: None,
        action: "create".to_string(),
        location: None,
        notes: "envelope created".to_string(),
        evidence_state: None,
        prev_hash: genesis,
        event_hash,
    }];

    let time_lock_status = TimeLockState {
        active: req.policies.time_lock.unlock_not_before > timestamp,
        unlock_not_before: req.policies.time_lock.unlock_not_before,
        unlock_approved_by: None,
        unlock_reason: None,
        unlock_at: None,
    };

    let mut envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        envelope_id: req.id,
        label: req.label,
        envelope_type: req.envelope_type,
        created_at: timestamp,
        created_by: req.created_by,
        case_reference: req.case_reference,
        payload: PayloadMeta {
            kind: "generic".to_string(),
            object_path: None,
            inline_data: Some(B64.encode(&req.payload)),
            encoding_hint: None,
            metadata: BTreeMap::new(),
        },
        policies: req.policies,
        status: EnvelopeStatus::Draft,
        integrity: Integrity {
            payload_hash,
            ledger_root: ledger_root(&custody_ledger),
            audit_root: sha256_hex(b""),
            time_seal: time_seal(&time_lock_status, timestamp),
        },
        custody_ledger,
        audit_log: Vec::new(),
        tamper_signals: Vec::new(),
        time_lock_status,
    };
    push_audit_entry(&mut envelope, "create_envelope", "envelope created");

    write_envelope(store, &envelope)?;
    Ok(envelope)
}

/// Load envelope `id`. Auto-releases an expired time lock as a side
/// effect, per `spec.md` §4.6.
pub fn load_envelope(store: &impl EnvelopeStore, id: &str) -> Result<Envelope, EnvelopeError> {
    let mut envelope = read_envelope(store, id)?;
    apply_automatic_unlock(store, &mut envelope)?;
    Ok(envelope)
}

/// Append a custody event to envelope `id` per `req`, persisting the
/// result. Moves a `Draft` envelope to `Sealed`; `review.cleared` moves
/// `UnderReview` back to `Sealed`; `archive` moves any state to
/// `Archived`. An `Archived` envelope rejects every action except
/// `archive.verify`.
pub fn append_custody_event(
    store: &impl EnvelopeStore,
    id: &str,
    req: CustodyEventRequest,
) -> Result<Envelope, EnvelopeError> {
    let mut envelope = read_envelope(store, id)?;

    if envelope.status == EnvelopeStatus::Archived && req.action != "archive.verify" {
        return Err(EnvelopeError::Archived { id: id.to_string() });
    }

    let prev_hash = ledger_root(&envelope.custody_ledger);
    let sequence = envelope.custody_ledger.len() as u64 + 1;
    let timestamp = now_secs();
    let event_id = random_id();

    if envelope.custody_ledger.iter().any(|e| e.event_id == event_id) {
        return Err(EnvelopeError::DuplicateEventId(event_id));
    }

    let event_hash = chain_hash(&event_id, sequence, &[&req.actor, &req.action, &req.notes], timestamp, &prev_hash);

    envelope.custody_ledger.push(CustodyEvent {
        event_id,
        sequence,
        timestamp,
        actor: req.actor,
        actor_fingerprint: req.actor_fingerprint,
        action: req.action.clone(),
        location: req.location,
        notes: req.notes,
        evidence_state: req.evidence_state,
        prev_hash,
        event_hash,
    });
    envelope.integrity.ledger_root = ledger_root(&envelope.custody_ledger);

    match req.action.as_str() {
        "archive" => envelope.status = EnvelopeStatus::Archived,
        "review.cleared" if envelope.status == EnvelopeStatus::UnderReview => {
            envelope.status = EnvelopeStatus::Sealed;
        }
        _ if envelope.status == EnvelopeStatus::Draft => envelope.status = EnvelopeStatus::Sealed,
        _ => {}
    }

    push_audit_entry(&mut envelope, "append_custody_event", &req.action);
    write_envelope(store, &envelope)?;
    Ok(envelope)
}

/// Record a tamper signal against envelope `id` with detector confidence
/// `score`. Moves the envelope to `UnderReview`, and appends a derived
/// `tamper.flagged` custody event, iff `score >= policies.tamper.threshold`.
pub fn record_tamper_signal(
    store: &impl EnvelopeStore,
    id: &str,
    detected_by: &str,
    description: &str,
    score: f64,
) -> Result<Envelope, EnvelopeError> {
    let mut envelope = read_envelope(store, id)?;

    let threshold = envelope.policies.tamper.threshold;
    let timestamp = now_secs();
    let sequence = envelope.tamper_signals.len() as u64 + 1;
    envelope.tamper_signals.push(TamperSignal {
        signal_id: random_id(),
        sequence,
        timestamp,
        detected_by: detected_by.to_string(),
        description: description.to_string(),
        score,
        threshold,
    });

    push_audit_entry(&mut envelope, "record_tamper_signal", description);

    if score >= threshold {
        envelope.status = EnvelopeStatus::UnderReview;

        let prev_hash = ledger_root(&envelope.custody_ledger);
        let sequence = envelope.custody_ledger.len() as u64 + 1;
        let event_id = random_id();
        let notes = format!("tamper signal from {detected_by}: {description}");
        let event_hash = chain_hash(&event_id, sequence, &[detected_by, "tamper.flagged", &notes], timestamp, &prev_hash);
        envelope.custody_ledger.push(CustodyEvent {
            event_id,
            sequence,
            timestamp,
            actor: detected_by.to_string(),
            actor_fingerprint: None,
            action: "tamper.flagged".to_string(),
            location: None,
            notes,
            evidence_state: None,
            prev_hash,
            event_hash,
        });
        envelope.integrity.ledger_root = ledger_root(&envelope.custody_ledger);
    }

    write_envelope(store, &envelope)?;
    Ok(envelope)
}

/// Approve release of a time-locked envelope. Fails with
/// [`EnvelopeError::TimeLockActive`] if `unlock_not_before` has not yet
/// passed; otherwise clears the lock and records `approver`/`reason`.
/// A no-op (returns the envelope unchanged) if the lock is already
/// inactive.
pub fn approve_time_lock_unlock(
    store: &impl EnvelopeStore,
    id: &str,
    approver: &str,
    reason: &str,
) -> Result<Envelope, EnvelopeError> {
    let mut envelope = read_envelope(store, id)?;

    if envelope.time_lock_status.active {
        let now = now_secs();
        if now < envelope.time_lock_status.unlock_not_before {
            return Err(EnvelopeError::TimeLockActive {
                unlock_not_before: envelope.time_lock_status.unlock_not_before,
            });
        }
        envelope.time_lock_status.active = false;
        envelope.time_lock_status.unlock_approved_by = Some(approver.to_string());
        envelope.time_lock_status.unlock_reason = Some(reason.to_string());
        envelope.time_lock_status.unlock_at = Some(now);
        envelope.integrity.time_seal = time_seal(&envelope.time_lock_status, now);

        push_audit_entry(&mut envelope, "approve_time_lock_unlock", reason);

        let prev_hash = ledger_root(&envelope.custody_ledger);
        let sequence = envelope.custody_ledger.len() as u64 + 1;
        let event_id = random_id();
        let event_hash = chain_hash(&event_id, sequence, &[approver, "timelock.released", reason], now, &prev_hash);
        envelope.custody_ledger.push(CustodyEvent {
            event_id,
            sequence,
            timestamp: now,
            actor: approver.to_string(),
            actor_fingerprint: None,
            action: "timelock.released".to_string(),
            location: None,
            notes: reason.to_string(),
            evidence_state: None,
            prev_hash,
            event_hash,
        });
        envelope.integrity.ledger_root = ledger_root(&envelope.custody_ledger);

        write_envelope(store, &envelope)?;
    }

    Ok(envelope)
}

/// Export envelope `id` to a standalone JSON file at `out_path`, written
/// atomically (temp file alongside `out_path`, then renamed). The file is
/// self-contained and carries no reference to KV-internal state.
pub fn export_envelope(store: &impl EnvelopeStore, id: &str, out_path: &Path) -> Result<(), EnvelopeError> {
    let envelope = read_envelope(store, id)?;
    let bytes = serde_json::to_vec_pretty(&envelope)?;

    let tmp_path = out_path.with_file_name(format!(
        "{}.tmp.{}",
        out_path.file_name().and_then(|n| n.to_str()).unwrap_or("envelope"),
        random_id()
    ));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, out_path)?;
    Ok(())
}

/// Import an envelope JSON file at `in_path`, overwriting any existing
/// value for the same id. Validates only that the file has a non-empty
/// `envelope_id` and a parseable `created_at` — it does **not**
/// re-verify the hash chain; call [`verify_envelope`] separately.
pub fn import_envelope(store: &impl EnvelopeStore, in_path: &Path) -> Result<Envelope, EnvelopeError> {
    let contents = std::fs::read_to_string(in_path)?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| EnvelopeError::InvalidSchema(e.to_string()))?;

    let id = value
        .get("envelope_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EnvelopeError::InvalidSchema("missing or empty envelope_id".into()))?;
    if value.get("created_at").and_then(|v| v.as_u64()).is_none() {
        return Err(EnvelopeError::InvalidSchema("missing or non-numeric created_at".into()));
    }
    let _ = id;

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| EnvelopeError::InvalidSchema(e.to_string()))?;
    write_envelope(store, &envelope)?;
    Ok(envelope)
}

/// Recompute and check envelope `id`'s custody and audit hash chains
/// against its stored roots, plus its payload hash.
///
/// Returns `Ok(report)` with `report.ok == true` when everything matches,
/// or an error identifying exactly where the chain broke:
/// [`EnvelopeError::PayloadHashMismatch`] for the payload,
/// [`EnvelopeError::DuplicateEventId`] if any `event_id`/`entry_id` repeats
/// within the custody ledger or audit log (a replay attack — a repeated id
/// is flagged even if its own `prev_hash`/`event_hash` recompute cleanly),
/// or [`EnvelopeError::LedgerChainBroken`] with the offending `position` for
/// the custody ledger or audit log.
pub fn verify_envelope(store: &impl EnvelopeStore, id: &str) -> Result<VerifyReport, EnvelopeError> {
    let envelope = read_envelope(store, id)?;

    if let Some(inline) = &envelope.payload.inline_data {
        let decoded = B64
            .decode(inline)
            .map_err(|_| EnvelopeError::InvalidSchema("inline_data is not valid base64".into()))?;
        if sha256_hex(&decoded) != envelope.integrity.payload_hash {
            return Err(EnvelopeError::PayloadHashMismatch);
        }
    }

    verify_chain(
        envelope.custody_ledger.iter().map(|e| {
            (
                e.event_id.as_str(),
                e.sequence,
                vec![e.actor.as_str(), e.action.as_str(), e.notes.as_str()],
                e.timestamp,
                e.prev_hash.as_str(),
                e.event_hash.as_str(),
            )
        }),
    )?;
    let recomputed_ledger_root = ledger_root(&envelope.custody_ledger);
    if recomputed_ledger_root != envelope.integrity.ledger_root {
        return Err(EnvelopeError::LedgerChainBroken {
            position: envelope.custody_ledger.len(),
            reason: "stored ledger_root does not match the recomputed chain tip".into(),
        });
    }

    verify_chain(
        envelope.audit_log.iter().map(|e| {
            (
                e.entry_id.as_str(),
                e.sequence,
                vec![e.action.as_str(), e.detail.as_str()],
                e.timestamp,
                e.prev_hash.as_str(),
                e.event_hash.as_str(),
            )
        }),
    )?;
    let recomputed_audit_root = audit_root(&envelope.audit_log);
    if recomputed_audit_root != envelope.integrity.audit_root {
        return Err(EnvelopeError::LedgerChainBroken {
            position: envelope.audit_log.len(),
            reason: "stored audit_root does not match the recomputed chain tip".into(),
        });
    }

    Ok(VerifyReport {
        ok: true,
        recomputed_ledger_root,
        recomputed_audit_root,
    })
}

/// Shared chain-walk used by [`verify_envelope`] for both the custody
/// ledger and the audit log: checks strictly increasing `1..N` sequence
/// numbers, `prev_hash` linkage, that each `event_hash` reproduces, and
/// that every entry's id is unique within the chain (a replayed/duplicated
/// `event_id` is flagged even when it carries a fresh `prev_hash`/
/// `event_hash` of its own).
#[allow(clippy::type_complexity)]
fn verify_chain<'a>(
    entries: impl Iterator<Item = (&'a str, u64, Vec<&'a str>, u64, &'a str, &'a str)>,
) -> Result<(), EnvelopeError> {
    let mut prev_hash = sha256_hex(b"");
    let mut seen_ids = HashSet::new();
    for (position, (id, sequence, fields, timestamp, stored_prev_hash, stored_event_hash)) in
        entries.enumerate()
    {
        if !seen_ids.insert(id) {
            return Err(EnvelopeError::DuplicateEventId(id.to_string()));
        }
        if sequence != position as u64 + 1 {
            return Err(EnvelopeError::LedgerChainBroken {
                position,
                reason: format!("sequence {sequence} out of order, expected {}", position + 1),
            });
        }
        if stored_prev_hash != prev_hash {
            return Err(EnvelopeError::LedgerChainBroken {
                position,
                reason: "prev_hash does not match the preceding entry".into(),
            });
        }
        let expected = chain_hash(id, sequence, &fields, timestamp, stored_prev_hash);
        if expected != stored_event_hash {
            return Err(EnvelopeError::LedgerChainBroken {
                position,
                reason: "event_hash does not reproduce from its recorded fields".into(),
            });
        }
        prev_hash = stored_event_hash.to_string();
    }
    Ok(())
}
