// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — append-only SQLite log of every security-relevant event,
// hash-chained for tamper evidence and Merkle-provable for point lookups.
//
// Schema:
//   audit_log(
//     seq       INTEGER PRIMARY KEY AUTOINCREMENT,
//     event_id  TEXT    NOT NULL UNIQUE,
//     timestamp TEXT    NOT NULL,   -- RFC 3339
//     user_id   TEXT,
//     action    TEXT    NOT NULL,   -- e.g. "authentication", "data_access"
//     resource  TEXT    NOT NULL,
//     details   TEXT,               -- optional JSON context
//     outcome   TEXT    NOT NULL,   -- success | failure | denied
//     severity  TEXT    NOT NULL,   -- info | warning | critical
//     prev_hash TEXT    NOT NULL,   -- SHA-256 hex of the previous event
//     hash      TEXT    NOT NULL    -- SHA-256 hex over canonical ‖ prev
//   )
//
// Appends are serialized through a single mutex-held connection, so two
// concurrent `log_event` calls can never read the same prev_hash and
// diverge. Reads under the same lock observe a consistent snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};
use warden_core::error::{Result, WardenError};
use warden_core::types::{EventId, Outcome, Severity};

use crate::integrity::{GENESIS_HASH, chain_hash};
use crate::merkle::{self, ProofStep};
use crate::signer::ExportSigner;

// ---------------------------------------------------------------------------
// Local error helpers
// ---------------------------------------------------------------------------

/// Convert a `rusqlite::Error` into a `WardenError::Database`.
fn db_err(e: rusqlite::Error) -> WardenError {
    WardenError::Database(e.to_string())
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Caller-supplied description of an event; id, timestamp, and chain hashes
/// are assigned by the logger.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub user_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub details: Option<serde_json::Value>,
    pub outcome: Outcome,
    pub severity: Severity,
}

/// A single entry in the audit log. Never mutated once appended; the total
/// order is the append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub details: Option<serde_json::Value>,
    pub outcome: Outcome,
    pub severity: Severity,
    /// Hash of the previous event ([`GENESIS_HASH`] for the first).
    pub prev_hash: String,
    /// `SHA-256(canonical(fields) ‖ prev_hash)`, lowercase hex.
    pub hash: String,
}

/// Result of a full chain verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    /// Index (append order, 0-based) of the first event whose hash no
    /// longer matches.
    pub broken_at: Option<u64>,
    /// The events examined, in append order.
    pub events: Vec<AuditEvent>,
}

/// Merkle membership proof for a single event.
///
/// Derived on demand from the current event set — never persisted, since
/// the tree changes with every append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditProof {
    pub event_id: EventId,
    pub leaf_index: u64,
    /// Hex-encoded leaf hash (domain-separated hash of the event's chain
    /// hash).
    pub leaf_hash: String,
    /// Sibling hashes from the leaf up to the root.
    pub path: Vec<ProofStep>,
    /// Hex-encoded root of the tree the proof was built against.
    pub merkle_root: String,
}

/// A signed export of the full log, verifiable without write access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAuditExport {
    pub events: Vec<AuditEvent>,
    /// Hex-encoded Merkle root over the event hashes.
    pub merkle_root: String,
    /// Hex-encoded ECDSA P-256 signature over the root.
    pub signature: String,
    /// Hex-encoded SEC1 public key of the export signer.
    pub public_key: String,
}

/// Aggregate counters over the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub by_action: HashMap<String, u64>,
    pub by_user: HashMap<String, u64>,
    pub by_outcome: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub distinct_users: u64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Result of a fresh chain verification.
    pub chain_integrity: bool,
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Append-only, hash-chained audit log backed by a SQLite database.
///
/// Every security-relevant event (authentication, authorization, data
/// access, key lifecycle, ...) is recorded with a hash folding in its
/// predecessor's hash, so mutating or reordering any historical event
/// invalidates every hash after it.
pub struct AuditLog {
    conn: Mutex<Connection>,
    signer: ExportSigner,
}

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id  TEXT    NOT NULL UNIQUE,
    timestamp TEXT    NOT NULL,
    user_id   TEXT,
    action    TEXT    NOT NULL,
    resource  TEXT    NOT NULL,
    details   TEXT,
    outcome   TEXT    NOT NULL,
    severity  TEXT    NOT NULL,
    prev_hash TEXT    NOT NULL,
    hash      TEXT    NOT NULL
);";

impl AuditLog {
    /// Open (or create) the audit database at `path` with a freshly
    /// generated export-signing key.
    ///
    /// WAL mode is enabled for better concurrent-read performance.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_signer(path, ExportSigner::generate()?)
    }

    /// Open (or create) the audit database at `path`, signing exports with
    /// the supplied key (e.g. one referenced by deployment configuration).
    pub fn open_with_signer(path: impl AsRef<Path>, signer: ExportSigner) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL for concurrent readers.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
            signer,
        })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
            signer: ExportSigner::generate()?,
        })
    }

    // -- Appending -----------------------------------------------------------

    /// Append a new event to the chain.
    ///
    /// Assigns the id and timestamp, computes
    /// `hash = SHA-256(canonical(fields) ‖ prev_hash)`, and inserts
    /// atomically. If the tail of the stored chain has been tampered with,
    /// new events still chain from the last *stored* hash — the break stays
    /// observable to `verify_chain_integrity` and is never papered over.
    #[instrument(skip_all, fields(action = %new_event.action, resource = %new_event.resource))]
    pub fn log_event(&self, new_event: NewAuditEvent) -> Result<AuditEvent> {
        let conn = self.conn.lock().expect("audit log lock poisoned");

        let prev_hash: String = conn
            .query_row(
                "SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut event = AuditEvent {
            id: EventId::new(),
            timestamp: Utc::now(),
            user_id: new_event.user_id,
            action: new_event.action,
            resource: new_event.resource,
            details: new_event.details,
            outcome: new_event.outcome,
            severity: new_event.severity,
            prev_hash,
            hash: String::new(),
        };
        event.hash = chain_hash(&canonical_event(&event), &event.prev_hash);

        conn.execute(
            "INSERT INTO audit_log
                 (event_id, timestamp, user_id, action, resource, details,
                  outcome, severity, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id.to_string(),
                event.timestamp.to_rfc3339(),
                event.user_id,
                event.action,
                event.resource,
                event.details.as_ref().map(|d| d.to_string()),
                event.outcome.as_str(),
                event.severity.as_str(),
                event.prev_hash,
                event.hash,
            ],
        )
        .map_err(db_err)?;

        debug!(event_id = %event.id, "audit event appended");
        Ok(event)
    }

    /// Record an authentication attempt.
    pub fn log_authentication(
        &self,
        user_id: &str,
        outcome: Outcome,
        details: Option<serde_json::Value>,
    ) -> Result<AuditEvent> {
        let severity = match outcome {
            Outcome::Success => Severity::Info,
            _ => Severity::Warning,
        };
        self.log_event(NewAuditEvent {
            user_id: Some(user_id.to_owned()),
            action: "authentication".into(),
            resource: "session".into(),
            details,
            outcome,
            severity,
        })
    }

    /// Record an authorization decision.
    pub fn log_authorization(
        &self,
        user_id: Option<&str>,
        resource: &str,
        allowed: bool,
        details: Option<serde_json::Value>,
    ) -> Result<AuditEvent> {
        self.log_event(NewAuditEvent {
            user_id: user_id.map(str::to_owned),
            action: "authorization".into(),
            resource: resource.to_owned(),
            details,
            outcome: if allowed { Outcome::Success } else { Outcome::Denied },
            severity: if allowed { Severity::Info } else { Severity::Warning },
        })
    }

    /// Record a read or write of a protected resource.
    pub fn log_data_access(
        &self,
        user_id: &str,
        resource: &str,
        operation: &str,
        outcome: Outcome,
    ) -> Result<AuditEvent> {
        self.log_event(NewAuditEvent {
            user_id: Some(user_id.to_owned()),
            action: format!("data_access.{operation}"),
            resource: resource.to_owned(),
            details: None,
            outcome,
            severity: Severity::Info,
        })
    }

    // -- Verification --------------------------------------------------------

    /// Recompute the chain from genesis and compare against the stored
    /// hashes. Returns the first mismatching index on failure.
    #[instrument(skip_all)]
    pub fn verify_chain_integrity(&self) -> Result<ChainVerification> {
        let events = self.all_events()?;
        let mut prev = GENESIS_HASH.to_string();

        let mut broken_at = None;
        for (index, event) in events.iter().enumerate() {
            let expected = chain_hash(&canonical_event(event), &prev);
            if event.prev_hash != prev || event.hash != expected {
                warn!(broken_at = index, "audit chain integrity violation");
                broken_at = Some(index as u64);
                break;
            }
            prev = event.hash.clone();
        }

        Ok(ChainVerification {
            is_valid: broken_at.is_none(),
            broken_at,
            events,
        })
    }

    /// Verify the chain and surface a break as a critical error.
    ///
    /// The violation is reported, never auto-repaired: the log keeps
    /// accepting appends and the break position stays fixed for audit.
    pub fn require_intact_chain(&self) -> Result<()> {
        let verification = self.verify_chain_integrity()?;
        match verification.broken_at {
            None => Ok(()),
            Some(broken_at) => Err(WardenError::ChainIntegrityViolation { broken_at }),
        }
    }

    /// Build a Merkle membership proof for one event.
    ///
    /// The tree is rebuilt over the current event set, so the proof is
    /// valid for the log as it exists now — complementary to the linear
    /// chain, which proves that no surrounding event was altered.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub fn create_audit_proof(&self, event_id: EventId) -> Result<AuditProof> {
        let hashes = self.all_hashes()?;
        let target = event_id.to_string();

        let leaf_index = {
            let conn = self.conn.lock().expect("audit log lock poisoned");
            let seq: Option<i64> = conn
                .query_row(
                    "SELECT seq FROM audit_log WHERE event_id = ?1",
                    params![target],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(seq) = seq else {
                return Err(WardenError::EventNotFound {
                    event_id: event_id.to_string(),
                });
            };
            conn.query_row(
                "SELECT COUNT(*) FROM audit_log WHERE seq < ?1",
                params![seq],
                |row| row.get::<_, i64>(0),
            )
            .map_err(db_err)?
        };
        let leaf_index = leaf_index as usize;
        if leaf_index >= hashes.len() {
            return Err(WardenError::EventNotFound {
                event_id: event_id.to_string(),
            });
        }

        let path = merkle::compute_path(&hashes, leaf_index).ok_or_else(|| {
            WardenError::EventNotFound {
                event_id: event_id.to_string(),
            }
        })?;

        Ok(AuditProof {
            event_id,
            leaf_index: leaf_index as u64,
            leaf_hash: hex::encode(merkle::leaf_hash(&hashes[leaf_index])),
            path,
            merkle_root: hex::encode(merkle::compute_root(&hashes)),
        })
    }

    /// Recompute the root from the proof's leaf and sibling path; true only
    /// on exact match with the proof's root.
    pub fn verify_audit_proof(proof: &AuditProof) -> bool {
        let Ok(leaf_bytes) = hex::decode(&proof.leaf_hash) else {
            return false;
        };
        let Ok(leaf) = <[u8; 32]>::try_from(leaf_bytes) else {
            return false;
        };
        match merkle::fold_path(&leaf, &proof.path) {
            Some(root) => hex::encode(root) == proof.merkle_root,
            None => false,
        }
    }

    // -- Export --------------------------------------------------------------

    /// Export the full log with a signed Merkle root, so a party without
    /// write access can verify it.
    #[instrument(skip_all)]
    pub fn export_audit_log(&self) -> Result<SignedAuditExport> {
        let events = self.all_events()?;
        let hashes: Vec<String> = events.iter().map(|e| e.hash.clone()).collect();
        let merkle_root = hex::encode(merkle::compute_root(&hashes));
        let signature = hex::encode(self.signer.sign(merkle_root.as_bytes())?);

        debug!(events = events.len(), "audit log exported");
        Ok(SignedAuditExport {
            events,
            merkle_root,
            signature,
            public_key: hex::encode(self.signer.public_key()),
        })
    }

    /// Verify a [`SignedAuditExport`]: the root must match the events and
    /// the signature must verify under the embedded public key.
    pub fn verify_export(export: &SignedAuditExport) -> Result<()> {
        let hashes: Vec<String> = export.events.iter().map(|e| e.hash.clone()).collect();
        let recomputed = hex::encode(merkle::compute_root(&hashes));
        if recomputed != export.merkle_root {
            return Err(WardenError::AuthenticationFailure);
        }

        let public_key = hex::decode(&export.public_key)
            .map_err(|_| WardenError::AuthenticationFailure)?;
        let signature = hex::decode(&export.signature)
            .map_err(|_| WardenError::AuthenticationFailure)?;
        ExportSigner::verify(&public_key, export.merkle_root.as_bytes(), &signature)
    }

    // -- Queries -------------------------------------------------------------

    /// All events in append order.
    pub fn all_events(&self) -> Result<Vec<AuditEvent>> {
        let conn = self.conn.lock().expect("audit log lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT event_id, timestamp, user_id, action, resource, details,
                        outcome, severity, prev_hash, hash
                 FROM audit_log
                 ORDER BY seq ASC",
            )
            .map_err(db_err)?;

        let rows = stmt.query_map([], row_to_raw).map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(raw_to_event(row.map_err(db_err)?)?);
        }
        Ok(events)
    }

    /// The most recent `limit` events, newest first.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let conn = self.conn.lock().expect("audit log lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT event_id, timestamp, user_id, action, resource, details,
                        outcome, severity, prev_hash, hash
                 FROM audit_log
                 ORDER BY seq DESC
                 LIMIT ?1",
            )
            .map_err(db_err)?;

        let rows = stmt.query_map(params![limit], row_to_raw).map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(raw_to_event(row.map_err(db_err)?)?);
        }
        Ok(events)
    }

    /// Return the total number of events in the log.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("audit log lock poisoned");
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Aggregate counts plus a fresh chain verification.
    pub fn get_audit_statistics(&self) -> Result<AuditStatistics> {
        let events = self.all_events()?;
        let chain_integrity = self.verify_chain_integrity()?.is_valid;

        let mut stats = AuditStatistics {
            total_events: events.len() as u64,
            by_action: HashMap::new(),
            by_user: HashMap::new(),
            by_outcome: HashMap::new(),
            by_severity: HashMap::new(),
            distinct_users: 0,
            first_event_at: events.first().map(|e| e.timestamp),
            last_event_at: events.last().map(|e| e.timestamp),
            chain_integrity,
        };

        for event in &events {
            *stats.by_action.entry(event.action.clone()).or_insert(0) += 1;
            *stats
                .by_outcome
                .entry(event.outcome.as_str().to_owned())
                .or_insert(0) += 1;
            *stats
                .by_severity
                .entry(event.severity.as_str().to_owned())
                .or_insert(0) += 1;
            if let Some(user) = &event.user_id {
                *stats.by_user.entry(user.clone()).or_insert(0) += 1;
            }
        }
        stats.distinct_users = stats.by_user.len() as u64;

        Ok(stats)
    }

    fn all_hashes(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("audit log lock poisoned");
        let mut stmt = conn
            .prepare("SELECT hash FROM audit_log ORDER BY seq ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut hashes = Vec::new();
        for row in rows {
            hashes.push(row.map_err(db_err)?);
        }
        Ok(hashes)
    }
}

// ---------------------------------------------------------------------------
// Canonical serialization & row mapping
// ---------------------------------------------------------------------------

/// Canonical serialization of an event's pre-hash fields.
///
/// serde_json's default object representation is a sorted-key map, so the
/// output is deterministic: the same fields always serialize to the same
/// string regardless of construction order.
fn canonical_event(event: &AuditEvent) -> String {
    json!({
        "id": event.id.to_string(),
        "timestamp": event.timestamp.to_rfc3339(),
        "userId": event.user_id,
        "action": event.action,
        "resource": event.resource,
        "details": event.details,
        "outcome": event.outcome.as_str(),
        "severity": event.severity.as_str(),
    })
    .to_string()
}

/// Raw row as stored: everything stringly, parsed in `raw_to_event`.
type RawRow = (
    String,         // event_id
    String,         // timestamp
    Option<String>, // user_id
    String,         // action
    String,         // resource
    Option<String>, // details
    String,         // outcome
    String,         // severity
    String,         // prev_hash
    String,         // hash
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn raw_to_event(raw: RawRow) -> Result<AuditEvent> {
    let (event_id, timestamp, user_id, action, resource, details, outcome, severity, prev_hash, hash) =
        raw;

    let id = event_id
        .parse::<uuid::Uuid>()
        .map(EventId)
        .map_err(|e| WardenError::Database(format!("bad event id: {e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| WardenError::Database(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);
    let details = details
        .map(|d| serde_json::from_str(&d))
        .transpose()
        .map_err(|e| WardenError::Database(format!("bad details JSON: {e}")))?;
    let outcome = outcome
        .parse::<Outcome>()
        .map_err(WardenError::Database)?;
    let severity = severity
        .parse::<Severity>()
        .map_err(WardenError::Database)?;

    Ok(AuditEvent {
        id,
        timestamp,
        user_id,
        action,
        resource,
        details,
        outcome,
        severity,
        prev_hash,
        hash,
    })
}
