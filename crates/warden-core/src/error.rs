// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Warden.

use thiserror::Error;

/// Top-level error type for all Warden operations.
#[derive(Debug, Error)]
pub enum WardenError {
    // -- Key lifecycle errors --
    #[error("key not found: {key_id}")]
    KeyNotFound { key_id: String },

    /// Authenticated decryption or signature verification failed.
    ///
    /// Deliberately carries no detail: the failure reason must not leak
    /// anything about the plaintext or the key material.
    #[error("authentication failure")]
    AuthenticationFailure,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key export failed: {0}")]
    KeyExport(String),

    #[error("key import failed: {0}")]
    KeyImport(String),

    #[error("key {key_id} is active and cannot be deleted")]
    KeyInUse { key_id: String },

    // -- Encryption errors --
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// A single field could not be decrypted because its key is gone.
    /// Recoverable: the caller decides whether to abort the record or
    /// mask the field.
    #[error("decryption key missing for field '{field}': key {key_id}")]
    DecryptionKeyMissing { field: String, key_id: String },

    #[error("malformed encrypted field '{field}': {detail}")]
    MalformedEncryptedField { field: String, detail: String },

    // -- Audit errors --
    #[error("audit chain integrity violation at index {broken_at}")]
    ChainIntegrityViolation { broken_at: u64 },

    #[error("audit event not found: {event_id}")]
    EventNotFound { event_id: String },

    #[error("export signing failed: {0}")]
    ExportSigning(String),

    // -- Zero-trust errors --
    #[error("policy evaluation failed: {0}")]
    PolicyEvaluationError(String),

    #[error("threat intelligence feed unavailable: {0}")]
    ThreatFeedUnavailable(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WardenError>;
