// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// warden-security — the security core of the Warden platform.
//
// Four components, composed by `SecurityServices`:
//   - `keys`:      symmetric key lifecycle and raw AEAD primitives
//   - `fields`:    field-level encryption of structured records
//   - `audit`:     hash-chained, Merkle-provable audit log
//   - `zerotrust`: contextual trust scoring and policy evaluation

pub mod audit;
pub mod fields;
pub mod integrity;
pub mod keys;
pub mod merkle;
pub mod policy;
pub mod services;
pub mod signer;
pub mod wrap;
pub mod zerotrust;

// PUBLIC API: Re-export the primary security types
pub use audit::{AuditEvent, AuditLog, AuditProof, NewAuditEvent, SignedAuditExport};
pub use fields::{DecryptionOutcome, FieldEncryption};
pub use keys::{EncryptedPayload, KeyManager};
pub use policy::{Condition, Policy, PolicyEffect};
pub use services::SecurityServices;
pub use signer::ExportSigner;
pub use zerotrust::{
    AccessDecision, RiskAssessment, ThreatFeed, TrustContext, TrustScore, ZeroTrustEngine,
};
