// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service composition root — wires the key manager, field encryption, audit
// log, and zero-trust engine together from one configuration.
//
// All state lives in this explicit struct, shared via `Arc` handles — never
// ambient or static — so lifecycle and testing stay explicit.  The struct
// is cheaply cloneable and can be passed into closures and request handlers
// without lifetime issues.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use warden_core::config::SecurityConfig;
use warden_core::error::Result;

use crate::audit::AuditLog;
use crate::fields::FieldEncryption;
use crate::keys::KeyManager;
use crate::zerotrust::{ThreatFeed, ZeroTrustEngine};

/// Shared handles to the four security components.
#[derive(Clone)]
pub struct SecurityServices {
    keys: Arc<KeyManager>,
    fields: Arc<FieldEncryption>,
    audit: Arc<AuditLog>,
    zero_trust: Arc<ZeroTrustEngine>,
}

impl SecurityServices {
    /// Initialise all components. Call once at service startup.
    ///
    /// Opens (or creates) the audit database at `audit_db_path` and
    /// generates the initial active data key.
    pub fn init(
        config: &SecurityConfig,
        audit_db_path: impl AsRef<Path>,
        threat_feed: Option<Box<dyn ThreatFeed>>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditLog::open(audit_db_path)?);
        Self::with_audit(config, audit, threat_feed)
    }

    /// Initialise with an in-memory audit store (useful for tests).
    pub fn init_in_memory(
        config: &SecurityConfig,
        threat_feed: Option<Box<dyn ThreatFeed>>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditLog::open_in_memory()?);
        Self::with_audit(config, audit, threat_feed)
    }

    fn with_audit(
        config: &SecurityConfig,
        audit: Arc<AuditLog>,
        threat_feed: Option<Box<dyn ThreatFeed>>,
    ) -> Result<Self> {
        let keys = Arc::new(KeyManager::new(config)?);
        let fields = Arc::new(FieldEncryption::new(Arc::clone(&keys), config));
        let zero_trust = Arc::new(ZeroTrustEngine::new(config, Arc::clone(&audit), threat_feed));

        info!("security services initialised");
        Ok(Self {
            keys,
            fields,
            audit,
            zero_trust,
        })
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn field_encryption(&self) -> &Arc<FieldEncryption> {
        &self.fields
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn zero_trust(&self) -> &Arc<ZeroTrustEngine> {
        &self.zero_trust
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use warden_core::types::Outcome;

    use crate::policy::{Policy, PolicyEffect};
    use crate::zerotrust::TrustContext;

    fn services() -> SecurityServices {
        SecurityServices::init_in_memory(&SecurityConfig::default(), None)
            .expect("services init")
    }

    #[test]
    fn components_share_one_key_store() {
        let services = services();
        let record = json!({"password": "p"});

        let encrypted = services
            .field_encryption()
            .encrypt_sensitive_data(&record)
            .expect("encrypt");

        // The envelope names the key manager's active key.
        let active = services.key_manager().active_key_id().to_string();
        assert_eq!(encrypted["password"]["keyId"], json!(active));
    }

    #[test]
    fn access_decisions_land_in_the_shared_audit_log() {
        let services = services();
        services.zero_trust().add_policy(Policy {
            id: "allow-reads".into(),
            resource: "workflows/*".into(),
            action: "read".into(),
            conditions: Vec::new(),
            effect: PolicyEffect::Allow,
            priority: 10,
        });

        let context = TrustContext {
            user_id: Some("alice".into()),
            session_id: "s1".into(),
            device_fingerprint: Some("fp".into()),
            ip_address: "10.0.0.1".parse().expect("ip literal"),
            user_agent: None,
            timestamp: Utc::now(),
        };
        let decision = services
            .zero_trust()
            .evaluate_access("workflows/alpha", "read", &context);
        assert!(decision.allowed);

        let events = services.audit_log().all_events().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, Outcome::Success);
        assert!(services
            .audit_log()
            .verify_chain_integrity()
            .expect("verify")
            .is_valid);
    }

    #[test]
    fn file_backed_init() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = SecurityServices::init(
            &SecurityConfig::default(),
            dir.path().join("audit.db"),
            None,
        )
        .expect("services init");

        services
            .audit_log()
            .log_data_access("alice", "workflows/alpha", "read", Outcome::Success)
            .expect("log");
        assert_eq!(services.audit_log().count().expect("count"), 1);
    }
}
