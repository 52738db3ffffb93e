// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::KeyAlgorithm;

/// Relative weights of the five trust factors.
///
/// Weights should sum to 1.0; `TrustWeights::normalized` rescales them if a
/// caller supplies values that do not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustWeights {
    pub identity: f64,
    pub device: f64,
    pub location: f64,
    pub behavior: f64,
    pub network: f64,
}

impl TrustWeights {
    /// Return a copy rescaled so the weights sum to 1.0. Falls back to the
    /// defaults when the sum is zero or not finite.
    pub fn normalized(&self) -> Self {
        let sum = self.identity + self.device + self.location + self.behavior + self.network;
        if !sum.is_finite() || sum <= 0.0 {
            return Self::default();
        }
        Self {
            identity: self.identity / sum,
            device: self.device / sum,
            location: self.location / sum,
            behavior: self.behavior / sum,
            network: self.network / sum,
        }
    }
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            identity: 0.30,
            device: 0.20,
            location: 0.15,
            behavior: 0.20,
            network: 0.15,
        }
    }
}

/// Persistent security settings.
///
/// The policy default effect is deny and is intentionally not configurable:
/// an access request matching no policy always fails closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Symmetric algorithm for data-encryption keys.
    pub key_algorithm: KeyAlgorithm,
    /// How often the active key should be rotated (seconds). Consumed by
    /// external rotation schedulers; the key manager reports overdue keys
    /// through its metrics.
    pub key_rotation_interval_secs: u64,
    /// How long a demoted key may continue to encrypt (seconds).
    pub rotation_grace_secs: u64,
    /// How many encrypt calls a rotating key may serve before the grace
    /// window closes, regardless of wall clock.
    pub rotation_grace_encrypt_budget: u32,
    /// How long deprecated keys are retained before they may be securely
    /// deleted (seconds). Ciphertext encrypted under a key must remain
    /// decryptable for this window.
    pub deprecated_retention_secs: u64,
    /// Field-name fragments treated as sensitive by the field-level
    /// encryption layer (matched case-insensitively against field names).
    pub sensitive_field_patterns: Vec<String>,
    /// Maximum recursion depth when traversing records for sensitive
    /// fields.
    pub max_traversal_depth: usize,
    /// Relative weights of the trust factors.
    pub trust_weights: TrustWeights,
    /// Trust threshold applied when no per-resource threshold matches.
    pub default_trust_threshold: f64,
    /// Per-resource-pattern trust thresholds, e.g. `"admin/*" -> 0.8`.
    pub resource_trust_thresholds: HashMap<String, f64>,
    /// How long a session stays in the continuous-monitoring window after
    /// its last evaluation (seconds).
    pub session_monitoring_window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_algorithm: KeyAlgorithm::Aes256Gcm,
            key_rotation_interval_secs: 30 * 24 * 60 * 60, // 30 days
            rotation_grace_secs: 5 * 60,
            rotation_grace_encrypt_budget: 1_000,
            deprecated_retention_secs: 365 * 24 * 60 * 60, // 1 year
            sensitive_field_patterns: vec![
                "password".into(),
                "secret".into(),
                "token".into(),
                "key".into(),
                "credential".into(),
                "ssn".into(),
                "apikey".into(),
                "private".into(),
            ],
            max_traversal_depth: 64,
            trust_weights: TrustWeights::default(),
            default_trust_threshold: 0.5,
            resource_trust_thresholds: HashMap::new(),
            session_monitoring_window_secs: 30 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = TrustWeights::default();
        let sum = w.identity + w.device + w.location + w.behavior + w.network;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalization_rescales() {
        let w = TrustWeights {
            identity: 2.0,
            device: 2.0,
            location: 2.0,
            behavior: 2.0,
            network: 2.0,
        };
        let n = w.normalized();
        assert!((n.identity - 0.2).abs() < 1e-9);
        let sum = n.identity + n.device + n.location + n.behavior + n.network;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_weights_fall_back_to_defaults() {
        let w = TrustWeights {
            identity: 0.0,
            device: 0.0,
            location: 0.0,
            behavior: 0.0,
            network: 0.0,
        };
        assert_eq!(w.normalized(), TrustWeights::default());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = SecurityConfig::default();
        let json = serde_json::to_string(&config).expect("serialize config");
        let back: SecurityConfig = serde_json::from_str(&json).expect("deserialize config");
        assert_eq!(back.sensitive_field_patterns, config.sensitive_field_patterns);
        assert_eq!(back.default_trust_threshold, config.default_trust_threshold);
    }
}
