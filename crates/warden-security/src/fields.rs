// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Field-level encryption — selectively encrypts sensitive fields inside
// arbitrary JSON records at the persistence boundary.
//
// A field is sensitive when its name matches one of the configured
// patterns (case-insensitive substring match — explicit configuration, not
// reflection). The value under a sensitive name, scalar or structured, is
// replaced by the envelope object
//
//   { "value": base64(JSON(EncryptedPayload)), "keyId": "<uuid>" }
//
// which is self-describing, so decryption finds the right key after any
// number of rotations. The envelope shape is reserved: a two-field object
// with string "value" and "keyId" members is treated as already encrypted
// and never encrypted twice.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};
use warden_core::config::SecurityConfig;
use warden_core::error::{Result, WardenError};
use warden_core::types::KeyId;

use crate::keys::{EncryptedPayload, KeyManager};

/// A field that could not be decrypted.  Recoverable: the caller decides
/// whether to abort the whole record or mask the field.
#[derive(Debug)]
pub struct FieldFailure {
    /// Dotted path of the field inside the record, e.g. `"user.password"`.
    pub path: String,
    pub error: WardenError,
}

/// Result of decrypting a record: the (partially) restored record plus any
/// per-field failures.  `failures` is empty on a clean round trip.
#[derive(Debug)]
pub struct DecryptionOutcome {
    pub record: Value,
    pub failures: Vec<FieldFailure>,
}

/// Encrypts and decrypts sensitive fields of structured records via a
/// shared [`KeyManager`].
pub struct FieldEncryption {
    keys: Arc<KeyManager>,
    /// Lowercased name fragments marking a field as sensitive.
    patterns: Vec<String>,
    max_depth: usize,
}

impl FieldEncryption {
    pub fn new(keys: Arc<KeyManager>, config: &SecurityConfig) -> Self {
        Self {
            keys,
            patterns: config
                .sensitive_field_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            max_depth: config.max_traversal_depth,
        }
    }

    /// Whether a field name marks its value as sensitive.
    pub fn is_sensitive(&self, field_name: &str) -> bool {
        let name = field_name.to_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }

    /// Deep-traverse `record` and replace every sensitive field's value
    /// with an encrypted envelope.  All other fields, including structure,
    /// pass through unchanged.
    #[instrument(skip_all)]
    pub fn encrypt_sensitive_data(&self, record: &Value) -> Result<Value> {
        let encrypted = self.encrypt_value(record, 0)?;
        debug!("record encrypted");
        Ok(encrypted)
    }

    fn encrypt_value(&self, value: &Value, depth: usize) -> Result<Value> {
        if depth > self.max_depth {
            return Err(WardenError::Encryption(format!(
                "record nesting exceeds {} levels",
                self.max_depth
            )));
        }

        match value {
            Value::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (name, field_value) in fields {
                    let encrypted = if self.is_sensitive(name) && !is_envelope(field_value) {
                        self.encrypt_leaf(field_value)?
                    } else {
                        self.encrypt_value(field_value, depth + 1)?
                    };
                    out.insert(name.clone(), encrypted);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.encrypt_value(item, depth + 1)?);
                }
                Ok(Value::Array(out))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    fn encrypt_leaf(&self, value: &Value) -> Result<Value> {
        let plaintext = serde_json::to_vec(value)?;
        let payload = self.keys.encrypt(&plaintext)?;
        let wire = serde_json::to_vec(&payload)?;
        Ok(json!({
            "value": BASE64.encode(wire),
            "keyId": payload.key_id.to_string(),
        }))
    }

    /// Inverse traversal: every envelope is decrypted and the original
    /// value restored.
    ///
    /// Decryption failures are per-field: the envelope stays in place, a
    /// [`FieldFailure`] is collected, and the rest of the record is still
    /// processed.  `decrypt(encrypt(x)) == x` whenever `failures` is empty.
    #[instrument(skip_all)]
    pub fn decrypt_sensitive_data(&self, record: &Value) -> Result<DecryptionOutcome> {
        let mut failures = Vec::new();
        let restored = self.decrypt_value(record, String::new(), 0, &mut failures)?;
        debug!(failures = failures.len(), "record decrypted");
        Ok(DecryptionOutcome {
            record: restored,
            failures,
        })
    }

    fn decrypt_value(
        &self,
        value: &Value,
        path: String,
        depth: usize,
        failures: &mut Vec<FieldFailure>,
    ) -> Result<Value> {
        if depth > self.max_depth {
            return Err(WardenError::Encryption(format!(
                "record nesting exceeds {} levels",
                self.max_depth
            )));
        }

        if is_envelope(value) {
            return Ok(match self.decrypt_leaf(value, &path) {
                Ok(restored) => restored,
                Err(error) => {
                    failures.push(FieldFailure { path, error });
                    value.clone()
                }
            });
        }

        match value {
            Value::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (name, field_value) in fields {
                    let child_path = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{path}.{name}")
                    };
                    out.insert(
                        name.clone(),
                        self.decrypt_value(field_value, child_path, depth + 1, failures)?,
                    );
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    out.push(self.decrypt_value(
                        item,
                        format!("{path}[{index}]"),
                        depth + 1,
                        failures,
                    )?);
                }
                Ok(Value::Array(out))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    fn decrypt_leaf(&self, envelope: &Value, path: &str) -> Result<Value> {
        let encoded = envelope
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(path, "missing value member"))?;
        let wire = BASE64
            .decode(encoded)
            .map_err(|e| malformed(path, &format!("bad base64: {e}")))?;
        let payload: EncryptedPayload = serde_json::from_slice(&wire)
            .map_err(|e| malformed(path, &format!("bad payload: {e}")))?;

        let plaintext = self.keys.decrypt(&payload).map_err(|e| match e {
            WardenError::KeyNotFound { key_id } => WardenError::DecryptionKeyMissing {
                field: path.to_owned(),
                key_id,
            },
            other => other,
        })?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| malformed(path, &format!("bad plaintext: {e}")))
    }
}

/// Whether a value has the reserved envelope shape: an object with exactly
/// a string `value` and a string `keyId`, the latter a key id.
fn is_envelope(value: &Value) -> bool {
    let Value::Object(fields) = value else {
        return false;
    };
    if fields.len() != 2 {
        return false;
    }
    let Some(Value::String(key_id)) = fields.get("keyId") else {
        return false;
    };
    fields.get("value").is_some_and(Value::is_string) && key_id.parse::<KeyId>().is_ok()
}

fn malformed(path: &str, detail: &str) -> WardenError {
    WardenError::MalformedEncryptedField {
        field: path.to_owned(),
        detail: detail.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> (Arc<KeyManager>, FieldEncryption) {
        let config = SecurityConfig::default();
        let keys = Arc::new(KeyManager::new(&config).expect("key manager init"));
        let fields = FieldEncryption::new(Arc::clone(&keys), &config);
        (keys, fields)
    }

    #[test]
    fn password_field_is_enveloped_and_round_trips() {
        let (_, fields) = fixture();
        let record = json!({"user": "a", "password": "p"});

        let encrypted = fields.encrypt_sensitive_data(&record).expect("encrypt");
        assert_eq!(encrypted["user"], json!("a"));
        assert!(encrypted["password"].is_object());
        assert!(encrypted["password"]["value"].is_string());
        assert!(encrypted["password"]["keyId"].is_string());
        assert_ne!(encrypted["password"], json!("p"));

        let outcome = fields.decrypt_sensitive_data(&encrypted).expect("decrypt");
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.record, record);
    }

    #[test]
    fn nested_structures_round_trip() {
        let (_, fields) = fixture();
        let record = json!({
            "name": "deploy-pipeline",
            "enabled": true,
            "retries": 3,
            "owner": {
                "email": "ops@example.com",
                "apiToken": "tok-12345",
                "preferences": {"theme": "dark"}
            },
            "connections": [
                {"host": "db-1", "dbPassword": "pg-secret", "port": 5432},
                {"host": "db-2", "dbPassword": "pg-secret-2", "port": 5433}
            ],
            "tags": ["prod", "critical"],
            "note": null
        });

        let encrypted = fields.encrypt_sensitive_data(&record).expect("encrypt");
        // Non-sensitive structure is untouched.
        assert_eq!(encrypted["name"], record["name"]);
        assert_eq!(encrypted["owner"]["email"], record["owner"]["email"]);
        assert_eq!(encrypted["owner"]["preferences"], record["owner"]["preferences"]);
        assert_eq!(encrypted["tags"], record["tags"]);
        // Sensitive fields at every depth are enveloped.
        assert!(encrypted["owner"]["apiToken"].is_object());
        assert!(encrypted["connections"][0]["dbPassword"].is_object());
        assert!(encrypted["connections"][1]["dbPassword"].is_object());

        let outcome = fields.decrypt_sensitive_data(&encrypted).expect("decrypt");
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.record, record);
    }

    #[test]
    fn non_string_sensitive_values_round_trip() {
        let (_, fields) = fixture();
        let record = json!({
            "pinSecret": 123456,
            "keyMaterial": {"kty": "oct", "k": "b64"},
            "tokenList": ["t1", "t2"]
        });

        let encrypted = fields.encrypt_sensitive_data(&record).expect("encrypt");
        assert!(encrypted["pinSecret"].is_object());
        assert!(encrypted["keyMaterial"]["value"].is_string());
        assert!(encrypted["tokenList"]["value"].is_string());

        let outcome = fields.decrypt_sensitive_data(&encrypted).expect("decrypt");
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.record, record);
    }

    #[test]
    fn encrypting_twice_does_not_double_wrap() {
        let (_, fields) = fixture();
        let record = json!({"password": "p"});

        let once = fields.encrypt_sensitive_data(&record).expect("encrypt");
        let twice = fields.encrypt_sensitive_data(&once).expect("encrypt again");
        assert_eq!(once, twice, "an envelope must never be re-encrypted");

        let outcome = fields.decrypt_sensitive_data(&twice).expect("decrypt");
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.record, record);
    }

    #[test]
    fn decryption_works_across_rotation() {
        let (keys, fields) = fixture();
        let record = json!({"secret": "pre-rotation"});

        let encrypted = fields.encrypt_sensitive_data(&record).expect("encrypt");
        keys.rotate_key().expect("rotate");
        let after = fields
            .encrypt_sensitive_data(&json!({"secret": "post-rotation"}))
            .expect("encrypt");

        // The two envelopes name different keys; both decrypt.
        assert_ne!(encrypted["secret"]["keyId"], after["secret"]["keyId"]);
        assert_eq!(
            fields.decrypt_sensitive_data(&encrypted).expect("decrypt").record,
            record
        );
    }

    #[test]
    fn missing_key_fails_per_field_not_whole_record() {
        let (keys, fields) = fixture();
        let record = json!({"user": "a", "password": "p"});
        let encrypted = fields.encrypt_sensitive_data(&record).expect("encrypt");

        let old_key = keys.active_key_id();
        keys.rotate_key().expect("rotate");
        keys.secure_delete(old_key).expect("secure delete");

        // A field encrypted under the new key still decrypts.
        let fresh = fields
            .encrypt_sensitive_data(&json!({"token": "still-fine"}))
            .expect("encrypt");

        let outcome = fields.decrypt_sensitive_data(&encrypted).expect("decrypt");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, "password");
        match &outcome.failures[0].error {
            WardenError::DecryptionKeyMissing { field, .. } => assert_eq!(field, "password"),
            other => panic!("expected DecryptionKeyMissing, got {other:?}"),
        }
        // The failed field keeps its envelope; the rest is intact.
        assert_eq!(outcome.record["user"], json!("a"));
        assert!(outcome.record["password"].is_object());

        let ok = fields.decrypt_sensitive_data(&fresh).expect("decrypt");
        assert!(ok.failures.is_empty());
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let (_, fields) = fixture();
        assert!(fields.is_sensitive("password"));
        assert!(fields.is_sensitive("Password"));
        assert!(fields.is_sensitive("API_KEY"));
        assert!(fields.is_sensitive("refreshToken"));
        assert!(fields.is_sensitive("clientSecret"));
        assert!(!fields.is_sensitive("username"));
        assert!(!fields.is_sensitive("created_at"));
    }

    #[test]
    fn depth_guard_rejects_pathological_nesting() {
        let (_, fields) = fixture();
        let mut record = json!({"leaf": true});
        for _ in 0..80 {
            record = json!({"level": record});
        }

        match fields.encrypt_sensitive_data(&record) {
            Err(WardenError::Encryption(_)) => {}
            other => panic!("expected depth error, got {other:?}"),
        }
    }

    #[test]
    fn scalar_records_pass_through() {
        let (_, fields) = fixture();
        for record in [json!(42), json!("plain"), json!(null), json!([1, 2, 3])] {
            let encrypted = fields.encrypt_sensitive_data(&record).expect("encrypt");
            assert_eq!(encrypted, record);
            let outcome = fields.decrypt_sensitive_data(&encrypted).expect("decrypt");
            assert!(outcome.failures.is_empty());
            assert_eq!(outcome.record, record);
        }
    }
}
