// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key management — AES-256-GCM data keys with a one-way lifecycle
// (active → rotating → deprecated → securely deleted), password-based
// export/import, and deterministic PBKDF2 derivation.
//
// Concurrency: the whole key store sits behind a single `RwLock`.
// `encrypt` resolves the active key under the read lock, so no call can
// observe a half-rotated store; `secure_delete` takes the write lock, so it
// cannot race an in-flight `decrypt` on the same key.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use warden_core::config::SecurityConfig;
use warden_core::error::{Result, WardenError};
use warden_core::types::{KeyAlgorithm, KeyId, KeyStatus};

use crate::wrap::KeyWrapper;

/// PBKDF2 iteration count for `derive_key_from_password`. Fixed so that the
/// derivation stays deterministic across releases.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt used when the caller does not supply one.
const DEFAULT_KDF_SALT: &[u8] = b"warden.kdf.v1";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A self-describing authenticated ciphertext.
///
/// Carries the id of the key that produced it so decryption can locate the
/// right key even after rotation. Immutable once produced; any bit flip in
/// `ciphertext` or `tag` makes `decrypt` fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(rename = "keyId")]
    pub key_id: KeyId,
    pub algorithm: KeyAlgorithm,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub tag: Vec<u8>,
}

/// Key metadata, safe to expose. Never contains key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: KeyId,
    pub algorithm: KeyAlgorithm,
    pub created_at: DateTime<Utc>,
    pub status: KeyStatus,
    pub version: u32,
}

/// Aggregate key-store counters for rotation-policy alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub total: usize,
    pub active: usize,
    pub rotating: usize,
    pub deprecated: usize,
    /// Age of the oldest retained key in seconds.
    pub oldest_key_age_secs: Option<i64>,
    /// Whether the active key is older than the configured rotation
    /// interval.
    pub rotation_overdue: bool,
    /// Deprecated keys whose retention window has elapsed — safe to
    /// secure-delete once no ciphertext references them.
    pub eligible_for_deletion: usize,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// A stored key. Material never leaves this struct except inside an export
/// blob wrapped under a caller-supplied password.
struct StoredKey {
    id: KeyId,
    material: Vec<u8>,
    algorithm: KeyAlgorithm,
    created_at: DateTime<Utc>,
    status: KeyStatus,
    version: u32,
    /// Wall-clock end of the rotation grace window.
    grace_deadline: Option<DateTime<Utc>>,
    /// Encrypt calls the grace window may still absorb.
    grace_encrypts_remaining: AtomicU32,
    /// When the key left the grace window and became decrypt-only.
    deprecated_at: Option<DateTime<Utc>>,
}

impl StoredKey {
    fn info(&self) -> KeyInfo {
        KeyInfo {
            id: self.id,
            algorithm: self.algorithm,
            created_at: self.created_at,
            status: self.status,
            version: self.version,
        }
    }

    fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        let deadline_passed = self.grace_deadline.is_some_and(|d| now >= d);
        let budget_spent = self.grace_encrypts_remaining.load(Ordering::Relaxed) == 0;
        deadline_passed || budget_spent
    }
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

struct KeyStore {
    keys: HashMap<KeyId, StoredKey>,
    active: KeyId,
    next_version: u32,
}

// ---------------------------------------------------------------------------
// KeyManager
// ---------------------------------------------------------------------------

/// Owns all symmetric key material and the raw encrypt/decrypt primitives.
///
/// Invariant: exactly one key is `Active` at any time. Keys move one way
/// through `Active → Rotating → Deprecated` and never return.
pub struct KeyManager {
    store: RwLock<KeyStore>,
    rng: SystemRandom,
    algorithm: KeyAlgorithm,
    rotation_interval_secs: u64,
    grace_secs: u64,
    grace_encrypt_budget: u32,
    retention_secs: u64,
}

impl KeyManager {
    /// Create a key manager with a freshly generated active key.
    #[instrument(skip_all)]
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let rng = SystemRandom::new();
        let manager = Self {
            store: RwLock::new(KeyStore {
                keys: HashMap::new(),
                active: KeyId::new(),
                next_version: 1,
            }),
            rng,
            algorithm: config.key_algorithm,
            rotation_interval_secs: config.key_rotation_interval_secs,
            grace_secs: config.rotation_grace_secs,
            grace_encrypt_budget: config.rotation_grace_encrypt_budget,
            retention_secs: config.deprecated_retention_secs,
        };

        // Replace the placeholder active id with a real key.
        let initial = manager.generate_new_key()?;
        debug!(key_id = %initial, "key manager initialised");
        Ok(manager)
    }

    fn fresh_material(&self) -> Result<Vec<u8>> {
        let mut material = vec![0u8; self.algorithm.key_len()];
        self.rng
            .fill(&mut material)
            .map_err(|_| WardenError::KeyGeneration("CSPRNG failure".into()))?;
        Ok(material)
    }

    /// Demote rotating keys whose grace window has closed.
    fn sweep_grace(store: &mut KeyStore, now: DateTime<Utc>) {
        for key in store.keys.values_mut() {
            if key.status == KeyStatus::Rotating && key.grace_expired(now) {
                key.status = KeyStatus::Deprecated;
                key.grace_deadline = None;
                key.deprecated_at = Some(now);
                info!(key_id = %key.id, version = key.version, "key deprecated");
            }
        }
    }

    /// Generate a new active key.
    ///
    /// The previous active key is demoted to `Rotating` and stays usable for
    /// decryption (and for encryption during the grace window) — no hard
    /// cutover that could race in-flight encrypt calls.
    #[instrument(skip_all)]
    pub fn generate_new_key(&self) -> Result<KeyId> {
        let material = self.fresh_material()?;
        let now = Utc::now();
        let mut store = self.store.write().expect("key store lock poisoned");

        Self::sweep_grace(&mut store, now);

        // Demote the current active key, if one exists yet.
        let grace_deadline = now + chrono::Duration::seconds(self.grace_secs as i64);
        let current_active = store.active;
        if let Some(previous) = store.keys.get_mut(&current_active) {
            previous.status = KeyStatus::Rotating;
            previous.grace_deadline = Some(grace_deadline);
            previous
                .grace_encrypts_remaining
                .store(self.grace_encrypt_budget, Ordering::Relaxed);
            debug!(key_id = %previous.id, "previous active key now rotating");
        }

        let id = KeyId::new();
        let version = store.next_version;
        store.next_version += 1;
        store.keys.insert(
            id,
            StoredKey {
                id,
                material,
                algorithm: self.algorithm,
                created_at: now,
                status: KeyStatus::Active,
                version,
                grace_deadline: None,
                grace_encrypts_remaining: AtomicU32::new(u32::MAX),
                deprecated_at: None,
            },
        );
        store.active = id;

        info!(key_id = %id, version, "new active key generated");
        Ok(id)
    }

    /// Rotate the active key.
    ///
    /// Generates a new active key and finalises the lifecycle of demoted
    /// keys: any `Rotating` key whose grace window (wall clock or encrypt
    /// budget) has closed becomes `Deprecated`. Deprecated keys are retained
    /// so that ciphertext referencing them stays decryptable.
    #[instrument(skip_all)]
    pub fn rotate_key(&self) -> Result<KeyId> {
        let id = self.generate_new_key()?;
        info!(key_id = %id, "key rotated");
        Ok(id)
    }

    /// Encrypt `plaintext` under the current active key.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| WardenError::Encryption("nonce generation failed".into()))?;

        let store = self.store.read().expect("key store lock poisoned");
        let key = store
            .keys
            .get(&store.active)
            .ok_or_else(|| WardenError::KeyNotFound {
                key_id: store.active.to_string(),
            })?;

        // Each encrypt call spends one unit of every rotating key's grace
        // budget; when a budget hits zero the next lifecycle operation
        // deprecates that key.
        for other in store.keys.values() {
            if other.status == KeyStatus::Rotating {
                let _ = other.grace_encrypts_remaining.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |n| n.checked_sub(1),
                );
            }
        }

        let unbound = UnboundKey::new(&AES_256_GCM, &key.material)
            .map_err(|_| WardenError::Encryption("invalid key material".into()))?;
        let sealing = LessSafeKey::new(unbound);

        let mut in_out = plaintext.to_vec();
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let tag = sealing
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| WardenError::Encryption("AEAD sealing failed".into()))?;

        debug!(key_id = %key.id, ciphertext_len = in_out.len(), "payload encrypted");
        Ok(EncryptedPayload {
            key_id: key.id,
            algorithm: key.algorithm,
            nonce: nonce_bytes.to_vec(),
            ciphertext: in_out,
            tag: tag.as_ref().to_vec(),
        })
    }

    /// Decrypt a payload produced by [`encrypt`](Self::encrypt).
    ///
    /// Resolves the payload's key id against the store regardless of status
    /// (active, rotating, or deprecated). Fails with `KeyNotFound` if the
    /// key was securely deleted and with `AuthenticationFailure` if the tag
    /// does not verify — without returning any partial plaintext.
    #[instrument(skip_all, fields(key_id = %payload.key_id))]
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        let store = self.store.read().expect("key store lock poisoned");
        let key = store
            .keys
            .get(&payload.key_id)
            .ok_or_else(|| WardenError::KeyNotFound {
                key_id: payload.key_id.to_string(),
            })?;

        let unbound = UnboundKey::new(&AES_256_GCM, &key.material)
            .map_err(|_| WardenError::AuthenticationFailure)?;
        let opening = LessSafeKey::new(unbound);

        let nonce = Nonce::try_assume_unique_for_key(&payload.nonce)
            .map_err(|_| WardenError::AuthenticationFailure)?;

        let mut in_out = payload.ciphertext.clone();
        in_out.extend_from_slice(&payload.tag);

        let plaintext_len = opening
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| WardenError::AuthenticationFailure)?
            .len();
        in_out.truncate(plaintext_len);

        debug!(plaintext_len, "payload decrypted");
        Ok(in_out)
    }

    /// Derive a 32-byte key from a password with PBKDF2-HMAC-SHA256.
    ///
    /// Fixed iteration count and output length: the same password and salt
    /// always yield the same key. Intended for wrapping exported key
    /// material — never used for primary data keys, which come from the OS
    /// CSPRNG.
    pub fn derive_key_from_password(password: &str, salt: Option<&[u8]>) -> [u8; 32] {
        const ITERATIONS: NonZeroU32 = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap();
        let salt = salt.unwrap_or(DEFAULT_KDF_SALT);
        let mut out = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            ITERATIONS,
            salt,
            password.as_bytes(),
            &mut out,
        );
        out
    }

    /// Export a key as an opaque password-wrapped string.
    ///
    /// The blob is the JSON key record encrypted under a password-derived
    /// wrapping key (age scrypt), then hex-encoded. Import verifies the
    /// authentication tag, so a tampered blob is rejected.
    #[instrument(skip_all, fields(key_id = %key_id))]
    pub fn export_key(&self, key_id: KeyId, password: &str) -> Result<String> {
        let record = {
            let store = self.store.read().expect("key store lock poisoned");
            let key = store
                .keys
                .get(&key_id)
                .ok_or_else(|| WardenError::KeyNotFound {
                    key_id: key_id.to_string(),
                })?;
            KeyExportRecord {
                id: key.id,
                algorithm: key.algorithm,
                created_at: key.created_at,
                version: key.version,
                material_hex: hex::encode(&key.material),
            }
        };

        let json = serde_json::to_vec(&record)?;
        let wrapped = KeyWrapper::new(password).wrap(&json)?;
        debug!(blob_len = wrapped.len(), "key exported");
        Ok(hex::encode(wrapped))
    }

    /// Import a key previously produced by [`export_key`](Self::export_key).
    ///
    /// Imported keys land as `Deprecated` — decrypt-only. An import never
    /// displaces the active key.
    #[instrument(skip_all)]
    pub fn import_key(&self, blob: &str, password: &str) -> Result<KeyId> {
        let wrapped = hex::decode(blob)
            .map_err(|e| WardenError::KeyImport(format!("invalid blob encoding: {e}")))?;
        let json = KeyWrapper::new(password).unwrap(&wrapped)?;
        let record: KeyExportRecord = serde_json::from_slice(&json)
            .map_err(|e| WardenError::KeyImport(format!("invalid blob contents: {e}")))?;

        let material = hex::decode(&record.material_hex)
            .map_err(|e| WardenError::KeyImport(format!("invalid key material: {e}")))?;
        if material.len() != record.algorithm.key_len() {
            return Err(WardenError::KeyImport(format!(
                "wrong key length: expected {}, got {}",
                record.algorithm.key_len(),
                material.len()
            )));
        }

        let mut store = self.store.write().expect("key store lock poisoned");
        if store.keys.contains_key(&record.id) {
            return Err(WardenError::KeyImport(format!(
                "key {} already present",
                record.id
            )));
        }

        store.keys.insert(
            record.id,
            StoredKey {
                id: record.id,
                material,
                algorithm: record.algorithm,
                created_at: record.created_at,
                status: KeyStatus::Deprecated,
                version: record.version,
                grace_deadline: None,
                grace_encrypts_remaining: AtomicU32::new(0),
                deprecated_at: Some(Utc::now()),
            },
        );

        info!(key_id = %record.id, "key imported (deprecated, decrypt-only)");
        Ok(record.id)
    }

    /// Overwrite a key's material in memory and remove it from the store.
    ///
    /// The active key cannot be deleted. Afterwards `get_key_info` returns
    /// `None` and decryption of payloads referencing the key fails with
    /// `KeyNotFound`.
    #[instrument(skip_all, fields(key_id = %key_id))]
    pub fn secure_delete(&self, key_id: KeyId) -> Result<()> {
        let mut store = self.store.write().expect("key store lock poisoned");
        if store.active == key_id {
            return Err(WardenError::KeyInUse {
                key_id: key_id.to_string(),
            });
        }

        let mut key = store
            .keys
            .remove(&key_id)
            .ok_or_else(|| WardenError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;

        // Zero the material before the allocation is released.
        for byte in key.material.iter_mut() {
            unsafe { std::ptr::write_volatile(byte, 0) };
        }

        warn!(key_id = %key_id, "key securely deleted");
        Ok(())
    }

    /// Metadata for a single key, if it still exists.
    pub fn get_key_info(&self, key_id: KeyId) -> Option<KeyInfo> {
        let store = self.store.read().expect("key store lock poisoned");
        store.keys.get(&key_id).map(StoredKey::info)
    }

    /// The id of the current active key.
    pub fn active_key_id(&self) -> KeyId {
        self.store.read().expect("key store lock poisoned").active
    }

    /// Counts by status and the age of the oldest key, for rotation-policy
    /// alerting.
    pub fn get_key_metrics(&self) -> KeyMetrics {
        let store = self.store.read().expect("key store lock poisoned");
        let now = Utc::now();

        let mut metrics = KeyMetrics {
            total: store.keys.len(),
            active: 0,
            rotating: 0,
            deprecated: 0,
            oldest_key_age_secs: None,
            rotation_overdue: false,
            eligible_for_deletion: 0,
        };

        for key in store.keys.values() {
            match key.status {
                KeyStatus::Active => metrics.active += 1,
                KeyStatus::Rotating => metrics.rotating += 1,
                KeyStatus::Deprecated => {
                    metrics.deprecated += 1;
                    let past_retention = key
                        .deprecated_at
                        .is_some_and(|at| (now - at).num_seconds() > self.retention_secs as i64);
                    if past_retention {
                        metrics.eligible_for_deletion += 1;
                    }
                }
            }
            let age = (now - key.created_at).num_seconds();
            if metrics.oldest_key_age_secs.is_none_or(|oldest| age > oldest) {
                metrics.oldest_key_age_secs = Some(age);
            }
            if key.status == KeyStatus::Active {
                metrics.rotation_overdue = age > self.rotation_interval_secs as i64;
            }
        }

        metrics
    }
}

/// Serialized form of an exported key, wrapped under a password before it
/// leaves the process.
#[derive(Serialize, Deserialize)]
struct KeyExportRecord {
    id: KeyId,
    algorithm: KeyAlgorithm,
    created_at: DateTime<Utc>,
    version: u32,
    material_hex: String,
}

// ---------------------------------------------------------------------------
// Hex (de)serialization for payload byte fields
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(&SecurityConfig::default()).expect("key manager init")
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let km = manager();
        let payload = km.encrypt(b"hello").expect("encrypt failed");
        let plaintext = km.decrypt(&payload).expect("decrypt failed");
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn decrypt_survives_rotation() {
        let km = manager();
        let payload = km.encrypt(b"hello").expect("encrypt failed");
        let old_key = payload.key_id;

        let new_key = km.rotate_key().expect("rotate failed");
        assert_ne!(old_key, new_key);

        // Old ciphertext still decrypts; new encryptions use the new key.
        assert_eq!(km.decrypt(&payload).expect("decrypt failed"), b"hello");
        let fresh = km.encrypt(b"world").expect("encrypt failed");
        assert_eq!(fresh.key_id, new_key);
    }

    #[test]
    fn exactly_one_active_key() {
        let km = manager();
        km.rotate_key().expect("rotate failed");
        km.rotate_key().expect("rotate failed");
        let metrics = km.get_key_metrics();
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.total, 3);
    }

    #[test]
    fn rotation_demotes_previous_active() {
        let km = manager();
        let first = km.active_key_id();
        km.rotate_key().expect("rotate failed");
        let info = km.get_key_info(first).expect("first key info");
        assert_eq!(info.status, KeyStatus::Rotating);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let km = manager();
        let mut payload = km.encrypt(b"sensitive").expect("encrypt failed");
        payload.ciphertext[0] ^= 0x01;
        match km.decrypt(&payload) {
            Err(WardenError::AuthenticationFailure) => {}
            other => panic!("expected AuthenticationFailure, got {other:?}"),
        }
    }

    #[test]
    fn tampered_tag_fails_authentication() {
        let km = manager();
        let mut payload = km.encrypt(b"sensitive").expect("encrypt failed");
        let last = payload.tag.len() - 1;
        payload.tag[last] ^= 0x80;
        match km.decrypt(&payload) {
            Err(WardenError::AuthenticationFailure) => {}
            other => panic!("expected AuthenticationFailure, got {other:?}"),
        }
    }

    #[test]
    fn secure_delete_removes_key() {
        let km = manager();
        let payload = km.encrypt(b"doomed").expect("encrypt failed");
        let old_key = payload.key_id;
        km.rotate_key().expect("rotate failed");

        km.secure_delete(old_key).expect("secure delete failed");
        assert!(km.get_key_info(old_key).is_none());
        match km.decrypt(&payload) {
            Err(WardenError::KeyNotFound { .. }) => {}
            other => panic!("expected KeyNotFound, got {other:?}"),
        }
    }

    #[test]
    fn active_key_cannot_be_deleted() {
        let km = manager();
        let active = km.active_key_id();
        match km.secure_delete(active) {
            Err(WardenError::KeyInUse { .. }) => {}
            other => panic!("expected KeyInUse, got {other:?}"),
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = KeyManager::derive_key_from_password("hunter2", Some(b"salt".as_slice()));
        let b = KeyManager::derive_key_from_password("hunter2", Some(b"salt".as_slice()));
        assert_eq!(a, b);

        let c = KeyManager::derive_key_from_password("hunter2", Some(b"other salt".as_slice()));
        assert_ne!(a, c);

        let d = KeyManager::derive_key_from_password("different", Some(b"salt".as_slice()));
        assert_ne!(a, d);

        // Omitting the salt falls back to the fixed default, still
        // deterministically.
        let e = KeyManager::derive_key_from_password("hunter2", None);
        let f = KeyManager::derive_key_from_password("hunter2", None);
        assert_eq!(e, f);
        assert_ne!(a, e);
    }

    #[test]
    fn export_import_round_trip() {
        let km = manager();
        let payload = km.encrypt(b"portable").expect("encrypt failed");
        let key_id = payload.key_id;

        let blob = km.export_key(key_id, "export-pass").expect("export failed");

        let other = manager();
        let imported = other.import_key(&blob, "export-pass").expect("import failed");
        assert_eq!(imported, key_id);

        // The imported key decrypts the original payload but is not active.
        assert_eq!(other.decrypt(&payload).expect("decrypt failed"), b"portable");
        let info = other.get_key_info(imported).expect("imported key info");
        assert_eq!(info.status, KeyStatus::Deprecated);
        assert_ne!(other.active_key_id(), imported);
    }

    #[test]
    fn import_with_wrong_password_fails() {
        let km = manager();
        let blob = km
            .export_key(km.active_key_id(), "right-pass")
            .expect("export failed");

        let other = manager();
        assert!(other.import_key(&blob, "wrong-pass").is_err());
    }

    #[test]
    fn import_rejects_tampered_blob() {
        let km = manager();
        let mut blob = km
            .export_key(km.active_key_id(), "pass")
            .expect("export failed");
        // Flip a nibble deep inside the wrapped payload.
        let mid = blob.len() / 2;
        let flipped = if &blob[mid..=mid] == "0" { "1" } else { "0" };
        blob.replace_range(mid..=mid, flipped);

        let other = manager();
        assert!(other.import_key(&blob, "pass").is_err());
    }

    #[test]
    fn duplicate_import_is_rejected() {
        let km = manager();
        let old = km.active_key_id();
        km.rotate_key().expect("rotate failed");
        let blob = km.export_key(old, "pass").expect("export failed");
        match km.import_key(&blob, "pass") {
            Err(WardenError::KeyImport(_)) => {}
            other => panic!("expected KeyImport error, got {other:?}"),
        }
    }

    #[test]
    fn metrics_report_statuses() {
        let km = manager();
        km.rotate_key().expect("rotate failed");
        let metrics = km.get_key_metrics();
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.rotating, 1);
        assert_eq!(metrics.total, 2);
        assert!(!metrics.rotation_overdue);
        assert!(metrics.oldest_key_age_secs.is_some());
        assert_eq!(metrics.eligible_for_deletion, 0);
    }

    #[test]
    fn grace_budget_deprecates_rotating_key() {
        let mut config = SecurityConfig::default();
        config.rotation_grace_encrypt_budget = 2;
        let km = KeyManager::new(&config).expect("key manager init");

        let first = km.active_key_id();
        km.rotate_key().expect("rotate failed");
        assert_eq!(
            km.get_key_info(first).expect("info").status,
            KeyStatus::Rotating
        );

        // Spend the grace budget, then trigger a lifecycle sweep.
        km.encrypt(b"one").expect("encrypt failed");
        km.encrypt(b"two").expect("encrypt failed");
        km.rotate_key().expect("rotate failed");

        assert_eq!(
            km.get_key_info(first).expect("info").status,
            KeyStatus::Deprecated
        );
    }

    #[test]
    fn payload_serde_round_trip() {
        let km = manager();
        let payload = km.encrypt(b"serialize me").expect("encrypt failed");
        let json = serde_json::to_string(&payload).expect("serialize payload");
        let back: EncryptedPayload = serde_json::from_str(&json).expect("deserialize payload");
        assert_eq!(back, payload);
        assert_eq!(km.decrypt(&back).expect("decrypt failed"), b"serialize me");
    }
}
