// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Export signing — a dedicated ECDSA P-256 key pair for signing audit-log
// exports, so a party without write access to the log can verify that an
// exported Merkle root is authentic.

use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair,
    UnparsedPublicKey,
};
use tracing::{debug, instrument};
use warden_core::error::{Result, WardenError};

/// An ECDSA P-256 key pair dedicated to audit-export signing.
///
/// The private key is stored as a PKCS#8 v1 DER document. The public key is
/// the uncompressed SEC1 encoding (0x04 || x || y, 65 bytes) and is shipped
/// alongside every export so verifiers need no side channel.
pub struct ExportSigner {
    /// PKCS#8 v1 DER-encoded private key (includes the public key).
    pkcs8_der: Vec<u8>,
    /// Uncompressed SEC1 public key bytes.
    public_key: Vec<u8>,
}

impl ExportSigner {
    /// Generate a fresh signing key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();

        let pkcs8_document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| WardenError::ExportSigning(format!("key generation failed: {e}")))?;

        Self::from_pkcs8_der(pkcs8_document.as_ref())
    }

    /// Load a signing key pair from PKCS#8 v1 DER, e.g. one referenced by
    /// the deployment's configuration.
    pub fn from_pkcs8_der(pkcs8_der: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8_der, &rng)
            .map_err(|e| WardenError::ExportSigning(format!("key parsing failed: {e}")))?;

        let public_key = key_pair.public_key().as_ref().to_vec();

        debug!(
            pkcs8_len = pkcs8_der.len(),
            pubkey_len = public_key.len(),
            "export signing key loaded"
        );

        Ok(Self {
            pkcs8_der: pkcs8_der.to_vec(),
            public_key,
        })
    }

    /// The PKCS#8 v1 DER-encoded private key, for persisting across
    /// restarts so exports stay verifiable under one key.
    pub fn private_key_pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// The uncompressed SEC1 public key (65 bytes for P-256).
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Sign `message` (ECDSA P-256 + SHA-256, ASN.1 DER-encoded signature).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();

        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &self.pkcs8_der, &rng)
                .map_err(|e| WardenError::ExportSigning(format!("key load failed: {e}")))?;

        let sig = key_pair
            .sign(&rng, message)
            .map_err(|e| WardenError::ExportSigning(format!("signing failed: {e}")))?;

        Ok(sig.as_ref().to_vec())
    }

    /// Verify a signature against a public key produced by this module.
    ///
    /// Returns `AuthenticationFailure` on mismatch, with no further detail.
    pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
        let key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key);
        key.verify(message, signature)
            .map_err(|_| WardenError::AuthenticationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_pair() {
        let signer = ExportSigner::generate().expect("key generation failed");

        // PKCS#8 for P-256 is typically ~138 bytes.
        assert!(
            signer.private_key_pkcs8_der().len() > 100,
            "PKCS#8 DER looks too short"
        );

        // Uncompressed P-256 public key: 1 (0x04) + 32 + 32 = 65 bytes.
        assert_eq!(signer.public_key().len(), 65);
        assert_eq!(signer.public_key()[0], 0x04, "must be uncompressed point");
    }

    #[test]
    fn sign_and_verify() {
        let signer = ExportSigner::generate().expect("key generation failed");
        let message = b"warden audit export root";

        let signature = signer.sign(message).expect("signing failed");
        ExportSigner::verify(signer.public_key(), message, &signature)
            .expect("signature verification failed");
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let signer = ExportSigner::generate().expect("key generation failed");
        let signature = signer.sign(b"root-a").expect("signing failed");

        match ExportSigner::verify(signer.public_key(), b"root-b", &signature) {
            Err(WardenError::AuthenticationFailure) => {}
            other => panic!("expected AuthenticationFailure, got {other:?}"),
        }
    }

    #[test]
    fn key_round_trips_through_pkcs8() {
        let original = ExportSigner::generate().expect("gen");
        let restored = ExportSigner::from_pkcs8_der(original.private_key_pkcs8_der())
            .expect("restore from PKCS#8");
        assert_eq!(original.public_key(), restored.public_key());

        let signature = restored.sign(b"persisted key").expect("sign");
        ExportSigner::verify(original.public_key(), b"persisted key", &signature)
            .expect("cross-instance verification failed");
    }

    #[test]
    fn different_keys_each_time() {
        let a = ExportSigner::generate().expect("gen a");
        let b = ExportSigner::generate().expect("gen b");
        assert_ne!(
            a.private_key_pkcs8_der(),
            b.private_key_pkcs8_der(),
            "two generations must produce different keys"
        );
    }
}
