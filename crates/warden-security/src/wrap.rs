// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Password-based key wrapping — age (X25519 / scrypt) for wrapping and
// unwrapping exported key blobs.  The wrapping key is derived from the
// caller's password via scrypt, and the ciphertext is authenticated, so a
// tampered blob fails to unwrap.

use std::io::{Read, Write};

use age::secrecy::SecretString;
use tracing::{debug, instrument};
use warden_core::error::{Result, WardenError};

/// Password-based wrapper for exported key material.
///
/// Each wrap/unwrap call is stateless — the password is held only for the
/// lifetime of the `KeyWrapper` value (inside a `SecretString`, zeroised on
/// drop) so that callers can drop it promptly after use.
pub struct KeyWrapper {
    password: SecretString,
}

impl KeyWrapper {
    /// Create a new wrapper with the given password.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: SecretString::from(password.into()),
        }
    }

    /// Wrap `blob` and return the ciphertext as a `Vec<u8>`.
    ///
    /// The output is a complete age file (header + encrypted payload).
    #[instrument(skip_all, fields(blob_len = blob.len()))]
    pub fn wrap(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(self.password.clone());
        let mut ciphertext = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut ciphertext)
            .map_err(|e| WardenError::KeyExport(e.to_string()))?;

        writer
            .write_all(blob)
            .map_err(|e| WardenError::KeyExport(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| WardenError::KeyExport(e.to_string()))?;

        debug!(ciphertext_len = ciphertext.len(), "key blob wrapped");
        Ok(ciphertext)
    }

    /// Unwrap `ciphertext` (a complete age file) and return the original
    /// blob bytes.  Fails if the password is wrong or the blob was tampered
    /// with.
    #[instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
    pub fn unwrap(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let decryptor = age::Decryptor::new(ciphertext)
            .map_err(|e| WardenError::KeyImport(e.to_string()))?;

        let identity = age::scrypt::Identity::new(self.password.clone());

        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| WardenError::KeyImport(e.to_string()))?;

        let mut blob = Vec::new();
        reader
            .read_to_end(&mut blob)
            .map_err(|e| WardenError::KeyImport(e.to_string()))?;

        debug!(blob_len = blob.len(), "key blob unwrapped");
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let wrapper = KeyWrapper::new("correct-horse-battery-staple");
        let blob = b"warden exported key record";

        let ciphertext = wrapper.wrap(blob).expect("wrap failed");
        assert_ne!(&ciphertext[..], blob, "ciphertext must differ from blob");

        let unwrapped = wrapper.unwrap(&ciphertext).expect("unwrap failed");
        assert_eq!(unwrapped, blob);
    }

    #[test]
    fn wrong_password_fails() {
        let wrapper_a = KeyWrapper::new("password-alpha");
        let wrapper_b = KeyWrapper::new("password-beta");

        let ciphertext = wrapper_a.wrap(b"secret").expect("wrap failed");
        let result = wrapper_b.unwrap(&ciphertext);

        assert!(result.is_err(), "unwrap with wrong password must fail");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let wrapper = KeyWrapper::new("tamper-test");
        let mut ciphertext = wrapper.wrap(b"integrity matters").expect("wrap failed");

        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;

        assert!(wrapper.unwrap(&ciphertext).is_err());
    }
}
