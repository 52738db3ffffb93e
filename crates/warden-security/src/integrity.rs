// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chain integrity — SHA-256 hashing primitives for the audit hash chain.

use sha2::{Digest, Sha256};

/// Previous-hash value of the first event in the chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Compute an audit event's chain hash.
///
/// `hash = SHA-256(canonical ‖ prev_hash)` — the canonical serialization of
/// the event's fields concatenated with the previous event's hex hash (or
/// [`GENESIS_HASH`] for the first event). Because each hash folds in its
/// predecessor, mutating or reordering any historical event invalidates
/// every hash after it.
pub fn chain_hash(canonical: &str, prev_hash: &str) -> String {
    let mut preimage = Vec::with_capacity(canonical.len() + prev_hash.len());
    preimage.extend_from_slice(canonical.as_bytes());
    preimage.extend_from_slice(prev_hash.as_bytes());
    hash_bytes(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice (well-known constant).
    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn hash_known_value() {
        // SHA-256("hello") — verified against coreutils sha256sum.
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(hash_bytes(b"hello"), expected);
    }

    #[test]
    fn genesis_is_all_zeroes() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn chain_hash_depends_on_both_inputs() {
        let a = chain_hash("event-a", GENESIS_HASH);
        let b = chain_hash("event-b", GENESIS_HASH);
        assert_ne!(a, b);

        let chained = chain_hash("event-b", &a);
        assert_ne!(chained, b, "different prev hash must change the result");
    }

    #[test]
    fn chain_hash_is_deterministic() {
        let first = chain_hash("payload", GENESIS_HASH);
        let second = chain_hash("payload", GENESIS_HASH);
        assert_eq!(first, second);
    }
}
