// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Merkle overlay — an on-demand tree over the audit chain's event hashes,
// giving O(log n) membership proofs without replaying the whole chain.
//
// The tree is never persisted: it is rebuilt from the current event set
// whenever a proof is requested, so it always reflects the full log.
// Leaf and node hashes are domain-separated so a leaf can never be
// confused with an internal node.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain prefix for leaf hashing.
const DOMAIN_LEAF: &[u8] = b"WARDEN_LEAF_V1";

/// Domain prefix for the padding leaf.
const DOMAIN_PAD_LEAF: &[u8] = b"WARDEN_PAD_LEAF_V1";

/// Domain prefix for internal nodes.
const DOMAIN_NODE: &[u8] = b"WARDEN_NODE_V1";

/// 32-byte SHA-256 hash.
pub type Hash256 = [u8; 32];

/// Which side of the parent a sibling hash sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step of a Merkle path: the sibling hash and the side it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub side: Side,
}

/// Compute a leaf hash from an event's hex chain hash.
///
/// `leaf = SHA-256(DOMAIN_LEAF ‖ event_hash_utf8)`
pub fn leaf_hash(event_hash: &str) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_LEAF);
    hasher.update(event_hash.as_bytes());
    hasher.finalize().into()
}

/// The padding leaf used to fill the tree out to a power of two.
pub fn pad_leaf() -> Hash256 {
    static PAD_LEAF: std::sync::OnceLock<Hash256> = std::sync::OnceLock::new();
    *PAD_LEAF.get_or_init(|| {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_PAD_LEAF);
        hasher.finalize().into()
    })
}

/// Hash two child nodes into their parent.
///
/// `node = SHA-256(DOMAIN_NODE ‖ left ‖ right)`
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_NODE);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Compute the Merkle root over the given event hashes (in log order).
///
/// Leaves are padded to the next power of two with [`pad_leaf`]. An empty
/// log has a root of a single padding leaf.
pub fn compute_root(event_hashes: &[String]) -> Hash256 {
    let mut level: Vec<Hash256> = event_hashes.iter().map(|h| leaf_hash(h)).collect();
    let width = event_hashes.len().next_power_of_two().max(1);
    level.resize(width, pad_leaf());

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| node_hash(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Build the sibling path from `leaf_index` up to the root.
///
/// Returns `None` if the index is out of range.
pub fn compute_path(event_hashes: &[String], leaf_index: usize) -> Option<Vec<ProofStep>> {
    if leaf_index >= event_hashes.len() {
        return None;
    }

    let mut level: Vec<Hash256> = event_hashes.iter().map(|h| leaf_hash(h)).collect();
    let width = event_hashes.len().next_power_of_two().max(1);
    level.resize(width, pad_leaf());

    let mut path = Vec::new();
    let mut index = leaf_index;
    while level.len() > 1 {
        let (sibling_index, side) = if index % 2 == 0 {
            (index + 1, Side::Right)
        } else {
            (index - 1, Side::Left)
        };
        path.push(ProofStep {
            hash: hex::encode(level[sibling_index]),
            side,
        });

        level = level
            .chunks(2)
            .map(|pair| node_hash(&pair[0], &pair[1]))
            .collect();
        index /= 2;
    }
    Some(path)
}

/// Recompute the root from a leaf and its sibling path.
pub fn fold_path(leaf: &Hash256, path: &[ProofStep]) -> Option<Hash256> {
    let mut current = *leaf;
    for step in path {
        let sibling_bytes = hex::decode(&step.hash).ok()?;
        let sibling: Hash256 = sibling_bytes.try_into().ok()?;
        current = match step.side {
            Side::Right => node_hash(&current, &sibling),
            Side::Left => node_hash(&sibling, &current),
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:064x}")).collect()
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let hs = hashes(1);
        let root = compute_root(&hs);
        assert_eq!(root, leaf_hash(&hs[0]));

        // And its (empty) path folds straight to the root.
        let path = compute_path(&hs, 0).expect("path");
        assert!(path.is_empty());
        assert_eq!(fold_path(&leaf_hash(&hs[0]), &path).expect("fold"), root);
    }

    #[test]
    fn three_leaves_pad_to_four() {
        let hs = hashes(3);
        let root = compute_root(&hs);
        // Manual tree: ((l0,l1),(l2,pad)).
        let expected = node_hash(
            &node_hash(&leaf_hash(&hs[0]), &leaf_hash(&hs[1])),
            &node_hash(&leaf_hash(&hs[2]), &pad_leaf()),
        );
        assert_eq!(root, expected);
    }

    #[test]
    fn root_changes_with_any_leaf() {
        let hs = hashes(5);
        let root = compute_root(&hs);

        let mut mutated = hs.clone();
        mutated[2] = format!("{:064x}", 999);
        assert_ne!(compute_root(&mutated), root);
    }

    #[test]
    fn path_folds_to_root() {
        let hs = hashes(7);
        let root = compute_root(&hs);
        for (i, h) in hs.iter().enumerate() {
            let path = compute_path(&hs, i).expect("path");
            let folded = fold_path(&leaf_hash(h), &path).expect("fold");
            assert_eq!(folded, root, "leaf {i} must fold to the root");
        }
    }

    #[test]
    fn altered_sibling_breaks_fold() {
        let hs = hashes(4);
        let root = compute_root(&hs);
        let mut path = compute_path(&hs, 1).expect("path");
        path[0].hash = format!("{:064x}", 0xdead_beefu64);

        let folded = fold_path(&leaf_hash(&hs[1]), &path).expect("fold");
        assert_ne!(folded, root);
    }

    #[test]
    fn out_of_range_index_has_no_path() {
        let hs = hashes(3);
        assert!(compute_path(&hs, 3).is_none());
    }

    #[test]
    fn leaf_and_node_domains_differ() {
        // A leaf over 64 hex chars must not collide with a node over the
        // same bytes.
        let h = format!("{:064x}", 1);
        let leaf = leaf_hash(&h);
        let pad = pad_leaf();
        assert_ne!(leaf, pad);
        assert_ne!(node_hash(&leaf, &pad), node_hash(&pad, &leaf));
    }
}
