//! Merkle tree over witness leaves.
//!
//! One tree per step: the four contract witnesses in fixed order,
//! then the previous step's root as a final chain-linkage leaf. The
//! tree is built bottom-up, duplicating the last node of any
//! odd-length level, so an auditor holding the stored artifacts can
//! recompute the root with no out-of-band information.

use crate::{hash_pair, Hash32};

/// A Merkle tree built from witness leaf hashes.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaves: Vec<Hash32>,
    root: Hash32,
}

impl MerkleTree {
    /// Build a tree from leaf hashes.
    ///
    /// An empty leaf list yields the all-zero root; a single leaf is
    /// its own root.
    pub fn build(leaves: Vec<Hash32>) -> Self {
        let root = root_of(&leaves);
        Self { leaves, root }
    }

    pub fn root(&self) -> Hash32 {
        self.root
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Compute the root without retaining the tree.
pub fn root_of(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32::ZERO;
    }
    let mut level: Vec<Hash32> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            // Duplicate the trailing node rather than padding to a
            // power of two; levels stay as short as possible.
            let last = level[level.len() - 1];
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(hash_pair(&pair[0], &pair[1]));
        }
        level = next;
    }
    level[0]
}
