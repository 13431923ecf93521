//! Binary Merkle trees over keccak256
//!
//! Nodes are paired left to right. An unpaired trailing node is carried up
//! to the next level unchanged (never duplicated), which fixes both the root
//! value and the shape of inclusion proofs.

use l1_integration::H256;
use sha3::{Digest, Keccak256};

/// keccak256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// Parent of two nodes: keccak256(left ∥ right)
pub fn hash_pair(left: &H256, right: &H256) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    H256::from_slice(&hasher.finalize())
}

/// All levels of a Merkle tree, leaves first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<H256>>,
}

impl MerkleTree {
    /// Build the tree bottom-up.
    ///
    /// No leaves yields a single empty placeholder level whose root is `None`.
    pub fn build(leaves: Vec<H256>) -> Self {
        if leaves.is_empty() {
            return Self {
                levels: vec![Vec::new()],
            };
        }

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<H256> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [carried] => *carried,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root digest, `None` when the tree has no leaves ("no commitment")
    pub fn root(&self) -> Option<H256> {
        self.levels.last().and_then(|top| top.first()).copied()
    }

    /// Levels, leaves first
    pub fn levels(&self) -> &[Vec<H256>] {
        &self.levels
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Sibling path for the leaf at `index`, bottom-up.
    ///
    /// Levels where the node is carried up (no sibling) contribute nothing.
    pub fn proof(&self, index: usize) -> Vec<H256> {
        let mut proof = Vec::new();
        let mut current = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = current ^ 1;
            if let Some(node) = level.get(sibling) {
                proof.push(*node);
            }
            current /= 2;
        }

        proof
    }
}

/// Re-derive the root from a leaf and its proof.
///
/// The leaf count is needed to know at which levels the node was carried up
/// rather than paired.
pub fn verify_proof(leaf: H256, index: usize, proof: &[H256], leaf_count: usize, root: H256) -> bool {
    if index >= leaf_count {
        return false;
    }

    let mut node = leaf;
    let mut current = index;
    let mut width = leaf_count;
    let mut siblings = proof.iter();

    while width > 1 {
        let sibling = current ^ 1;
        if sibling < width {
            let Some(other) = siblings.next() else {
                return false;
            };
            node = if current % 2 == 0 {
                hash_pair(&node, other)
            } else {
                hash_pair(other, &node)
            };
        }
        current /= 2;
        width = width.div_ceil(2);
    }

    siblings.next().is_none() && node == root
}
