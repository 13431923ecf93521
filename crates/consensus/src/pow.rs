//! Proposer race - proof-of-work over the pending block
//!
//! Every candidate searches nonces 0, 1, 2, ... on its own blocking task until
//! its hash has `difficulty` leading zero hex digits. All searches run to
//! completion; the candidate that needed the smallest nonce wins, ties going
//! to the earlier candidate. No timeout is applied here, callers that accept
//! untrusted difficulty must bound the race themselves.

use crate::error::ConsensusError;
use futures::future::join_all;
use l1_integration::{address_hex, digest_hex, Address, H256, ZERO_DIGEST};
use l2_runtime::Block;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Fixed block fields every candidate hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningJob {
    pub timestamp: i64,
    pub previous_block_hash: H256,
    /// JSON of the block's transaction summaries
    pub transactions: String,
    pub state_root: H256,
    pub batch_data: String,
    pub difficulty: usize,
}

/// A candidate's winning search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningResult {
    pub proposer: Address,
    pub nonce: u64,
    /// 0x-prefixed sha256 hex
    pub hash: String,
}

impl MiningJob {
    /// Job over an unsealed block
    pub fn from_block(block: &Block, difficulty: usize) -> Result<Self, ConsensusError> {
        let transactions = serde_json::to_string(&block.summaries())
            .map_err(|e| ConsensusError::Serialization(e.to_string()))?;

        Ok(Self {
            timestamp: block.timestamp,
            previous_block_hash: block.previous_block_hash,
            transactions,
            state_root: block.state_root.unwrap_or(ZERO_DIGEST),
            batch_data: block.batch_data.clone(),
            difficulty,
        })
    }

    /// sha256 over the utf8 concatenation of the job fields, nonce and proposer
    pub fn hash_for(&self, proposer: &Address, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_string().as_bytes());
        hasher.update(digest_hex(&self.previous_block_hash).as_bytes());
        hasher.update(self.transactions.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(address_hex(proposer).as_bytes());
        hasher.update(digest_hex(&self.state_root).as_bytes());
        hasher.update(self.batch_data.as_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    /// Whether a hash clears the difficulty, ignoring its two-character prefix
    pub fn meets_difficulty(&self, hash: &str) -> bool {
        hash.get(2..).is_some_and(|digits| {
            digits.len() >= self.difficulty
                && digits.bytes().take(self.difficulty).all(|b| b == b'0')
        })
    }

    /// Search nonces from zero for one proposer
    pub fn mine(&self, proposer: Address) -> MiningResult {
        let mut nonce = 0u64;
        loop {
            let hash = self.hash_for(&proposer, nonce);
            if self.meets_difficulty(&hash) {
                return MiningResult {
                    proposer,
                    nonce,
                    hash,
                };
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Re-check a claimed result
    pub fn is_valid(&self, result: &MiningResult) -> bool {
        let hash = self.hash_for(&result.proposer, result.nonce);
        hash == result.hash && self.meets_difficulty(&hash)
    }
}

/// Concurrent proposer selection
pub struct ProposerRace;

impl ProposerRace {
    /// Run one search per candidate and pick the smallest nonce
    pub async fn run(job: MiningJob, candidates: &[Address]) -> Result<MiningResult, ConsensusError> {
        if candidates.is_empty() {
            return Err(ConsensusError::NoCandidates);
        }

        let job = Arc::new(job);
        let searches = candidates.iter().map(|proposer| {
            let job = job.clone();
            let proposer = *proposer;
            tokio::task::spawn_blocking(move || job.mine(proposer))
        });

        let mut results = Vec::with_capacity(candidates.len());
        for joined in join_all(searches).await {
            let result = joined.map_err(|e| ConsensusError::MiningAborted(e.to_string()))?;
            tracing::debug!(
                "Proposer {} found nonce {} ({})",
                address_hex(&result.proposer),
                result.nonce,
                result.hash
            );
            results.push(result);
        }

        // min_by_key keeps the first of equal minima
        results
            .into_iter()
            .min_by_key(|result| result.nonce)
            .ok_or(ConsensusError::NoCandidates)
    }
}
