//! Core types for batch commitment and verification

use l1_integration::{Address, H256, U256};
use l2_runtime::{DEFAULT_CHAIN_ID, MAX_TXS_PER_BATCH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default proof-of-work difficulty (leading zero hex digits)
pub const DEFAULT_DIFFICULTY: usize = 2;

/// What the pipeline does with a batch the L1 refused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionFailurePolicy {
    /// Log and abort. Ledger state, snapshot and block stay advanced and the
    /// batch's transactions are not retried.
    #[default]
    Drop,
    /// Undo the batch locally and put its transactions back in the pool
    Rebuffer,
}

/// Configuration for the batch pipeline and fraud-proof controller
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Leading zero hex digits required of a proposer hash
    pub difficulty: usize,
    /// Proposer used when a batch is processed without candidates
    pub sequencer: Option<Address>,
    /// Bond escrowed per challenge
    pub challenge_bond: U256,
    pub failure_policy: SubmissionFailurePolicy,
    pub max_txs_per_batch: usize,
    pub chain_id: u64,
    /// Window set on the L1 during which batches stay open to challenge
    pub challenge_period: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            sequencer: None,
            // 1 ether
            challenge_bond: U256::exp10(18),
            failure_policy: SubmissionFailurePolicy::default(),
            max_txs_per_batch: MAX_TXS_PER_BATCH,
            chain_id: DEFAULT_CHAIN_ID,
            challenge_period: Duration::ZERO,
        }
    }
}

/// Lifecycle of a committed batch as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    Submitted,
    Verified,
    Challenged,
    /// `valid = false` means the batch was proven fraudulent
    Resolved { valid: bool },
    Finalized,
}

impl BatchPhase {
    /// Whether `self -> next` is a legal move
    pub fn can_transition_to(&self, next: BatchPhase) -> bool {
        use BatchPhase::*;
        matches!(
            (self, next),
            (Submitted, Verified)
                | (Submitted, Challenged)
                | (Submitted, Resolved { .. })
                | (Verified, Resolved { .. })
                | (Challenged, Resolved { .. })
                | (Verified, Finalized)
                | (Resolved { valid: true }, Finalized)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchPhase::Finalized | BatchPhase::Resolved { valid: false })
    }
}

/// Result of re-executing a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Valid,
    /// Divergence at `index`; a challenge was opened with `proof`
    Challenged {
        index: usize,
        tx_hash: H256,
        proof: Vec<H256>,
    },
}

/// Counters for the pipeline and the controller
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsensusStats {
    pub batches_submitted: u64,
    pub transactions_committed: u64,
    pub transactions_dropped: u64,
    pub submission_failures: u64,
    pub batches_verified: u64,
    pub challenges_raised: u64,
    pub invalidations_handled: u64,
    pub batches_finalized: u64,
    pub last_batch_index: Option<u64>,
}
