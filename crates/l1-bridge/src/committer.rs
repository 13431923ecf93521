//! State Commitment Chain - commits L2 batches to L1
//!
//! Mirrors the StateCommitmentChain contract: batches are appended with their
//! state root and transaction root, read back by index or batch id, and
//! finalized once their challenge window has passed.

use crate::L1Error;
use async_trait::async_trait;
use l1_integration::{Address, BatchId, BatchReceipt, CommittedBatch, H256};
use std::time::Duration;

/// Arguments of `appendStateBatch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    /// Base64 gzip calldata
    pub calldata: String,
    pub state_root: H256,
    pub transaction_root: H256,
    pub proposer: Address,
    pub batch_id: BatchId,
}

/// Call surface of the StateCommitmentChain contract
///
/// Calls are blocking from the caller's point of view and are never retried
/// internally; retry policy belongs to the caller.
#[async_trait]
pub trait StateCommitmentChain: Send + Sync {
    /// Append a batch, emits `StateBatchAppended`
    async fn append_state_batch(&self, submission: &BatchSubmission) -> Result<BatchReceipt, L1Error>;

    /// Get a batch by its position
    async fn get_batch(&self, index: u64) -> Result<CommittedBatch, L1Error>;

    /// Get a batch by its random id
    async fn get_batch_by_batch_id(&self, batch_id: &BatchId) -> Result<CommittedBatch, L1Error>;

    /// State root the batch claims to start from
    ///
    /// This is the root of the closest preceding valid batch, or the zero
    /// digest for the first one.
    async fn get_previous_state_root(&self, batch_id: &BatchId) -> Result<H256, L1Error>;

    /// Number of appended batches (valid or not)
    async fn get_batch_count(&self) -> Result<u64, L1Error>;

    /// Index of the most recent batch still marked valid
    async fn get_latest_valid_batch(&self) -> Result<Option<u64>, L1Error>;

    /// Finalize a batch, emits `StateBatchFinalized`
    ///
    /// Reverts while the batch is younger than the challenge period.
    async fn finalize_batch(&self, batch_id: &BatchId) -> Result<(), L1Error>;

    /// Window after appending during which a batch can be challenged
    async fn set_challenge_period(&self, period: Duration) -> Result<(), L1Error>;

    async fn challenge_period(&self) -> Result<Duration, L1Error>;
}
