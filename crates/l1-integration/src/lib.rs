//! Shared types for L1/L2 integration
//!
//! This crate contains the type definitions that mirror the L1 contracts
//! (StateCommitmentChain, BondManager, FraudVerifier) so that both the
//! rollup core and the bridge speak the same language.

pub use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};

/// 20-byte account address (Ethereum style)
pub type Address = H160;

/// Random 32-byte identifier minted per submitted batch
pub type BatchId = H256;

/// Digest used as the "no commitment" marker on L1 (matches `HashZero`)
pub const ZERO_DIGEST: H256 = H256([0u8; 32]);

/// Full 0x-prefixed lowercase hex of a digest.
///
/// `H256`'s `Display` impl abbreviates the middle bytes, which is unusable
/// for storage keys.
pub fn digest_hex(digest: &H256) -> String {
    format!("0x{}", hex::encode(digest.as_bytes()))
}

/// Full 0x-prefixed lowercase hex of an address.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Batch record as stored by the StateCommitmentChain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedBatch {
    /// Position in the L1 batch list
    pub batch_index: u64,
    /// Base64 gzip calldata (encoded transaction list)
    pub calldata: String,
    pub state_root: H256,
    pub transaction_root: H256,
    pub proposer: Address,
    pub batch_id: BatchId,
    /// Cleared when a challenge against the batch is upheld
    pub valid: bool,
    pub finalized: bool,
}

/// Receipt returned by `appendStateBatch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub batch_index: u64,
    pub batch_id: BatchId,
}

/// Fraud-verifier challenge record (matches FraudVerifier.challenges)
///
/// Created on `initiateChallenge`, mutated only by resolution,
/// terminal once `resolved` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub batch_id: BatchId,
    pub challenger: Address,
    pub disputed_tx_hash: H256,
    /// Merkle path submitted with the challenge
    pub proof: Vec<H256>,
    pub resolved: bool,
    pub success: bool,
}

/// Events emitted by the L1 contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum L1Event {
    /// StateCommitmentChain accepted a batch
    StateBatchAppended {
        batch_index: u64,
        calldata: String,
        state_root: H256,
        proposer: Address,
        batch_id: BatchId,
    },

    /// Challenge window elapsed, batch is final
    StateBatchFinalized { batch_index: u64, batch_id: BatchId },

    /// FraudVerifier resolved a challenge.
    ///
    /// `success = false` means the original batch was fraudulent.
    ChallengeResolved {
        batch_id: BatchId,
        success: bool,
        proposer: Address,
    },

    /// A batch was marked invalid because of the given transaction
    BatchInvalidated { batch_index: u64, tx_hash: H256 },
}

impl L1Event {
    /// Batch id the event refers to, when the event carries one
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            L1Event::StateBatchAppended { batch_id, .. }
            | L1Event::StateBatchFinalized { batch_id, .. }
            | L1Event::ChallengeResolved { batch_id, .. } => Some(*batch_id),
            L1Event::BatchInvalidated { .. } => None,
        }
    }
}
