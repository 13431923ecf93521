//! Consensus errors

use crate::types::BatchPhase;
use l1_bridge::L1Error;
use l2_runtime::{BlockError, CodecError, LedgerError, StoreError, SubmitError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error("L1 call failed: {0}")]
    L1(#[from] L1Error),

    #[error("Transaction rejected: {0}")]
    Rejected(#[from] SubmitError),

    #[error("Batch submission failed: {0}")]
    SubmissionFailure(L1Error),

    #[error("No proposer candidates and no sequencer configured")]
    NoCandidates,

    #[error("Proposer search aborted: {0}")]
    MiningAborted(String),

    #[error("Illegal phase change for batch {batch_id}: {from:?} -> {to:?}")]
    InvalidPhaseTransition {
        batch_id: String,
        from: BatchPhase,
        to: BatchPhase,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}
