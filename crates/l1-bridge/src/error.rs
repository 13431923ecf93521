//! L1 call errors

use l1_integration::U256;
use thiserror::Error;

/// Errors surfaced by L1 contract calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum L1Error {
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Challenge already open for batch {0}")]
    ChallengeExists(String),

    #[error("No challenge for batch {0}")]
    ChallengeNotFound(String),

    #[error("Insufficient bond: have {have}, need {need}")]
    InsufficientBond { have: U256, need: U256 },

    #[error("Batch {batch_id} is still in its challenge period ({remaining_ms}ms left)")]
    ChallengePeriodActive { batch_id: String, remaining_ms: i64 },

    #[error("Call reverted: {0}")]
    Reverted(String),
}
