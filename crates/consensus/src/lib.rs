//! L2 Consensus - Batch commitment and fraud proofs
//!
//! Architecture:
//! - The leader drains pending transactions into batches, races candidate
//!   proposers over the block hash and commits each batch to L1
//! - Validators re-execute committed batches and challenge the first
//!   divergent transaction with a Merkle proof
//! - A resolved challenge reverts the ledger to the latest valid snapshot and
//!   recommits the surviving transactions

pub mod error;
pub mod inbox;
pub mod leader;
pub mod pow;
pub mod types;
pub mod validator;

pub use error::ConsensusError;
pub use inbox::EventInbox;
pub use leader::{transaction_root, LeaderNode, LeaderNodeBuilder};
pub use pow::{MiningJob, MiningResult, ProposerRace};
pub use types::*;
pub use validator::{ValidatorNode, ValidatorNodeBuilder};

#[cfg(test)]
mod tests;
