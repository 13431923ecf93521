//! L1 Bridge - Settlement and L1 state reading
//!
//! Handles communication with the L1 contracts:
//! - Appending state batches to the StateCommitmentChain and reading them back
//! - Escrowing challenge bonds with the BondManager
//! - Opening challenges on the FraudVerifier
//!
//! The contracts are consumed through async traits. `MemoryL1` implements all
//! of them in-process for local devnets and tests.

pub mod challenge;
pub mod committer;
pub mod error;
pub mod memory;

pub use challenge::{BondManager, FraudVerifier};
pub use committer::{BatchSubmission, StateCommitmentChain};
pub use error::L1Error;
pub use memory::MemoryL1;

/// Convenience bound for a handle implementing the whole L1 surface
pub trait L1Contracts: StateCommitmentChain + BondManager + FraudVerifier {}

impl<T: StateCommitmentChain + BondManager + FraudVerifier> L1Contracts for T {}
