//! Bond escrow and fraud verifier surfaces

use crate::L1Error;
use async_trait::async_trait;
use l1_integration::{Address, BatchId, Challenge, H256, U256};

/// Call surface of the BondManager contract
///
/// Deposits and withdrawals act on behalf of the connected operator.
#[async_trait]
pub trait BondManager: Send + Sync {
    /// Escrow `amount` for the caller
    async fn deposit(&self, amount: U256) -> Result<(), L1Error>;

    /// Release `amount` of the caller's bond
    async fn withdraw(&self, amount: U256) -> Result<(), L1Error>;

    /// Bond currently escrowed for `address`
    async fn bonds(&self, address: &Address) -> Result<U256, L1Error>;
}

/// Call surface of the FraudVerifier contract
#[async_trait]
pub trait FraudVerifier: Send + Sync {
    /// Open a challenge against a batch.
    ///
    /// `proof` is the Merkle path of `tx_hash` within the batch's transaction tree.
    async fn initiate_challenge(
        &self,
        batch_id: &BatchId,
        tx_hash: H256,
        proof: Vec<H256>,
    ) -> Result<(), L1Error>;

    /// Challenge record for a batch, if one was opened
    async fn challenges(&self, batch_id: &BatchId) -> Result<Option<Challenge>, L1Error>;
}
