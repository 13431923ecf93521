//! Leader node - drains pending transactions into committed batches
//!
//! One `process_batch` call:
//! 1. applies the pending transactions to the ledger in arrival order
//! 2. computes the state root and the transaction root
//! 3. encodes the transactions into calldata
//! 4. builds the next block and runs the proposer race over it
//! 5. snapshots the ledger under a fresh batch id, then advances the head
//! 6. seals and appends the block
//! 7. submits the batch to L1

use crate::error::ConsensusError;
use crate::pow::{MiningJob, ProposerRace};
use crate::types::{ConsensusConfig, ConsensusStats, SubmissionFailurePolicy};
use l1_bridge::{BatchSubmission, StateCommitmentChain};
use l1_integration::{digest_hex, Address, BatchId, H256, U256, ZERO_DIGEST};
use l2_runtime::{
    encode_batch, keccak256, AccountLedger, AccountState, Block, BlockChain, LedgerError,
    MerkleTree, Signature, SignedTransaction, SnapshotRecord, TransactionPool, TransactionSender,
    GENESIS_KEY,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Fresh random batch id
fn new_batch_id() -> BatchId {
    let seed: [u8; 32] = rand::random();
    keccak256(&seed)
}

/// Merkle root over the transactions' leaf hashes
pub fn transaction_root(txs: &[SignedTransaction]) -> Option<H256> {
    MerkleTree::build(txs.iter().map(SignedTransaction::leaf_hash).collect()).root()
}

/// Leader node that builds and submits batches
pub struct LeaderNode {
    /// Shared with the fraud-proof controller; holding the lock is what makes
    /// batch construction and verification mutually exclusive
    ledger: Arc<tokio::sync::Mutex<AccountLedger>>,
    l1: Arc<dyn StateCommitmentChain>,
    pool: Mutex<TransactionPool>,
    sender: TransactionSender,
    chain: RwLock<BlockChain>,
    stats: RwLock<ConsensusStats>,
    config: ConsensusConfig,
}

impl LeaderNode {
    /// Create a new leader node
    pub fn new(ledger: AccountLedger, l1: Arc<dyn StateCommitmentChain>, config: ConsensusConfig) -> Self {
        let pool = TransactionPool::default();
        let sender = pool.sender();
        Self {
            ledger: Arc::new(tokio::sync::Mutex::new(ledger)),
            l1,
            pool: Mutex::new(pool),
            sender,
            chain: RwLock::new(BlockChain::new()),
            stats: RwLock::new(ConsensusStats::default()),
            config,
        }
    }

    /// Shared ledger handle
    pub fn ledger(&self) -> Arc<tokio::sync::Mutex<AccountLedger>> {
        self.ledger.clone()
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Get a sender for submitting transactions
    pub fn transaction_sender(&self) -> TransactionSender {
        self.sender.clone()
    }

    /// Verify and buffer a signed transaction
    pub fn submit(&self, signed: SignedTransaction, signature: &Signature) -> Result<H256, ConsensusError> {
        let hash = signed.hash();
        self.sender.submit(signed, signature)?;
        Ok(hash)
    }

    /// Put transactions back at the front of the pending buffer
    pub fn requeue_front(&self, txs: Vec<SignedTransaction>) {
        if !txs.is_empty() {
            tracing::info!("Re-buffering {} transactions", txs.len());
        }
        self.pool.lock().requeue_front(txs);
    }

    pub fn pending_count(&self) -> usize {
        self.pool.lock().len()
    }

    /// Credit an account outside the transaction path
    pub async fn deposit(&self, address: Address, amount: U256) -> Result<(), ConsensusError> {
        self.ledger.lock().await.deposit(address, amount)?;
        Ok(())
    }

    /// Build, snapshot and submit one batch.
    ///
    /// With no candidates the configured sequencer proposes.
    pub async fn process_batch(&self, candidates: &[Address]) -> Result<BatchId, ConsensusError> {
        let mut ledger = self.ledger.lock().await;
        self.process_batch_locked(&mut ledger, candidates).await
    }

    /// `process_batch` for a caller already holding the ledger lock
    pub async fn process_batch_locked(
        &self,
        ledger: &mut AccountLedger,
        candidates: &[Address],
    ) -> Result<BatchId, ConsensusError> {
        let candidates = match (candidates.is_empty(), self.config.sequencer) {
            (false, _) => candidates.to_vec(),
            (true, Some(sequencer)) => vec![sequencer],
            (true, None) => return Err(ConsensusError::NoCandidates),
        };

        let store = ledger.store().clone();

        // A broken link at the head halts the pipeline
        store.verify_head()?;

        let previous_state = ledger.state().clone();
        if !store.has_genesis()? {
            store.write_genesis(&SnapshotRecord::capture(&previous_state, 0, None))?;
            store.set_head(GENESIS_KEY)?;
        }
        let previous_head = store.head()?;

        let pending = self.pool.lock().drain(self.config.max_txs_per_batch);
        let mut applied = Vec::with_capacity(pending.len());
        for (position, tx) in pending.iter().enumerate() {
            match ledger.apply_transaction(tx) {
                Ok(_) => applied.push(tx.clone()),
                Err(LedgerError::Store(e)) => {
                    ledger.set_state(previous_state);
                    self.pool.lock().requeue_front(pending.to_vec());
                    tracing::error!("Store failure at tx {} of batch, batch abandoned: {}", position, e);
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!("Dropping tx {}: {}", digest_hex(&tx.hash()), e);
                    self.stats.write().transactions_dropped += 1;
                }
            }
        }

        let built = self
            .build_and_snapshot(ledger, &applied, &candidates, previous_head.clone())
            .await;
        let (batch_id, submission) = match built {
            Ok(built) => built,
            Err(e) => {
                ledger.set_state(previous_state);
                if let Some(head) = previous_head.as_deref() {
                    store.set_head(head)?;
                }
                self.pool.lock().requeue_front(applied);
                return Err(e);
            }
        };

        match self.l1.append_state_batch(&submission).await {
            Ok(receipt) => {
                let mut stats = self.stats.write();
                stats.batches_submitted += 1;
                stats.transactions_committed += applied.len() as u64;
                stats.last_batch_index = Some(receipt.batch_index);

                tracing::info!(
                    "Batch {} committed at index {}: {} txs, state root {}, proposer {:?}",
                    digest_hex(&batch_id),
                    receipt.batch_index,
                    applied.len(),
                    digest_hex(&submission.state_root),
                    submission.proposer
                );
                Ok(batch_id)
            }
            Err(e) => {
                tracing::error!("Submission of batch {} failed: {}", digest_hex(&batch_id), e);
                self.stats.write().submission_failures += 1;

                if self.config.failure_policy == SubmissionFailurePolicy::Rebuffer {
                    ledger.set_state(previous_state);
                    if let Some(head) = previous_head.as_deref() {
                        store.set_head(head)?;
                    }
                    self.chain.write().pop();
                    self.pool.lock().requeue_front(applied);
                }
                Err(ConsensusError::SubmissionFailure(e))
            }
        }
    }

    /// Steps 2-6: roots, calldata, proposer race, snapshot, block
    async fn build_and_snapshot(
        &self,
        ledger: &AccountLedger,
        applied: &[SignedTransaction],
        candidates: &[Address],
        previous_head: Option<String>,
    ) -> Result<(BatchId, BatchSubmission), ConsensusError> {
        let state_root = ledger.compute_state_root();
        let transaction_root = transaction_root(applied);
        let calldata = encode_batch(applied)?;

        let parent = self.chain.read().latest().clone();
        let mut block = Block::child_of(
            &parent,
            chrono::Utc::now().timestamp_millis(),
            applied.to_vec(),
            state_root,
            calldata.clone(),
        );

        let job = MiningJob::from_block(&block, self.config.difficulty)?;
        let winner = ProposerRace::run(job, candidates).await?;

        let batch_id = new_batch_id();
        let record = SnapshotRecord::capture(ledger.state(), block.block_number, previous_head);
        let key = ledger.store().write_snapshot(&batch_id, &record)?;
        ledger.store().set_head(&key)?;

        block.seal(winner.proposer, winner.nonce);
        self.chain.write().add_block(block)?;

        Ok((
            batch_id,
            BatchSubmission {
                calldata,
                state_root: state_root.unwrap_or(ZERO_DIGEST),
                transaction_root: transaction_root.unwrap_or(ZERO_DIGEST),
                proposer: winner.proposer,
                batch_id,
            },
        ))
    }

    /// Current state handle
    pub async fn state(&self) -> AccountState {
        self.ledger.lock().await.state().clone()
    }

    /// All blocks, genesis first
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().blocks().to_vec()
    }

    pub fn latest_block(&self) -> Block {
        self.chain.read().latest().clone()
    }

    /// Get current stats
    pub fn stats(&self) -> ConsensusStats {
        self.stats.read().clone()
    }
}

/// Builder for LeaderNode
pub struct LeaderNodeBuilder {
    ledger: AccountLedger,
    l1: Arc<dyn StateCommitmentChain>,
    config: ConsensusConfig,
}

impl LeaderNodeBuilder {
    pub fn new(ledger: AccountLedger, l1: Arc<dyn StateCommitmentChain>) -> Self {
        Self {
            ledger,
            l1,
            config: ConsensusConfig::default(),
        }
    }

    pub fn config(mut self, config: ConsensusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn difficulty(mut self, difficulty: usize) -> Self {
        self.config.difficulty = difficulty;
        self
    }

    pub fn sequencer(mut self, sequencer: Address) -> Self {
        self.config.sequencer = Some(sequencer);
        self
    }

    pub fn failure_policy(mut self, policy: SubmissionFailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn max_txs_per_batch(mut self, max: usize) -> Self {
        self.config.max_txs_per_batch = max;
        self
    }

    pub fn build(self) -> LeaderNode {
        LeaderNode::new(self.ledger, self.l1, self.config)
    }
}
