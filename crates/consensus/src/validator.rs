//! Validator node - re-executes committed batches and challenges fraud
//!
//! Verification replays a batch on a fork of the state the batch claims to
//! start from, comparing the state root after every transaction with the one
//! the submitter recorded. The live ledger is never touched by verification.
//! The first divergence is turned into a challenge backed by a Merkle proof.
//!
//! L1 events arrive through an `EventInbox`. A resolved challenge that
//! confirmed fraud triggers invalidation handling: revert to the latest valid
//! snapshot, re-buffer every transaction that was not proven invalid and
//! recommit through the leader.

use crate::error::ConsensusError;
use crate::inbox::EventInbox;
use crate::leader::LeaderNode;
use crate::types::{BatchPhase, ConsensusStats, VerificationOutcome};
use l1_bridge::L1Contracts;
use l1_integration::{digest_hex, BatchId, L1Event, H256, U256, ZERO_DIGEST};
use l2_runtime::{decode_batch, verify_proof, MerkleTree, SignedTransaction, GENESIS_KEY};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Validator node that verifies committed batches
pub struct ValidatorNode {
    leader: Arc<LeaderNode>,
    l1: Arc<dyn L1Contracts>,
    /// Phase per batch this node has seen
    phases: RwLock<HashMap<BatchId, BatchPhase>>,
    /// Transactions proven invalid, never replayed
    invalid_txs: RwLock<HashSet<H256>>,
    /// Bond escrowed per open challenge
    bonds: RwLock<HashMap<BatchId, U256>>,
    stats: RwLock<ConsensusStats>,
    challenge_bond: U256,
}

impl ValidatorNode {
    /// Create a new validator node
    pub fn new(leader: Arc<LeaderNode>, l1: Arc<dyn L1Contracts>, challenge_bond: U256) -> Self {
        Self {
            leader,
            l1,
            phases: RwLock::new(HashMap::new()),
            invalid_txs: RwLock::new(HashSet::new()),
            bonds: RwLock::new(HashMap::new()),
            stats: RwLock::new(ConsensusStats::default()),
            challenge_bond,
        }
    }

    /// Phase of a batch, `Submitted` if never seen
    pub fn phase(&self, batch_id: &BatchId) -> BatchPhase {
        self.phases
            .read()
            .get(batch_id)
            .copied()
            .unwrap_or(BatchPhase::Submitted)
    }

    fn check_transition(&self, batch_id: &BatchId, next: BatchPhase) -> Result<(), ConsensusError> {
        let current = self.phase(batch_id);
        if current.can_transition_to(next) {
            Ok(())
        } else {
            Err(ConsensusError::InvalidPhaseTransition {
                batch_id: digest_hex(batch_id),
                from: current,
                to: next,
            })
        }
    }

    fn transition(&self, batch_id: &BatchId, next: BatchPhase) -> Result<(), ConsensusError> {
        self.check_transition(batch_id, next)?;
        self.phases.write().insert(*batch_id, next);
        tracing::debug!("Batch {} -> {:?}", digest_hex(batch_id), next);
        Ok(())
    }

    /// Transactions proven invalid so far
    pub fn invalid_transactions(&self) -> HashSet<H256> {
        self.invalid_txs.read().clone()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.stats.read().clone()
    }

    /// Re-execute a committed batch, challenging it on divergence
    pub async fn verify_batch(&self, batch_id: &BatchId) -> Result<VerificationOutcome, ConsensusError> {
        let batch = self.l1.get_batch_by_batch_id(batch_id).await?;
        let previous_root = self.l1.get_previous_state_root(batch_id).await?;
        let txs = decode_batch(&batch.calldata)?;

        let divergence = {
            let ledger = self.leader.ledger();
            let ledger = ledger.lock().await;
            let mut state = ledger.state_at_root(&previous_root)?;
            let mut divergence = None;

            for (index, tx) in txs.iter().enumerate() {
                let recorded = ledger.store().recorded_state_root(&tx.hash())?;
                let local = match state.apply(tx) {
                    Ok(next) => {
                        state = next;
                        state.state_root().unwrap_or(ZERO_DIGEST)
                    }
                    Err(e) => {
                        tracing::error!(
                            "Batch {} tx {} does not replay: {}",
                            digest_hex(batch_id),
                            index,
                            e
                        );
                        divergence = Some(index);
                        break;
                    }
                };

                if recorded != Some(local) {
                    tracing::error!(
                        "FRAUD DETECTED in batch {} at tx {}: local root {}, recorded {:?}",
                        digest_hex(batch_id),
                        index,
                        digest_hex(&local),
                        recorded.map(|r| digest_hex(&r))
                    );
                    divergence = Some(index);
                    break;
                }
            }

            let claimed = batch.state_root;
            let computed = state.state_root().unwrap_or(ZERO_DIGEST);
            if divergence.is_none() && computed != claimed {
                // An empty batch has no transaction to dispute
                if txs.is_empty() {
                    tracing::warn!(
                        "Empty batch {} claims root {}, replay gives {}",
                        digest_hex(batch_id),
                        digest_hex(&claimed),
                        digest_hex(&computed)
                    );
                } else {
                    tracing::error!(
                        "Batch {} claims root {}, replay gives {}",
                        digest_hex(batch_id),
                        digest_hex(&claimed),
                        digest_hex(&computed)
                    );
                    divergence = Some(txs.len() - 1);
                }
            }
            divergence
        };

        let Some(index) = divergence else {
            self.transition(batch_id, BatchPhase::Verified)?;
            self.stats.write().batches_verified += 1;
            tracing::info!("Batch {} verified ({} txs)", digest_hex(batch_id), txs.len());
            return Ok(VerificationOutcome::Valid);
        };

        let leaves: Vec<H256> = txs.iter().map(SignedTransaction::leaf_hash).collect();
        let tree = MerkleTree::build(leaves.clone());
        let proof = tree.proof(index);
        let root = tree.root().unwrap_or(ZERO_DIGEST);
        if !verify_proof(leaves[index], index, &proof, leaves.len(), root) {
            return Err(ConsensusError::Serialization(format!(
                "proof for tx {} does not reproduce transaction root",
                index
            )));
        }

        let tx_hash = txs[index].hash();
        self.challenge(batch_id, tx_hash, proof.clone()).await?;

        Ok(VerificationOutcome::Challenged {
            index,
            tx_hash,
            proof,
        })
    }

    /// Escrow the bond and open a challenge on L1
    pub async fn challenge(
        &self,
        batch_id: &BatchId,
        tx_hash: H256,
        proof: Vec<H256>,
    ) -> Result<(), ConsensusError> {
        self.check_transition(batch_id, BatchPhase::Challenged)?;

        self.l1.deposit(self.challenge_bond).await?;
        self.l1.initiate_challenge(batch_id, tx_hash, proof).await?;
        self.bonds.write().insert(*batch_id, self.challenge_bond);

        self.transition(batch_id, BatchPhase::Challenged)?;
        self.stats.write().challenges_raised += 1;

        tracing::warn!(
            "Challenged batch {} over tx {} (bond {})",
            digest_hex(batch_id),
            digest_hex(&tx_hash),
            self.challenge_bond
        );
        Ok(())
    }

    /// Finalize a batch this node verified
    pub async fn finalize(&self, batch_id: &BatchId) -> Result<(), ConsensusError> {
        self.check_transition(batch_id, BatchPhase::Finalized)?;
        self.l1.finalize_batch(batch_id).await?;
        self.transition(batch_id, BatchPhase::Finalized)?;
        self.stats.write().batches_finalized += 1;
        Ok(())
    }

    /// React to one L1 event
    pub async fn handle_event(&self, event: &L1Event) -> Result<(), ConsensusError> {
        match event {
            L1Event::StateBatchAppended {
                batch_index,
                batch_id,
                ..
            } => {
                tracing::debug!("Batch {} appended at index {}", digest_hex(batch_id), batch_index);
                self.phases
                    .write()
                    .entry(*batch_id)
                    .or_insert(BatchPhase::Submitted);
            }

            L1Event::BatchInvalidated {
                batch_index,
                tx_hash,
            } => {
                tracing::warn!(
                    "Batch {} invalidated by tx {}",
                    batch_index,
                    digest_hex(tx_hash)
                );
                self.invalid_txs.write().insert(*tx_hash);
            }

            L1Event::ChallengeResolved {
                batch_id, success, ..
            } => {
                self.transition(batch_id, BatchPhase::Resolved { valid: *success })?;
                self.settle_bond(batch_id, *success).await?;

                if !*success {
                    if let Some(challenge) = self.l1.challenges(batch_id).await? {
                        self.invalid_txs.write().insert(challenge.disputed_tx_hash);
                    }
                    let batch = self.l1.get_batch_by_batch_id(batch_id).await?;
                    self.handle_batch_invalidation(batch.batch_index).await?;
                }
            }

            L1Event::StateBatchFinalized { batch_id, .. } => {
                if self.phase(batch_id) != BatchPhase::Finalized {
                    self.transition(batch_id, BatchPhase::Finalized)?;
                    self.stats.write().batches_finalized += 1;
                }
            }
        }
        Ok(())
    }

    /// Withdraw our bond when the challenge was upheld, forget it otherwise
    async fn settle_bond(&self, batch_id: &BatchId, success: bool) -> Result<(), ConsensusError> {
        let Some(bond) = self.bonds.write().remove(batch_id) else {
            return Ok(());
        };

        if success {
            tracing::warn!("Challenge on {} rejected, bond {} forfeited", digest_hex(batch_id), bond);
        } else {
            self.l1.withdraw(bond).await?;
            tracing::info!("Challenge on {} upheld, bond {} withdrawn", digest_hex(batch_id), bond);
        }
        Ok(())
    }

    /// Revert to the latest valid batch before `invalid_index` and recommit
    /// every transaction from `invalid_index` onward that was not proven invalid
    pub async fn handle_batch_invalidation(&self, invalid_index: u64) -> Result<BatchId, ConsensusError> {
        let base = match self.l1.get_latest_valid_batch().await? {
            Some(index) if index < invalid_index => Some(index),
            _ => {
                let mut found = None;
                for index in (0..invalid_index).rev() {
                    if self.l1.get_batch(index).await?.valid {
                        found = Some(index);
                        break;
                    }
                }
                found
            }
        };

        let base_key = match base {
            Some(index) => l2_runtime::snapshot_key(&self.l1.get_batch(index).await?.batch_id),
            None => GENESIS_KEY.to_string(),
        };

        let invalid = self.invalid_transactions();
        let count = self.l1.get_batch_count().await?;
        let mut salvaged = Vec::new();
        for index in invalid_index..count {
            let batch = self.l1.get_batch(index).await?;
            salvaged.extend(
                decode_batch(&batch.calldata)?
                    .into_iter()
                    .filter(|tx| !invalid.contains(&tx.hash())),
            );
        }

        // Held through the recommit so no other batch lands on the reverted state first
        let ledger = self.leader.ledger();
        let mut ledger = ledger.lock().await;
        ledger.revert_to_snapshot(&base_key)?;
        ledger.store().set_head(&base_key)?;

        tracing::warn!(
            "Batch {} invalidated: reverted to {}, replaying {} txs",
            invalid_index,
            base_key,
            salvaged.len()
        );

        self.leader.requeue_front(salvaged);
        self.stats.write().invalidations_handled += 1;
        self.leader.process_batch_locked(&mut ledger, &[]).await
    }

    /// Handle an event and verify newly appended batches
    pub async fn process_event(&self, event: &L1Event) -> Result<Option<VerificationOutcome>, ConsensusError> {
        self.handle_event(event).await?;
        match event {
            L1Event::StateBatchAppended { batch_id, .. } => Ok(Some(self.verify_batch(batch_id).await?)),
            _ => Ok(None),
        }
    }

    /// Process every event already queued in the inbox
    pub async fn drain_inbox(&self, inbox: &mut EventInbox) -> Vec<Result<Option<VerificationOutcome>, ConsensusError>> {
        let mut results = Vec::new();
        while let Some(event) = inbox.try_next() {
            results.push(self.process_event(&event).await);
        }
        results
    }

    /// Run the validator loop until the L1 event stream closes
    pub async fn run(&self, mut inbox: EventInbox) {
        tracing::info!("Validator running, waiting for L1 events...");

        while let Some(event) = inbox.next().await {
            if let Err(e) = self.process_event(&event).await {
                tracing::error!("Failed to process {:?}: {}", event.batch_id(), e);
            }
        }

        tracing::warn!("L1 event stream closed");
    }
}

/// Builder for ValidatorNode
pub struct ValidatorNodeBuilder {
    leader: Arc<LeaderNode>,
    l1: Arc<dyn L1Contracts>,
    challenge_bond: U256,
}

impl ValidatorNodeBuilder {
    pub fn new(leader: Arc<LeaderNode>, l1: Arc<dyn L1Contracts>) -> Self {
        let challenge_bond = leader.config().challenge_bond;
        Self {
            leader,
            l1,
            challenge_bond,
        }
    }

    pub fn challenge_bond(mut self, bond: U256) -> Self {
        self.challenge_bond = bond;
        self
    }

    pub fn build(self) -> ValidatorNode {
        ValidatorNode::new(self.leader, self.l1, self.challenge_bond)
    }
}
