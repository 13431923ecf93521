//! In-process L1 - StateCommitmentChain, BondManager and FraudVerifier in memory
//!
//! Used for local devnets and tests. Every handle returned by `connect` shares
//! the same contract state and event stream but calls as a different operator,
//! the way a contract instance is reconnected to another signer.

use crate::{BatchSubmission, BondManager, FraudVerifier, L1Error, StateCommitmentChain};
use async_trait::async_trait;
use l1_integration::{
    digest_hex, Address, BatchId, BatchReceipt, Challenge, CommittedBatch, L1Event, H256, U256,
    ZERO_DIGEST,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct L1State {
    batches: Vec<CommittedBatch>,
    /// Append time per batch, unix millis
    appended_at: Vec<i64>,
    challenge_period: Duration,
    index_by_id: HashMap<BatchId, usize>,
    bonds: HashMap<Address, U256>,
    challenges: HashMap<BatchId, Challenge>,
    fail_next_submission: bool,
}

impl L1State {
    fn batch_position(&self, batch_id: &BatchId) -> Result<usize, L1Error> {
        self.index_by_id
            .get(batch_id)
            .copied()
            .ok_or_else(|| L1Error::BatchNotFound(digest_hex(batch_id)))
    }
}

/// In-memory L1 contracts
#[derive(Clone)]
pub struct MemoryL1 {
    /// Caller identity for bond and challenge calls
    operator: Address,
    state: Arc<RwLock<L1State>>,
    events: broadcast::Sender<L1Event>,
}

impl MemoryL1 {
    /// Create fresh contracts, connected as `operator`
    pub fn new(operator: Address) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            operator,
            state: Arc::new(RwLock::new(L1State::default())),
            events,
        }
    }

    /// Handle on the same contracts acting as another operator
    pub fn connect(&self, operator: Address) -> Self {
        Self {
            operator,
            state: self.state.clone(),
            events: self.events.clone(),
        }
    }

    /// Operator this handle calls as
    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Subscribe to contract events
    pub fn subscribe(&self) -> broadcast::Receiver<L1Event> {
        self.events.subscribe()
    }

    /// Make the next `append_state_batch` revert (fault injection)
    pub fn fail_next_submission(&self) {
        self.state.write().fail_next_submission = true;
    }

    /// Snapshot of all appended batches
    pub fn batches(&self) -> Vec<CommittedBatch> {
        self.state.read().batches.clone()
    }

    /// Resolve an open challenge, acting as the fraud verifier.
    ///
    /// With `success = false` the batch was fraudulent: it is marked invalid,
    /// `BatchInvalidated` is emitted first and `ChallengeResolved` second.
    /// With `success = true` the challenger's bond is slashed.
    pub fn resolve_challenge(&self, batch_id: &BatchId, success: bool) -> Result<(), L1Error> {
        let mut events = Vec::with_capacity(2);
        {
            let mut state = self.state.write();
            let position = state.batch_position(batch_id)?;

            let challenge = state
                .challenges
                .get_mut(batch_id)
                .filter(|c| !c.resolved)
                .ok_or_else(|| L1Error::ChallengeNotFound(digest_hex(batch_id)))?;
            challenge.resolved = true;
            challenge.success = success;
            let challenger = challenge.challenger;
            let tx_hash = challenge.disputed_tx_hash;

            if success {
                state.bonds.insert(challenger, U256::zero());
            } else {
                state.batches[position].valid = false;
                events.push(L1Event::BatchInvalidated {
                    batch_index: position as u64,
                    tx_hash,
                });
            }

            events.push(L1Event::ChallengeResolved {
                batch_id: *batch_id,
                success,
                proposer: state.batches[position].proposer,
            });
        }

        tracing::info!(
            "Challenge on batch {} resolved (success = {})",
            digest_hex(batch_id),
            success
        );

        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }
}

#[async_trait]
impl StateCommitmentChain for MemoryL1 {
    async fn append_state_batch(&self, submission: &BatchSubmission) -> Result<BatchReceipt, L1Error> {
        let receipt = {
            let mut state = self.state.write();

            if std::mem::take(&mut state.fail_next_submission) {
                return Err(L1Error::Reverted("appendStateBatch: injected failure".to_string()));
            }
            if state.index_by_id.contains_key(&submission.batch_id) {
                return Err(L1Error::Reverted(format!(
                    "appendStateBatch: duplicate batch id {}",
                    digest_hex(&submission.batch_id)
                )));
            }

            let position = state.batches.len();
            state.batches.push(CommittedBatch {
                batch_index: position as u64,
                calldata: submission.calldata.clone(),
                state_root: submission.state_root,
                transaction_root: submission.transaction_root,
                proposer: submission.proposer,
                batch_id: submission.batch_id,
                valid: true,
                finalized: false,
            });
            state.appended_at.push(chrono::Utc::now().timestamp_millis());
            state.index_by_id.insert(submission.batch_id, position);

            BatchReceipt {
                batch_index: position as u64,
                batch_id: submission.batch_id,
            }
        };

        let _ = self.events.send(L1Event::StateBatchAppended {
            batch_index: receipt.batch_index,
            calldata: submission.calldata.clone(),
            state_root: submission.state_root,
            proposer: submission.proposer,
            batch_id: submission.batch_id,
        });

        Ok(receipt)
    }

    async fn get_batch(&self, index: u64) -> Result<CommittedBatch, L1Error> {
        self.state
            .read()
            .batches
            .get(index as usize)
            .cloned()
            .ok_or_else(|| L1Error::BatchNotFound(format!("index {}", index)))
    }

    async fn get_batch_by_batch_id(&self, batch_id: &BatchId) -> Result<CommittedBatch, L1Error> {
        let state = self.state.read();
        let position = state.batch_position(batch_id)?;
        Ok(state.batches[position].clone())
    }

    async fn get_previous_state_root(&self, batch_id: &BatchId) -> Result<H256, L1Error> {
        let state = self.state.read();
        let position = state.batch_position(batch_id)?;
        Ok(state.batches[..position]
            .iter()
            .rev()
            .find(|b| b.valid)
            .map(|b| b.state_root)
            .unwrap_or(ZERO_DIGEST))
    }

    async fn get_batch_count(&self) -> Result<u64, L1Error> {
        Ok(self.state.read().batches.len() as u64)
    }

    async fn get_latest_valid_batch(&self) -> Result<Option<u64>, L1Error> {
        Ok(self
            .state
            .read()
            .batches
            .iter()
            .rev()
            .find(|b| b.valid)
            .map(|b| b.batch_index))
    }

    async fn finalize_batch(&self, batch_id: &BatchId) -> Result<(), L1Error> {
        let batch_index = {
            let mut state = self.state.write();
            let position = state.batch_position(batch_id)?;

            if state
                .challenges
                .get(batch_id)
                .is_some_and(|c| !c.resolved)
            {
                return Err(L1Error::Reverted("finalizeBatch: challenge pending".to_string()));
            }

            let period = i64::try_from(state.challenge_period.as_millis()).unwrap_or(i64::MAX);
            let open_until = state.appended_at[position].saturating_add(period);
            let now = chrono::Utc::now().timestamp_millis();
            if now < open_until {
                return Err(L1Error::ChallengePeriodActive {
                    batch_id: digest_hex(batch_id),
                    remaining_ms: open_until - now,
                });
            }

            let batch = &mut state.batches[position];
            if !batch.valid {
                return Err(L1Error::Reverted("finalizeBatch: batch invalid".to_string()));
            }
            if batch.finalized {
                return Err(L1Error::Reverted("finalizeBatch: already finalized".to_string()));
            }
            batch.finalized = true;
            batch.batch_index
        };

        let _ = self.events.send(L1Event::StateBatchFinalized {
            batch_index,
            batch_id: *batch_id,
        });
        Ok(())
    }

    async fn set_challenge_period(&self, period: Duration) -> Result<(), L1Error> {
        self.state.write().challenge_period = period;
        tracing::info!("Challenge period set to {:?}", period);
        Ok(())
    }

    async fn challenge_period(&self) -> Result<Duration, L1Error> {
        Ok(self.state.read().challenge_period)
    }
}

#[async_trait]
impl BondManager for MemoryL1 {
    async fn deposit(&self, amount: U256) -> Result<(), L1Error> {
        let mut state = self.state.write();
        let bond = state.bonds.entry(self.operator).or_default();
        *bond = bond.saturating_add(amount);
        Ok(())
    }

    async fn withdraw(&self, amount: U256) -> Result<(), L1Error> {
        let mut state = self.state.write();
        let bond = state.bonds.entry(self.operator).or_default();
        if *bond < amount {
            return Err(L1Error::InsufficientBond {
                have: *bond,
                need: amount,
            });
        }
        *bond -= amount;
        Ok(())
    }

    async fn bonds(&self, address: &Address) -> Result<U256, L1Error> {
        Ok(self.state.read().bonds.get(address).copied().unwrap_or_default())
    }
}

#[async_trait]
impl FraudVerifier for MemoryL1 {
    async fn initiate_challenge(
        &self,
        batch_id: &BatchId,
        tx_hash: H256,
        proof: Vec<H256>,
    ) -> Result<(), L1Error> {
        let mut state = self.state.write();
        state.batch_position(batch_id)?;

        let bond = state.bonds.get(&self.operator).copied().unwrap_or_default();
        if bond.is_zero() {
            return Err(L1Error::InsufficientBond {
                have: bond,
                need: U256::one(),
            });
        }
        if state.challenges.get(batch_id).is_some_and(|c| !c.resolved) {
            return Err(L1Error::ChallengeExists(digest_hex(batch_id)));
        }

        state.challenges.insert(
            *batch_id,
            Challenge {
                batch_id: *batch_id,
                challenger: self.operator,
                disputed_tx_hash: tx_hash,
                proof,
                resolved: false,
                success: false,
            },
        );
        Ok(())
    }

    async fn challenges(&self, batch_id: &BatchId) -> Result<Option<Challenge>, L1Error> {
        Ok(self.state.read().challenges.get(batch_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(byte: u8) -> BatchSubmission {
        BatchSubmission {
            calldata: "H4sI".to_string(),
            state_root: H256::repeat_byte(byte),
            transaction_root: H256::repeat_byte(byte.wrapping_add(1)),
            proposer: Address::repeat_byte(0x11),
            batch_id: H256::repeat_byte(byte.wrapping_add(2)),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let l1 = MemoryL1::new(Address::repeat_byte(1));
        let mut events = l1.subscribe();

        let receipt = l1.append_state_batch(&submission(10)).await.unwrap();
        assert_eq!(receipt.batch_index, 0);

        let batch = l1.get_batch_by_batch_id(&receipt.batch_id).await.unwrap();
        assert_eq!(batch.state_root, H256::repeat_byte(10));
        assert!(batch.valid);
        assert_eq!(l1.get_batch_count().await.unwrap(), 1);

        match events.recv().await.unwrap() {
            L1Event::StateBatchAppended { batch_index, .. } => assert_eq!(batch_index, 0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_previous_state_root_skips_invalid_batches() {
        let l1 = MemoryL1::new(Address::repeat_byte(1));
        let first = l1.append_state_batch(&submission(10)).await.unwrap();
        let second = l1.append_state_batch(&submission(20)).await.unwrap();
        let third = l1.append_state_batch(&submission(30)).await.unwrap();

        assert_eq!(l1.get_previous_state_root(&first.batch_id).await.unwrap(), ZERO_DIGEST);
        assert_eq!(
            l1.get_previous_state_root(&third.batch_id).await.unwrap(),
            H256::repeat_byte(20)
        );

        l1.deposit(U256::from(5)).await.unwrap();
        l1.initiate_challenge(&second.batch_id, H256::repeat_byte(9), vec![])
            .await
            .unwrap();
        l1.resolve_challenge(&second.batch_id, false).unwrap();

        assert_eq!(
            l1.get_previous_state_root(&third.batch_id).await.unwrap(),
            H256::repeat_byte(10)
        );
        assert_eq!(l1.get_latest_valid_batch().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_challenge_requires_bond() {
        let l1 = MemoryL1::new(Address::repeat_byte(1));
        let receipt = l1.append_state_batch(&submission(10)).await.unwrap();

        let err = l1
            .initiate_challenge(&receipt.batch_id, H256::zero(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, L1Error::InsufficientBond { .. }));
    }

    #[tokio::test]
    async fn test_invalidation_emits_events_in_order() {
        let sequencer = MemoryL1::new(Address::repeat_byte(1));
        let challenger = sequencer.connect(Address::repeat_byte(2));
        let mut events = sequencer.subscribe();

        let receipt = sequencer.append_state_batch(&submission(10)).await.unwrap();
        challenger.deposit(U256::from(100)).await.unwrap();
        challenger
            .initiate_challenge(&receipt.batch_id, H256::repeat_byte(7), vec![H256::repeat_byte(8)])
            .await
            .unwrap();
        sequencer.resolve_challenge(&receipt.batch_id, false).unwrap();

        let _appended = events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            L1Event::BatchInvalidated {
                batch_index: 0,
                tx_hash: H256::repeat_byte(7)
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            L1Event::ChallengeResolved { success: false, .. }
        ));

        let challenge = sequencer.challenges(&receipt.batch_id).await.unwrap().unwrap();
        assert!(challenge.resolved);
        assert_eq!(challenge.challenger, Address::repeat_byte(2));
        assert!(sequencer.finalize_batch(&receipt.batch_id).await.is_err());
    }

    #[tokio::test]
    async fn test_finalize_waits_for_challenge_period() {
        let l1 = MemoryL1::new(Address::repeat_byte(1));
        l1.set_challenge_period(Duration::from_secs(3600)).await.unwrap();
        let receipt = l1.append_state_batch(&submission(10)).await.unwrap();

        let err = l1.finalize_batch(&receipt.batch_id).await.unwrap_err();
        assert!(matches!(err, L1Error::ChallengePeriodActive { remaining_ms, .. } if remaining_ms > 0));
        assert!(!l1.get_batch(0).await.unwrap().finalized);

        // The window is read at finalization time
        l1.set_challenge_period(Duration::ZERO).await.unwrap();
        assert_eq!(l1.challenge_period().await.unwrap(), Duration::ZERO);
        l1.finalize_batch(&receipt.batch_id).await.unwrap();
        assert!(l1.get_batch(0).await.unwrap().finalized);
    }

    #[tokio::test]
    async fn test_failed_submission_is_one_shot() {
        let l1 = MemoryL1::new(Address::repeat_byte(1));
        l1.fail_next_submission();

        assert!(l1.append_state_batch(&submission(10)).await.is_err());
        assert!(l1.append_state_batch(&submission(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_withdraw_more_than_bond_fails() {
        let l1 = MemoryL1::new(Address::repeat_byte(1));
        l1.deposit(U256::from(10)).await.unwrap();
        l1.withdraw(U256::from(4)).await.unwrap();
        assert_eq!(l1.bonds(&Address::repeat_byte(1)).await.unwrap(), U256::from(6));
        assert!(l1.withdraw(U256::from(7)).await.is_err());
    }
}
