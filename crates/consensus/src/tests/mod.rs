//! End-to-end flows over the in-memory L1
//!
//! Covers:
//! - Batch commitment and state roots
//! - Fraud detection, challenge and invalidation replay
//! - Submission failure policies
//! - Batch phases and finalization

use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::SigningKey;
use l1_bridge::{BondManager, FraudVerifier, L1Error, MemoryL1, StateCommitmentChain};
use l1_integration::{Address, BatchId, H256, U256};
use l2_runtime::{
    address_of, decode_batch, sign, verify_proof, AccountLedger, MerkleTree, SledStore,
    SnapshotStore, UnsignedTransaction, DEFAULT_CHAIN_ID, GENESIS_KEY,
};

use crate::{
    BatchPhase, ConsensusError, EventInbox, LeaderNode, LeaderNodeBuilder, SubmissionFailurePolicy,
    ValidatorNode, ValidatorNodeBuilder, VerificationOutcome,
};

struct Harness {
    l1: MemoryL1,
    leader: Arc<LeaderNode>,
    validator: ValidatorNode,
    inbox: EventInbox,
    keys: Vec<SigningKey>,
    nonces: Vec<u64>,
}

fn key(byte: u8) -> SigningKey {
    SigningKey::from_slice(&[byte; 32]).unwrap()
}

fn sequencer() -> Address {
    Address::repeat_byte(0x5e)
}

impl Harness {
    async fn new(policy: SubmissionFailurePolicy) -> Self {
        Self::with_store(SnapshotStore::in_memory(), policy).await
    }

    /// Three accounts funded with 100 each before the first batch
    async fn with_store(store: SnapshotStore, policy: SubmissionFailurePolicy) -> Self {
        let l1 = MemoryL1::new(sequencer());
        let leader = Arc::new(
            LeaderNodeBuilder::new(AccountLedger::new(store), Arc::new(l1.clone()))
                .difficulty(1)
                .sequencer(sequencer())
                .failure_policy(policy)
                .build(),
        );
        let validator = ValidatorNodeBuilder::new(
            leader.clone(),
            Arc::new(l1.connect(Address::repeat_byte(0xca))),
        )
        .build();
        let inbox = EventInbox::new(l1.subscribe());

        let keys: Vec<SigningKey> = (1..=3u8).map(key).collect();
        for k in &keys {
            leader.deposit(address_of(k), U256::from(100)).await.unwrap();
        }

        Self {
            l1,
            leader,
            validator,
            inbox,
            keys,
            nonces: vec![0; 3],
        }
    }

    fn address(&self, index: usize) -> Address {
        address_of(&self.keys[index])
    }

    fn transfer(&mut self, from: usize, to: usize, amount: u64) -> H256 {
        let tx = UnsignedTransaction::transfer(
            self.address(to),
            U256::from(amount),
            U256::from(self.nonces[from]),
            DEFAULT_CHAIN_ID,
        );
        let (signed, signature) = sign(&tx, &self.keys[from]).unwrap();
        self.nonces[from] += 1;
        self.leader.submit(signed, &signature).unwrap()
    }

    async fn balance(&self, index: usize) -> U256 {
        self.leader.state().await.balance(&self.address(index))
    }

    async fn drain(&mut self) -> Vec<Option<VerificationOutcome>> {
        self.validator
            .drain_inbox(&mut self.inbox)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect()
    }

    async fn commit(&mut self) -> BatchId {
        let candidates: Vec<Address> = (0..3).map(|i| self.address(i)).collect();
        self.leader.process_batch(&candidates).await.unwrap()
    }
}

#[tokio::test]
async fn test_batch_commits_expected_state() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 10);
    h.transfer(1, 2, 5);
    let batch_id = h.commit().await;

    assert_eq!(h.balance(0).await, U256::from(90));
    assert_eq!(h.balance(1).await, U256::from(105));
    assert_eq!(h.balance(2).await, U256::from(105));

    // Independent root over the sorted account leaves
    let state = h.leader.state().await;
    let leaves: Vec<H256> = state
        .accounts()
        .iter()
        .map(|(address, account)| account.leaf_hash(address))
        .collect();
    let expected = MerkleTree::build(leaves).root().unwrap();

    let batch = h.l1.get_batch_by_batch_id(&batch_id).await.unwrap();
    assert_eq!(batch.state_root, expected);
    assert_eq!(decode_batch(&batch.calldata).unwrap().len(), 2);

    let block = h.leader.latest_block();
    assert_eq!(block.block_number, 1);
    assert_eq!(block.state_root, Some(expected));
    assert!((0..3).any(|i| block.proposer == h.address(i)));

    let store = h.leader.ledger().lock().await.store().clone();
    assert_eq!(store.verify_chain().unwrap(), 2);
    assert_eq!(store.load_batch(&batch_id).unwrap().previous_snapshot_key.as_deref(), Some(GENESIS_KEY));

    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![Some(VerificationOutcome::Valid)]);
    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Verified);
}

#[tokio::test]
async fn test_invalid_transactions_are_dropped() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 500);
    h.transfer(2, 0, 1);
    let batch_id = h.commit().await;

    let batch = h.l1.get_batch_by_batch_id(&batch_id).await.unwrap();
    assert_eq!(decode_batch(&batch.calldata).unwrap().len(), 1);
    assert_eq!(h.leader.stats().transactions_dropped, 1);
    assert_eq!(h.balance(0).await, U256::from(101));
}

#[tokio::test]
async fn test_empty_batch_uses_sequencer() {
    let h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.leader.process_batch(&[]).await.unwrap();

    let block = h.leader.latest_block();
    assert_eq!(block.proposer, sequencer());
    assert!(block.transactions.is_empty());
    assert_eq!(h.l1.get_batch_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_fraud_is_challenged_and_replayed() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 10);
    let disputed = h.transfer(1, 2, 5);
    h.transfer(0, 2, 1);
    let batch_id = h.commit().await;

    // Tamper with the recorded root of the second transaction
    let store = h.leader.ledger().lock().await.store().clone();
    store.record_state_root(&disputed, &H256::repeat_byte(0xee)).unwrap();

    let outcomes = h.drain().await;
    let Some(VerificationOutcome::Challenged { index, tx_hash, proof }) = outcomes[0].clone() else {
        panic!("expected a challenge, got {:?}", outcomes);
    };
    assert_eq!(index, 1);
    assert_eq!(tx_hash, disputed);
    assert!(!proof.is_empty());

    let batch = h.l1.get_batch_by_batch_id(&batch_id).await.unwrap();
    let txs = decode_batch(&batch.calldata).unwrap();
    assert!(verify_proof(txs[1].leaf_hash(), 1, &proof, txs.len(), batch.transaction_root));

    let challenge = h.l1.challenges(&batch_id).await.unwrap().unwrap();
    assert_eq!(challenge.disputed_tx_hash, disputed);
    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Challenged);
    assert_eq!(h.validator.stats().challenges_raised, 1);

    h.l1.resolve_challenge(&batch_id, false).unwrap();
    h.drain().await;

    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Resolved { valid: false });
    assert!(h.validator.invalid_transactions().contains(&disputed));
    assert_eq!(h.validator.stats().invalidations_handled, 1);

    // Bond returned to the challenger
    let bond = h.l1.bonds(&Address::repeat_byte(0xca)).await.unwrap();
    assert_eq!(bond, U256::zero());

    // Genesis plus the surviving transactions
    assert_eq!(h.balance(0).await, U256::from(89));
    assert_eq!(h.balance(1).await, U256::from(110));
    assert_eq!(h.balance(2).await, U256::from(101));

    assert_eq!(h.l1.get_batch_count().await.unwrap(), 2);
    let replayed = h.l1.get_batch(1).await.unwrap();
    assert!(replayed.valid);
    assert_eq!(decode_batch(&replayed.calldata).unwrap().len(), 2);
    assert_eq!(h.validator.phase(&replayed.batch_id), BatchPhase::Verified);

    let head = store.head().unwrap().unwrap();
    assert_eq!(
        store.load(&head).unwrap().previous_snapshot_key.as_deref(),
        Some(GENESIS_KEY)
    );
}

#[tokio::test]
async fn test_invalidation_keeps_earlier_valid_batch() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 10);
    let first = h.commit().await;
    h.drain().await;

    let disputed = h.transfer(1, 2, 5);
    h.transfer(2, 0, 3);
    let second = h.commit().await;
    let store = h.leader.ledger().lock().await.store().clone();
    store.record_state_root(&disputed, &H256::zero()).unwrap();

    h.drain().await;
    assert_eq!(h.validator.phase(&second), BatchPhase::Challenged);

    h.l1.resolve_challenge(&second, false).unwrap();
    h.drain().await;

    // First batch survives, second replays without the disputed transfer
    assert_eq!(h.validator.phase(&first), BatchPhase::Verified);
    assert_eq!(h.balance(0).await, U256::from(93));
    assert_eq!(h.balance(1).await, U256::from(110));
    assert_eq!(h.balance(2).await, U256::from(97));

    let head = store.head().unwrap().unwrap();
    assert_eq!(
        store.load(&head).unwrap().previous_snapshot_key,
        Some(l2_runtime::snapshot_key(&first))
    );
}

#[tokio::test]
async fn test_invalidation_recommits_ahead_of_waiting_batch() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    let first = h.transfer(0, 1, 10);
    let second = h.transfer(1, 2, 5);
    h.commit().await;
    h.drain().await;

    // Both the invalidation and a regular batch queue up on the ledger lock
    let ledger = h.leader.ledger();
    let guard = ledger.lock().await;
    let newer = h.transfer(2, 0, 1);

    let release = async move {
        tokio::task::yield_now().await;
        drop(guard);
    };
    let (recommitted, competing, ()) = tokio::join!(
        h.validator.handle_batch_invalidation(0),
        h.leader.process_batch(&[]),
        release
    );

    let batch = h.l1.get_batch_by_batch_id(&recommitted.unwrap()).await.unwrap();
    let hashes: Vec<H256> = decode_batch(&batch.calldata)
        .unwrap()
        .iter()
        .map(|tx| tx.hash())
        .collect();
    assert_eq!(hashes, vec![first, second, newer]);

    let after = h.l1.get_batch_by_batch_id(&competing.unwrap()).await.unwrap();
    assert_eq!(after.batch_index, batch.batch_index + 1);
    assert!(decode_batch(&after.calldata).unwrap().is_empty());

    assert_eq!(h.balance(0).await, U256::from(91));
    assert_eq!(h.balance(2).await, U256::from(104));
}

#[tokio::test]
async fn test_rejected_challenge_keeps_state() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    let disputed = h.transfer(0, 1, 10);
    let batch_id = h.commit().await;
    let store = h.leader.ledger().lock().await.store().clone();
    store.record_state_root(&disputed, &H256::repeat_byte(1)).unwrap();
    h.drain().await;

    h.l1.resolve_challenge(&batch_id, true).unwrap();
    h.drain().await;

    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Resolved { valid: true });
    assert_eq!(h.validator.stats().invalidations_handled, 0);
    assert_eq!(h.balance(0).await, U256::from(90));
    assert_eq!(h.l1.get_batch_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_submission_failure_drop_keeps_advanced_state() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 10);
    h.l1.fail_next_submission();

    let result = h.leader.process_batch(&[]).await;
    assert!(matches!(result, Err(ConsensusError::SubmissionFailure(_))));

    assert_eq!(h.balance(0).await, U256::from(90));
    assert_eq!(h.leader.pending_count(), 0);
    assert_eq!(h.leader.blocks().len(), 2);
    assert_eq!(h.leader.stats().submission_failures, 1);
    assert_eq!(h.l1.get_batch_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_submission_failure_rebuffer_restores() {
    let mut h = Harness::new(SubmissionFailurePolicy::Rebuffer).await;
    h.transfer(0, 1, 10);
    h.l1.fail_next_submission();

    assert!(h.leader.process_batch(&[]).await.is_err());
    assert_eq!(h.balance(0).await, U256::from(100));
    assert_eq!(h.leader.pending_count(), 1);
    assert_eq!(h.leader.blocks().len(), 1);

    let store = h.leader.ledger().lock().await.store().clone();
    assert_eq!(store.head().unwrap().as_deref(), Some(GENESIS_KEY));

    let batch_id = h.leader.process_batch(&[]).await.unwrap();
    assert_eq!(h.balance(0).await, U256::from(90));
    assert_eq!(
        store.load_batch(&batch_id).unwrap().previous_snapshot_key.as_deref(),
        Some(GENESIS_KEY)
    );
}

#[tokio::test]
async fn test_finalize_verified_batch() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 10);
    let batch_id = h.commit().await;
    h.drain().await;

    h.validator.finalize(&batch_id).await.unwrap();
    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Finalized);
    assert!(h.l1.get_batch_by_batch_id(&batch_id).await.unwrap().finalized);

    // The echoed event is not counted twice
    h.drain().await;
    assert_eq!(h.validator.stats().batches_finalized, 1);

    assert!(matches!(
        h.validator.finalize(&batch_id).await,
        Err(ConsensusError::InvalidPhaseTransition { .. })
    ));
}

#[tokio::test]
async fn test_finalize_refused_inside_challenge_period() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.l1.set_challenge_period(Duration::from_secs(600)).await.unwrap();
    h.transfer(0, 1, 10);
    let batch_id = h.commit().await;
    h.drain().await;

    assert!(matches!(
        h.validator.finalize(&batch_id).await,
        Err(ConsensusError::L1(L1Error::ChallengePeriodActive { .. }))
    ));
    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Verified);
    assert!(!h.l1.get_batch_by_batch_id(&batch_id).await.unwrap().finalized);

    h.l1.set_challenge_period(Duration::ZERO).await.unwrap();
    h.validator.finalize(&batch_id).await.unwrap();
    assert_eq!(h.validator.phase(&batch_id), BatchPhase::Finalized);
}

#[tokio::test]
async fn test_challenged_batch_cannot_finalize() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    let disputed = h.transfer(0, 1, 10);
    let batch_id = h.commit().await;
    let store = h.leader.ledger().lock().await.store().clone();
    store.record_state_root(&disputed, &H256::repeat_byte(2)).unwrap();
    h.drain().await;

    assert!(matches!(
        h.validator.finalize(&batch_id).await,
        Err(ConsensusError::InvalidPhaseTransition { .. })
    ));
}

#[tokio::test]
async fn test_broken_head_halts_pipeline() {
    let mut h = Harness::new(SubmissionFailurePolicy::Drop).await;
    h.transfer(0, 1, 10);
    h.commit().await;

    // Point the head at a snapshot that links to a missing one
    let store = h.leader.ledger().lock().await.store().clone();
    let dangling = l2_runtime::SnapshotRecord::capture(
        &h.leader.state().await,
        9,
        Some("snapshot:missing".to_string()),
    );
    let key = store.write_snapshot(&H256::repeat_byte(9), &dangling).unwrap();
    store.set_head(&key).unwrap();

    h.transfer(0, 1, 1);
    assert!(matches!(
        h.leader.process_batch(&[]).await,
        Err(ConsensusError::Store(_))
    ));
    assert_eq!(h.leader.pending_count(), 1);
}

#[tokio::test]
async fn test_sled_ledger_resumes_from_head() {
    let dir = tempfile::tempdir().unwrap();
    let expected = {
        let store = SnapshotStore::new(Arc::new(SledStore::open(dir.path()).unwrap()));
        let mut h = Harness::with_store(store, SubmissionFailurePolicy::Drop).await;
        h.transfer(0, 2, 40);
        h.commit().await;
        h.leader.state().await.state_root()
    };

    let store = SnapshotStore::new(Arc::new(SledStore::open(dir.path()).unwrap()));
    let ledger = AccountLedger::open(store).unwrap();
    assert_eq!(ledger.compute_state_root(), expected);
    assert_eq!(ledger.balance_of(&address_of(&key(3))), U256::from(140));
}
