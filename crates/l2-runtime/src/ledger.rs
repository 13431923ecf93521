//! Account ledger - the live account state plus its persisted history
//!
//! The ledger owns exactly one current `AccountState` handle. Applying a
//! transaction swaps in a new handle only after its artifacts are stored,
//! and reverting swaps in a handle rebuilt from a snapshot.

use crate::account_store::AccountState;
use crate::error::{LedgerError, StoreError};
use crate::persistence::{SnapshotStore, GENESIS_KEY};
use crate::transaction::SignedTransaction;
use l1_integration::{digest_hex, Address, BatchId, H256, U256, ZERO_DIGEST};

pub struct AccountLedger {
    state: AccountState,
    store: SnapshotStore,
}

impl AccountLedger {
    /// Empty ledger over a snapshot store
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            state: AccountState::new(),
            store,
        }
    }

    /// Ledger resumed from the store's head snapshot, if any
    pub fn open(store: SnapshotStore) -> Result<Self, LedgerError> {
        let state = match store.head()? {
            Some(key) => {
                let record = store.load(&key)?;
                tracing::info!(
                    "Resumed ledger from {} (block {}, {} accounts)",
                    key,
                    record.block_number,
                    record.accounts.len()
                );
                record.to_state()
            }
            None => AccountState::new(),
        };
        Ok(Self { state, store })
    }

    /// Current state handle
    pub fn state(&self) -> &AccountState {
        &self.state
    }

    /// Swap in another state handle
    pub fn set_state(&mut self, state: AccountState) {
        self.state = state;
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Apply a transaction to the live state.
    ///
    /// On success the resulting state root is recorded under
    /// `stateRoot:<txHash>` and the transaction under `txLog:<txHash>`.
    /// On failure nothing changes.
    pub fn apply_transaction(&mut self, tx: &SignedTransaction) -> Result<H256, LedgerError> {
        let next = self.state.apply(tx)?;
        let root = next.state_root().unwrap_or(ZERO_DIGEST);

        self.store.record_state_root(&tx.hash(), &root)?;
        self.store.record_tx_log(tx)?;
        self.state = next;

        tracing::debug!(
            "Applied tx {} from {:?}, state root {}",
            digest_hex(&tx.hash()),
            tx.sender(),
            digest_hex(&root)
        );
        Ok(root)
    }

    /// Merkle root of the live state, `None` when empty
    pub fn compute_state_root(&self) -> Option<H256> {
        self.state.state_root()
    }

    /// Credit an address outside the transaction path (funding)
    pub fn deposit(&mut self, address: Address, amount: U256) -> Result<(), LedgerError> {
        self.state = self.state.credit(address, amount)?;
        Ok(())
    }

    /// Replace the live state with the snapshot stored under `key`
    pub fn revert_to_snapshot(&mut self, key: &str) -> Result<(), LedgerError> {
        let record = self.store.load(key)?;
        self.state = record.to_state();
        tracing::info!("Reverted ledger to {} (block {})", key, record.block_number);
        Ok(())
    }

    /// Replace the live state with the snapshot taken for a batch
    pub fn revert_to(&mut self, batch_id: &BatchId) -> Result<(), LedgerError> {
        self.revert_to_snapshot(&crate::persistence::snapshot_key(batch_id))
    }

    /// Replace the live state with the genesis snapshot
    pub fn revert_to_genesis(&mut self) -> Result<(), LedgerError> {
        self.revert_to_snapshot(GENESIS_KEY)
    }

    /// Historical state whose committed root is `root`.
    ///
    /// Returns a detached fork, the live state is never touched.
    pub fn state_at_root(&self, root: &H256) -> Result<AccountState, LedgerError> {
        match self.store.find_by_state_root(root)? {
            Some((_, record)) => Ok(record.to_state()),
            None => Err(StoreError::SnapshotNotFound(format!("state root {}", digest_hex(root))).into()),
        }
    }

    pub fn balance_of(&self, address: &Address) -> U256 {
        self.state.balance(address)
    }

    pub fn nonce_of(&self, address: &Address) -> U256 {
        self.state.nonce(address)
    }
}
