//! Persistence Layer for rollup state
//!
//! A small key-value abstraction with a sled-backed store for nodes and a
//! DashMap-backed store for tests and ephemeral devnets. On top of it,
//! `SnapshotStore` keeps the linked history of per-batch state snapshots plus
//! the per-transaction commitment artifacts.
//!
//! Layout:
//! - `snapshot:<batchId>` JSON `SnapshotRecord`
//! - `snapshot:genesis`   JSON `SnapshotRecord` of the state before the first batch
//! - `snapshot:head`      key of the latest snapshot
//! - `stateRoot:<txHash>` raw 32-byte state root after the transaction
//! - `txLog:<txHash>`     bincode `SignedTransaction`

use crate::account_store::{Account, AccountState};
use crate::error::StoreError;
use crate::transaction::SignedTransaction;
use dashmap::DashMap;
use l1_integration::{digest_hex, Address, BatchId, H256, U256, ZERO_DIGEST};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Key of the snapshot taken before the first batch
pub const GENESIS_KEY: &str = "snapshot:genesis";

/// Key holding the key of the latest snapshot
pub const HEAD_KEY: &str = "snapshot:head";

/// Key-value store with atomic single-key operations
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Flush pending writes to durable storage
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// sled-backed store
pub struct SledStore {
    db: Db,
    tree: sled::Tree,
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(&path)?;
        let tree = db.open_tree("rollup")?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self { db, tree })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.tree.contains_key(key)?)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory store
#[derive(Default, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(key))
    }
}

/// One account inside a snapshot record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AccountEntry {
    pub address: Address,
    pub balance: U256,
    pub nonce: U256,
}

/// Persisted state as of one batch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Unix millis
    pub timestamp: i64,
    pub block_number: u64,
    /// `None` for an empty state
    pub state_root: Option<H256>,
    /// Link to the previous snapshot, `None` only for genesis
    pub previous_snapshot_key: Option<String>,
    pub accounts: Vec<AccountEntry>,
}

impl SnapshotRecord {
    /// Capture a state
    pub fn capture(
        state: &AccountState,
        block_number: u64,
        previous_snapshot_key: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            block_number,
            state_root: state.state_root(),
            previous_snapshot_key,
            accounts: state
                .accounts()
                .iter()
                .map(|(address, account)| AccountEntry {
                    address: *address,
                    balance: account.balance,
                    nonce: account.nonce,
                })
                .collect(),
        }
    }

    /// Rebuild the account state this record captured
    pub fn to_state(&self) -> AccountState {
        let accounts: BTreeMap<Address, Account> = self
            .accounts
            .iter()
            .map(|entry| {
                (
                    entry.address,
                    Account {
                        balance: entry.balance,
                        nonce: entry.nonce,
                    },
                )
            })
            .collect();
        AccountState::from_accounts(accounts)
    }

    /// State root as committed on L1, zero digest for an empty state
    pub fn committed_root(&self) -> H256 {
        self.state_root.unwrap_or(ZERO_DIGEST)
    }
}

/// Storage key for a batch snapshot
pub fn snapshot_key(batch_id: &BatchId) -> String {
    format!("snapshot:{}", digest_hex(batch_id))
}

fn state_root_key(tx_hash: &H256) -> String {
    format!("stateRoot:{}", digest_hex(tx_hash))
}

fn state_root_index_key(root: &H256) -> String {
    format!("stateRootIndex:{}", digest_hex(root))
}

fn tx_log_key(tx_hash: &H256) -> String {
    format!("txLog:{}", digest_hex(tx_hash))
}

/// Linked snapshot history and per-transaction artifacts
#[derive(Clone)]
pub struct SnapshotStore {
    kv: Arc<dyn KvStore>,
}

impl SnapshotStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Store over a fresh `MemoryStore`
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Underlying key-value store
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Write a record and point its state root's index entry at it
    fn put_record(&self, key: &str, record: &SnapshotRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.kv.put(key, &bytes)?;
        if let Some(root) = &record.state_root {
            self.kv.put(&state_root_index_key(root), key.as_bytes())?;
        }
        Ok(())
    }

    /// Write the snapshot for a batch. Does not move the head.
    pub fn write_snapshot(
        &self,
        batch_id: &BatchId,
        record: &SnapshotRecord,
    ) -> Result<String, StoreError> {
        let key = snapshot_key(batch_id);
        self.put_record(&key, record)?;
        Ok(key)
    }

    /// Write the genesis snapshot
    pub fn write_genesis(&self, record: &SnapshotRecord) -> Result<String, StoreError> {
        self.put_record(GENESIS_KEY, record)?;
        Ok(GENESIS_KEY.to_string())
    }

    /// Whether a genesis snapshot exists
    pub fn has_genesis(&self) -> Result<bool, StoreError> {
        self.kv.exists(GENESIS_KEY)
    }

    /// Point the head at an existing snapshot.
    ///
    /// Refuses keys with no snapshot behind them so the head can never dangle.
    pub fn set_head(&self, key: &str) -> Result<(), StoreError> {
        if !self.kv.exists(key)? {
            return Err(StoreError::SnapshotNotFound(key.to_string()));
        }
        self.kv.put(HEAD_KEY, key.as_bytes())?;
        self.kv.flush()
    }

    /// Key of the latest snapshot
    pub fn head(&self) -> Result<Option<String>, StoreError> {
        self.kv
            .get(HEAD_KEY)?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|e| StoreError::Encoding(e.to_string()))
            })
            .transpose()
    }

    /// Load a snapshot by key
    pub fn load(&self, key: &str) -> Result<SnapshotRecord, StoreError> {
        let bytes = self
            .kv
            .get(key)?
            .ok_or_else(|| StoreError::SnapshotNotFound(key.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load the snapshot taken for a batch
    pub fn load_batch(&self, batch_id: &BatchId) -> Result<SnapshotRecord, StoreError> {
        self.load(&snapshot_key(batch_id))
    }

    /// Snapshots from the head back to genesis, head first.
    ///
    /// A link to a missing snapshot is `BrokenChain`.
    pub fn chain(&self) -> Result<Vec<(String, SnapshotRecord)>, StoreError> {
        let mut chain: Vec<(String, SnapshotRecord)> = Vec::new();
        let mut next = self.head()?;

        while let Some(key) = next {
            let record = match self.load(&key) {
                Ok(record) => record,
                Err(StoreError::SnapshotNotFound(missing)) => {
                    let key = chain
                        .last()
                        .map(|(k, _)| k.clone())
                        .unwrap_or_else(|| HEAD_KEY.to_string());
                    return Err(StoreError::BrokenChain { key, missing });
                }
                Err(e) => return Err(e),
            };
            next = record.previous_snapshot_key.clone();
            chain.push((key, record));
        }

        Ok(chain)
    }

    /// Check that the head snapshot and the one it links to both exist
    pub fn verify_head(&self) -> Result<(), StoreError> {
        let Some(key) = self.head()? else {
            return Ok(());
        };
        let record = self.load(&key).map_err(|e| match e {
            StoreError::SnapshotNotFound(missing) => StoreError::BrokenChain {
                key: HEAD_KEY.to_string(),
                missing,
            },
            other => other,
        })?;
        match record.previous_snapshot_key {
            Some(previous) if !self.kv.exists(&previous)? => {
                Err(StoreError::BrokenChain { key, missing: previous })
            }
            _ => Ok(()),
        }
    }

    /// Walk the whole chain, returning its length
    pub fn verify_chain(&self) -> Result<usize, StoreError> {
        self.chain().map(|chain| chain.len())
    }

    /// Most recently written snapshot whose committed root is `root`.
    ///
    /// The zero digest resolves to genesis. Lookups go through the state root
    /// index; records without an index entry are found by walking the chain.
    pub fn find_by_state_root(
        &self,
        root: &H256,
    ) -> Result<Option<(String, SnapshotRecord)>, StoreError> {
        if root.is_zero() {
            return match self.kv.get(GENESIS_KEY)? {
                Some(bytes) => Ok(Some((GENESIS_KEY.to_string(), serde_json::from_slice(&bytes)?))),
                None => Ok(None),
            };
        }

        if let Some(bytes) = self.kv.get(&state_root_index_key(root))? {
            let key = String::from_utf8(bytes).map_err(|e| StoreError::Encoding(e.to_string()))?;
            match self.load(&key) {
                Ok(record) if record.state_root.as_ref() == Some(root) => return Ok(Some((key, record))),
                Ok(_) | Err(StoreError::SnapshotNotFound(_)) => {
                    tracing::warn!("Stale state root index entry for {}", digest_hex(root));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self
            .chain()?
            .into_iter()
            .find(|(_, record)| record.state_root.as_ref() == Some(root)))
    }

    /// Record the state root reached after a transaction
    pub fn record_state_root(&self, tx_hash: &H256, root: &H256) -> Result<(), StoreError> {
        self.kv.put(&state_root_key(tx_hash), root.as_bytes())
    }

    /// State root recorded for a transaction
    pub fn recorded_state_root(&self, tx_hash: &H256) -> Result<Option<H256>, StoreError> {
        match self.kv.get(&state_root_key(tx_hash))? {
            Some(bytes) if bytes.len() == 32 => Ok(Some(H256::from_slice(&bytes))),
            Some(bytes) => Err(StoreError::Encoding(format!(
                "state root for {} has {} bytes",
                digest_hex(tx_hash),
                bytes.len()
            ))),
            None => Ok(None),
        }
    }

    /// Log an applied transaction
    pub fn record_tx_log(&self, tx: &SignedTransaction) -> Result<(), StoreError> {
        let bytes = bincode::serialize(tx)?;
        self.kv.put(&tx_log_key(&tx.hash()), &bytes)
    }

    /// Logged transaction by hash
    pub fn tx_log(&self, tx_hash: &H256) -> Result<Option<SignedTransaction>, StoreError> {
        self.kv
            .get(&tx_log_key(tx_hash))?
            .map(|bytes| bincode::deserialize(&bytes).map_err(StoreError::from))
            .transpose()
    }
}
