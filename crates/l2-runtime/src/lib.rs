//! L2 Runtime - Rollup execution core
//!
//! This crate provides the state machine of the rollup:
//! - Transaction codec (canonical hashing, signing, batch calldata)
//! - Account state with deterministic Merkle state roots
//! - Linked snapshot history over a key-value store
//! - Hash-linked blocks and the pending transaction pool

pub mod account_store;
pub mod block;
pub mod codec;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod persistence;
pub mod transaction;
pub mod tx_pool;

pub use account_store::{Account, AccountState};
pub use block::{compute_block_hash, Block, BlockChain, TransactionSummary};
pub use codec::{decode_batch, encode_batch};
pub use error::{BlockError, CodecError, LedgerError, StoreError, SubmitError};
pub use ledger::AccountLedger;
pub use merkle::{hash_pair, keccak256, verify_proof, MerkleTree};
pub use persistence::{
    snapshot_key, KvStore, MemoryStore, SledStore, SnapshotRecord, SnapshotStore, GENESIS_KEY,
    HEAD_KEY,
};
pub use transaction::{
    address_of, ensure_verified, recover_signer, sign, verify, Signature, SignedTransaction,
    Transaction, UnsignedTransaction,
};
pub use tx_pool::{TransactionPool, TransactionSender};

/// Maximum transactions per batch
pub const MAX_TXS_PER_BATCH: usize = 256;

/// Chain id used by devnets and tests
pub const DEFAULT_CHAIN_ID: u64 = 1337;
