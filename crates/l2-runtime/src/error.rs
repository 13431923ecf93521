//! Runtime errors
//!
//! Local validation errors reject a single transaction and leave state
//! untouched. Store errors are fatal for the operation that hit them.

use l1_integration::{Address, U256};
use thiserror::Error;

/// Transaction codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Signature does not match transaction")]
    SignatureMismatch,

    #[error("Malformed batch payload: {0}")]
    Decode(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Snapshot store / key-value errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot chain broken: {key} links to missing {missing}")]
    BrokenChain { key: String, missing: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Record encoding error: {0}")]
    Encoding(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

/// Account ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Insufficient balance. Account: {address:?}, Balance: {balance}, Amount: {amount}")]
    InsufficientBalance {
        address: Address,
        balance: U256,
        amount: U256,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Block chain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Block {number} does not link to the chain tip: {reason}")]
    InvalidLink { number: u64, reason: String },

    #[error("Block {0} hash does not match its contents")]
    HashMismatch(u64),
}

/// Why a pool submission was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Transaction pool is full")]
    Full,

    #[error("Transaction pool is closed")]
    Closed,
}
