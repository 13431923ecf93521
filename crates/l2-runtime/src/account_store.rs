//! Account state as an immutable, cheaply cloned handle
//!
//! Accounts live in a `BTreeMap` so iteration is always address ascending,
//! which makes the state root independent of insertion history. Applying a
//! transaction produces a new handle; the old one is left untouched, so a
//! revert is just swapping handles back.

use crate::error::LedgerError;
use crate::merkle::{keccak256, MerkleTree};
use crate::transaction::SignedTransaction;
use l1_integration::{Address, H256, U256};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Balance and nonce of one address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: U256,
    pub nonce: U256,
}

impl Account {
    /// State tree leaf: keccak256(rlp([address, balance, nonce]))
    pub fn leaf_hash(&self, address: &Address) -> H256 {
        let mut stream = RlpStream::new_list(3);
        stream.append(address);
        stream.append(&self.balance);
        stream.append(&self.nonce);
        keccak256(&stream.out())
    }
}

/// Immutable account map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    accounts: Arc<BTreeMap<Address, Account>>,
}

impl AccountState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from explicit accounts
    pub fn from_accounts(accounts: BTreeMap<Address, Account>) -> Self {
        Self {
            accounts: Arc::new(accounts),
        }
    }

    /// Account for an address, default `{0, 0}` when absent
    pub fn get(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.get(address).balance
    }

    pub fn nonce(&self, address: &Address) -> U256 {
        self.get(address).nonce
    }

    /// Accounts in address order
    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Merkle root over all accounts in address order.
    ///
    /// `None` for an empty state.
    pub fn state_root(&self) -> Option<H256> {
        let leaves = self
            .accounts
            .iter()
            .map(|(address, account)| account.leaf_hash(address))
            .collect();
        MerkleTree::build(leaves).root()
    }

    /// New state with `amount` credited to `address`
    pub fn credit(&self, address: Address, amount: U256) -> Result<Self, LedgerError> {
        let mut next = self.clone();
        let accounts = Arc::make_mut(&mut next.accounts);
        let account = accounts.entry(address).or_default();
        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("balance overflow crediting {:?}", address))
        })?;
        Ok(next)
    }

    /// New state with the transfer applied.
    ///
    /// Debits `amount` from the sender, bumps the sender nonce and credits the
    /// recipient. On error `self` is unchanged and no new state is produced.
    pub fn apply(&self, tx: &SignedTransaction) -> Result<Self, LedgerError> {
        let from = tx.sender();
        let body = tx.body();

        let sender = self.get(&from);
        if sender.balance < body.amount {
            return Err(LedgerError::InsufficientBalance {
                address: from,
                balance: sender.balance,
                amount: body.amount,
            });
        }

        let nonce = sender.nonce.checked_add(U256::one()).ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("nonce overflow for {:?}", from))
        })?;

        let mut next = self.clone();
        let accounts = Arc::make_mut(&mut next.accounts);

        let sender_account = accounts.entry(from).or_default();
        sender_account.balance -= body.amount;
        sender_account.nonce = nonce;

        let recipient = accounts.entry(body.to).or_default();
        recipient.balance = recipient.balance.checked_add(body.amount).ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("balance overflow crediting {:?}", body.to))
        })?;

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{sign, UnsignedTransaction};
    use k256::ecdsa::SigningKey;

    fn signed(key_byte: u8, to: Address, amount: u64, nonce: u64) -> SignedTransaction {
        let key = SigningKey::from_slice(&[key_byte; 32]).unwrap();
        let tx = UnsignedTransaction::transfer(to, U256::from(amount), U256::from(nonce), 1);
        sign(&tx, &key).unwrap().0
    }

    #[test]
    fn test_missing_account_defaults_to_zero() {
        let state = AccountState::new();
        assert_eq!(state.get(&Address::repeat_byte(1)), Account::default());
        assert_eq!(state.state_root(), None);
    }

    #[test]
    fn test_apply_transfers_and_bumps_nonce() {
        let tx = signed(1, Address::repeat_byte(0xbb), 30, 0);
        let state = AccountState::new().credit(tx.sender(), U256::from(100)).unwrap();

        let next = state.apply(&tx).unwrap();
        assert_eq!(next.balance(&tx.sender()), U256::from(70));
        assert_eq!(next.nonce(&tx.sender()), U256::one());
        assert_eq!(next.balance(&Address::repeat_byte(0xbb)), U256::from(30));

        // Original handle is untouched
        assert_eq!(state.balance(&tx.sender()), U256::from(100));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_insufficient_balance_leaves_state_unchanged() {
        let tx = signed(1, Address::repeat_byte(0xbb), 101, 0);
        let state = AccountState::new().credit(tx.sender(), U256::from(100)).unwrap();

        let err = state.apply(&tx).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(state.balance(&tx.sender()), U256::from(100));
    }

    #[test]
    fn test_credit_overflow_is_invalid() {
        let address = Address::repeat_byte(3);
        let state = AccountState::new().credit(address, U256::MAX).unwrap();
        assert!(matches!(
            state.credit(address, U256::one()),
            Err(LedgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_root_ignores_insertion_order() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0x0b);

        let first = AccountState::new()
            .credit(a, U256::from(5))
            .and_then(|s| s.credit(b, U256::from(7)))
            .unwrap();
        let second = AccountState::new()
            .credit(b, U256::from(7))
            .and_then(|s| s.credit(a, U256::from(5)))
            .unwrap();

        assert_eq!(first.state_root(), second.state_root());

        let expected = MerkleTree::build(vec![
            Account { balance: U256::from(7), nonce: U256::zero() }.leaf_hash(&b),
            Account { balance: U256::from(5), nonce: U256::zero() }.leaf_hash(&a),
        ])
        .root();
        assert_eq!(first.state_root(), expected);
    }
}
