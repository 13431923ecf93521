//! Hash-linked L2 blocks
//!
//! Every committed batch produces one block. The block hash covers every
//! other field, including the proposer's winning nonce.

use crate::error::BlockError;
use crate::merkle::keccak256;
use crate::transaction::SignedTransaction;
use l1_integration::{address_hex, Address, H256, ZERO_DIGEST};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};

/// Compact transaction view used in block and mining payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub from: String,
    pub to: String,
    pub amount: String,
    pub nonce: String,
    pub v: u64,
    pub r: String,
    pub s: String,
}

impl From<&SignedTransaction> for TransactionSummary {
    fn from(tx: &SignedTransaction) -> Self {
        Self {
            from: address_hex(&tx.sender()),
            to: address_hex(&tx.body().to),
            amount: tx.body().amount.to_string(),
            nonce: tx.body().nonce.to_string(),
            v: tx.signature.v,
            r: format!("{:#x}", tx.signature.r),
            s: format!("{:#x}", tx.signature.s),
        }
    }
}

/// An L2 block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_number: u64,
    pub previous_block_hash: H256,
    /// Unix millis
    pub timestamp: i64,
    pub transactions: Vec<SignedTransaction>,
    /// `None` when the state was empty
    pub state_root: Option<H256>,
    /// Batch calldata
    pub batch_data: String,
    pub proposer: Address,
    /// Winning proposer nonce
    pub nonce: u64,
    pub block_hash: H256,
}

impl Block {
    /// Unsealed block extending `parent`
    pub fn child_of(
        parent: &Block,
        timestamp: i64,
        transactions: Vec<SignedTransaction>,
        state_root: Option<H256>,
        batch_data: String,
    ) -> Self {
        Self {
            block_number: parent.block_number + 1,
            previous_block_hash: parent.block_hash,
            timestamp,
            transactions,
            state_root,
            batch_data,
            proposer: Address::zero(),
            nonce: 0,
            block_hash: ZERO_DIGEST,
        }
    }

    /// Genesis block at height 0
    pub fn genesis() -> Self {
        let mut block = Self {
            block_number: 0,
            previous_block_hash: ZERO_DIGEST,
            timestamp: 0,
            transactions: Vec::new(),
            state_root: None,
            batch_data: String::new(),
            proposer: Address::zero(),
            nonce: 0,
            block_hash: ZERO_DIGEST,
        };
        block.block_hash = compute_block_hash(&block);
        block
    }

    /// Fix the proposer and nonce, then compute the hash
    pub fn seal(&mut self, proposer: Address, nonce: u64) {
        self.proposer = proposer;
        self.nonce = nonce;
        self.block_hash = compute_block_hash(self);
    }

    pub fn summaries(&self) -> Vec<TransactionSummary> {
        self.transactions.iter().map(TransactionSummary::from).collect()
    }
}

/// keccak256 over every block field except the hash itself
pub fn compute_block_hash(block: &Block) -> H256 {
    let mut stream = RlpStream::new_list(8);
    stream.append(&block.block_number);
    stream.append(&block.previous_block_hash);
    stream.append(&block.timestamp.to_string());
    stream.begin_list(block.transactions.len());
    for tx in &block.transactions {
        stream.append(&tx.leaf_hash());
    }
    stream.append(&block.state_root.unwrap_or(ZERO_DIGEST));
    stream.append(&block.batch_data);
    stream.append(&block.proposer);
    stream.append(&block.nonce);
    keccak256(&stream.out())
}

/// Append-only block sequence starting at genesis
#[derive(Debug, Clone)]
pub struct BlockChain {
    blocks: Vec<Block>,
}

impl Default for BlockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockChain {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
        }
    }

    /// Tip of the chain
    pub fn latest(&self) -> &Block {
        // Never empty: genesis is installed at construction and never popped
        &self.blocks[self.blocks.len() - 1]
    }

    /// Append a sealed block that extends the tip
    pub fn add_block(&mut self, block: Block) -> Result<(), BlockError> {
        let tip = self.latest();
        if block.block_number != tip.block_number + 1 {
            return Err(BlockError::InvalidLink {
                number: block.block_number,
                reason: format!("expected height {}", tip.block_number + 1),
            });
        }
        if block.previous_block_hash != tip.block_hash {
            return Err(BlockError::InvalidLink {
                number: block.block_number,
                reason: "previous hash mismatch".to_string(),
            });
        }
        if block.block_hash != compute_block_hash(&block) {
            return Err(BlockError::HashMismatch(block.block_number));
        }

        self.blocks.push(block);
        Ok(())
    }

    /// Drop the tip, never genesis
    pub fn pop(&mut self) -> Option<Block> {
        if self.blocks.len() > 1 {
            self.blocks.pop()
        } else {
            None
        }
    }

    /// Re-check every hash and link
    pub fn is_valid_chain(&self) -> bool {
        self.blocks.windows(2).all(|pair| {
            pair[1].previous_block_hash == pair[0].block_hash
                && pair[1].block_number == pair[0].block_number + 1
        }) && self
            .blocks
            .iter()
            .all(|block| block.block_hash == compute_block_hash(block))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false, a chain starts with its genesis block
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
