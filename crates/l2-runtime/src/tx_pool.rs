//! Pending transaction intake
//!
//! Senders verify signatures before anything reaches the bounded channel, so
//! the pool only ever holds transactions whose signer matches `from`.

use crate::error::{CodecError, SubmitError};
use crate::transaction::{verify, Signature, SignedTransaction};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use l1_integration::digest_hex;
use std::collections::VecDeque;

/// Default channel capacity
pub const POOL_CAPACITY: usize = 1024;

/// Handle for submitting transactions to the pool
#[derive(Clone)]
pub struct TransactionSender {
    sender: Sender<SignedTransaction>,
}

impl TransactionSender {
    /// Verify and enqueue a signed transaction
    ///
    /// The detached signature must be the one embedded in `signed`, since the
    /// embedded copy is what ends up in calldata.
    pub fn submit(&self, signed: SignedTransaction, signature: &Signature) -> Result<(), SubmitError> {
        if signed.signature != *signature || !verify(&signed, signature) {
            tracing::warn!("Rejected tx {}: signature mismatch", digest_hex(&signed.hash()));
            return Err(CodecError::SignatureMismatch.into());
        }

        self.sender.try_send(signed).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }
}

/// Buffer of verified transactions awaiting a batch
pub struct TransactionPool {
    receiver: Receiver<SignedTransaction>,
    sender: Sender<SignedTransaction>,
    /// Transactions put back ahead of the channel
    requeued: VecDeque<SignedTransaction>,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}

impl TransactionPool {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            receiver,
            sender,
            requeued: VecDeque::new(),
        }
    }

    /// Get a sender for submitting transactions
    pub fn sender(&self) -> TransactionSender {
        TransactionSender {
            sender: self.sender.clone(),
        }
    }

    /// Put transactions back at the front, keeping their order
    pub fn requeue_front(&mut self, txs: Vec<SignedTransaction>) {
        for tx in txs.into_iter().rev() {
            self.requeued.push_front(tx);
        }
    }

    /// Take up to `max` transactions in arrival order
    pub fn drain(&mut self, max: usize) -> Vec<SignedTransaction> {
        let mut out = Vec::with_capacity(max.min(self.len()));

        while out.len() < max {
            match self.requeued.pop_front() {
                Some(tx) => out.push(tx),
                None => break,
            }
        }

        while out.len() < max {
            match self.receiver.try_recv() {
                Ok(tx) => out.push(tx),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        out
    }

    /// Buffered transaction count
    pub fn len(&self) -> usize {
        self.requeued.len() + self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{sign, UnsignedTransaction};
    use k256::ecdsa::SigningKey;
    use l1_integration::{Address, U256};

    fn signed(nonce: u64) -> SignedTransaction {
        let key = SigningKey::from_slice(&[1u8; 32]).unwrap();
        let tx = UnsignedTransaction::transfer(Address::repeat_byte(2), U256::one(), U256::from(nonce), 1);
        sign(&tx, &key).unwrap().0
    }

    #[test]
    fn test_drain_in_arrival_order() {
        let mut pool = TransactionPool::new(8);
        let sender = pool.sender();
        for n in 0..3 {
            let tx = signed(n);
            sender.submit(tx.clone(), &tx.signature).unwrap();
        }

        let drained = pool.drain(2);
        assert_eq!(drained, vec![signed(0), signed(1)]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_mismatched_signature_never_enters() {
        let mut pool = TransactionPool::new(8);
        let mut tx = signed(0);
        tx.transaction.from = Address::repeat_byte(0xee);

        let err = pool.sender().submit(tx.clone(), &tx.signature).unwrap_err();
        assert_eq!(err, SubmitError::Codec(CodecError::SignatureMismatch));
        assert!(pool.drain(10).is_empty());
    }

    #[test]
    fn test_embedded_signature_must_match() {
        let mut pool = TransactionPool::new(8);
        let good = signed(0);
        let mut tampered = good.clone();
        tampered.signature.r = U256::from(12345);

        let err = pool.sender().submit(tampered, &good.signature).unwrap_err();
        assert_eq!(err, SubmitError::Codec(CodecError::SignatureMismatch));
        assert!(pool.is_empty());

        pool.sender().submit(good.clone(), &good.signature).unwrap();
        let drained = pool.drain(10);
        assert!(verify(&drained[0], &drained[0].signature));
    }

    #[test]
    fn test_requeued_come_first() {
        let mut pool = TransactionPool::new(8);
        let tx = signed(5);
        pool.sender().submit(tx.clone(), &tx.signature).unwrap();
        pool.requeue_front(vec![signed(1), signed(2)]);

        assert_eq!(pool.drain(10), vec![signed(1), signed(2), signed(5)]);
    }

    #[test]
    fn test_full_pool() {
        let pool = TransactionPool::new(1);
        let sender = pool.sender();
        let tx = signed(0);
        sender.submit(tx.clone(), &tx.signature).unwrap();
        assert_eq!(sender.submit(tx.clone(), &tx.signature), Err(SubmitError::Full));
    }
}
