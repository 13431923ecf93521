//! L1 event inbox with deduplication
//!
//! The controller reads ledger events from here instead of registering
//! callbacks. An event that was already delivered once (same kind, same
//! batch, same payload identity) is dropped, so re-subscriptions and replays
//! never trigger a second invalidation.

use l1_integration::{BatchId, L1Event, H256};
use std::collections::HashSet;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EventKey {
    Appended(BatchId),
    Finalized(BatchId),
    Resolved(BatchId, bool),
    Invalidated(u64, H256),
}

impl From<&L1Event> for EventKey {
    fn from(event: &L1Event) -> Self {
        match event {
            L1Event::StateBatchAppended { batch_id, .. } => EventKey::Appended(*batch_id),
            L1Event::StateBatchFinalized { batch_id, .. } => EventKey::Finalized(*batch_id),
            L1Event::ChallengeResolved {
                batch_id, success, ..
            } => EventKey::Resolved(*batch_id, *success),
            L1Event::BatchInvalidated {
                batch_index,
                tx_hash,
            } => EventKey::Invalidated(*batch_index, *tx_hash),
        }
    }
}

pub struct EventInbox {
    receiver: broadcast::Receiver<L1Event>,
    seen: HashSet<EventKey>,
}

impl EventInbox {
    pub fn new(receiver: broadcast::Receiver<L1Event>) -> Self {
        Self {
            receiver,
            seen: HashSet::new(),
        }
    }

    /// Mark an event as delivered, false if it was delivered before
    pub fn accept(&mut self, event: &L1Event) -> bool {
        self.seen.insert(EventKey::from(event))
    }

    /// Wait for the next new event. `None` once the L1 side is gone.
    pub async fn next(&mut self) -> Option<L1Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                    tracing::debug!("Dropping duplicate event {:?}", EventKey::from(&event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event inbox lagged, {} events lost", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next new event if one is already queued
    pub fn try_next(&mut self) -> Option<L1Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event inbox lagged, {} events lost", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
