use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LedgerError;

/// Result of trying to claim a message id for application delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns delivery and must `confirm` or `release`.
    Claimed,
    /// Already delivered; suppress the publish but still acknowledge.
    AlreadyDelivered,
    /// Another worker holds the claim right now.
    InProgress,
}

/// Idempotent-delivery ledger shared by all receiving workers.
///
/// `claim` must be an atomic check-and-claim. A failed publish `release`s the
/// claim so that redelivery is not wedged.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn claim(&self, message_id: &str) -> Result<ClaimOutcome, LedgerError>;
    async fn confirm(&self, message_id: &str) -> Result<(), LedgerError>;
    async fn release(&self, message_id: &str) -> Result<(), LedgerError>;
}

/// Persisted form of the delivered set, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub delivered: Vec<String>,
}

struct LedgerState {
    in_progress: HashSet<String>,
    delivered: LruCache<String, ()>,
}

/// Process-local ledger remembering the most recent delivered ids.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(retention: usize) -> Self {
        let capacity = NonZeroUsize::new(retention).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(LedgerState {
                in_progress: HashSet::new(),
                delivered: LruCache::new(capacity),
            }),
        }
    }

    /// Rebuilds a ledger from a snapshot; in-progress claims start empty.
    pub fn from_snapshot(retention: usize, snapshot: &LedgerSnapshot) -> Self {
        let ledger = Self::new(retention);
        {
            let mut state = ledger.lock();
            for id in &snapshot.delivered {
                state.delivered.put(id.clone(), ());
            }
        }
        ledger
    }

    /// Delivered ids, oldest first. In-progress claims are not included.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            delivered: state.delivered.iter().rev().map(|(id, _)| id.clone()).collect(),
        }
    }

    pub fn delivered_count(&self) -> usize {
        self.lock().delivered.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.lock().in_progress.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryLedger {
    async fn claim(&self, message_id: &str) -> Result<ClaimOutcome, LedgerError> {
        let mut state = self.lock();
        let outcome = if state.delivered.contains(message_id) {
            ClaimOutcome::AlreadyDelivered
        } else if !state.in_progress.insert(message_id.to_string()) {
            ClaimOutcome::InProgress
        } else {
            ClaimOutcome::Claimed
        };
        debug!(message_id, ?outcome, "ledger claim");
        Ok(outcome)
    }

    async fn confirm(&self, message_id: &str) -> Result<(), LedgerError> {
        let mut state = self.lock();
        state.in_progress.remove(message_id);
        state.delivered.put(message_id.to_string(), ());
        Ok(())
    }

    async fn release(&self, message_id: &str) -> Result<(), LedgerError> {
        self.lock().in_progress.remove(message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ClaimOutcome, DeliveryLedger, InMemoryLedger, LedgerSnapshot};

    #[tokio::test]
    async fn claim_confirm_then_duplicate() {
        let ledger = InMemoryLedger::new(16);
        assert_eq!(ledger.claim("M1").await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(ledger.claim("M1").await.unwrap(), ClaimOutcome::InProgress);
        ledger.confirm("M1").await.unwrap();
        assert_eq!(
            ledger.claim("M1").await.unwrap(),
            ClaimOutcome::AlreadyDelivered
        );
        assert_eq!(ledger.in_progress_count(), 0);
    }

    #[tokio::test]
    async fn release_allows_reclaim() {
        let ledger = InMemoryLedger::new(16);
        assert_eq!(ledger.claim("M1").await.unwrap(), ClaimOutcome::Claimed);
        ledger.release("M1").await.unwrap();
        assert_eq!(ledger.claim("M1").await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(ledger.delivered_count(), 0);
    }

    #[tokio::test]
    async fn retention_evicts_oldest_delivered() {
        let ledger = InMemoryLedger::new(2);
        for id in ["A", "B", "C"] {
            ledger.claim(id).await.unwrap();
            ledger.confirm(id).await.unwrap();
        }
        assert_eq!(ledger.claim("A").await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(
            ledger.claim("C").await.unwrap(),
            ClaimOutcome::AlreadyDelivered
        );
    }

    #[tokio::test]
    async fn snapshot_excludes_in_progress_and_restores_order() {
        let ledger = InMemoryLedger::new(8);
        for id in ["A", "B"] {
            ledger.claim(id).await.unwrap();
            ledger.confirm(id).await.unwrap();
        }
        ledger.claim("PENDING").await.unwrap();

        let snapshot = ledger.snapshot();
        assert_eq!(
            snapshot,
            LedgerSnapshot {
                delivered: vec!["A".into(), "B".into()]
            }
        );

        let restored = InMemoryLedger::from_snapshot(8, &snapshot);
        assert_eq!(
            restored.claim("B").await.unwrap(),
            ClaimOutcome::AlreadyDelivered
        );
        assert_eq!(restored.claim("PENDING").await.unwrap(), ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn concurrent_claims_have_a_single_winner() {
        let ledger = Arc::new(InMemoryLedger::new(16));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.claim("M1").await.unwrap() }));
        }
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() == ClaimOutcome::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }
}
