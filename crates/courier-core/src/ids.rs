use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Mutex as ClaimLock;
use tracing::debug;
use uuid::Uuid;

use crate::counter::CounterStore;
use crate::error::IdError;

/// Largest identifier value; generators wrap back to `00000001` after it.
pub const MAX_SEQUENCE_ID: u64 = 99_999_999;
/// Number of counter values a node claims from the shared store at once.
pub const BLOCK_SIZE: u64 = 10_000;
/// Upper bound on compare-and-swap retries for a single block claim.
const MAX_CLAIM_ATTEMPTS: u32 = 64;

/// Maps a zero-based counter value onto the wrapping 8-digit identifier space.
///
/// `0 -> "00000001"`, `99_999_998 -> "99999999"`, `99_999_999 -> "00000001"`.
pub fn sequence_id(counter: u64) -> String {
    format!("{:08}", counter % MAX_SEQUENCE_ID + 1)
}

/// Source of message, correlation and transaction identifiers.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// Produces the next identifier.
    async fn generate_id(&self) -> Result<String, IdError>;
}

/// Single-process monotonic sequence generator.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    counter: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the underlying counter at `counter` instead of zero.
    pub fn starting_at(counter: u64) -> Self {
        Self {
            counter: AtomicU64::new(counter),
        }
    }

    /// Synchronous variant of [`IdGenerator::generate_id`]; never fails.
    pub fn next_id(&self) -> String {
        sequence_id(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl IdGenerator for SequenceIdGenerator {
    async fn generate_id(&self) -> Result<String, IdError> {
        Ok(self.next_id())
    }
}

/// Opaque UUID identifiers, used where ordering does not matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    pub fn next_id(&self) -> String {
        Uuid::new_v4().to_string().to_uppercase()
    }
}

#[async_trait]
impl IdGenerator for RandomIdGenerator {
    async fn generate_id(&self) -> Result<String, IdError> {
        Ok(self.next_id())
    }
}

#[derive(Debug, Default)]
struct LocalBlocks {
    current: Range<u64>,
    spare: VecDeque<u64>,
}

impl LocalBlocks {
    fn take(&mut self) -> Option<u64> {
        if self.current.is_empty() {
            let base = self.spare.pop_front()?;
            self.current = base..base + BLOCK_SIZE;
        }
        self.current.next()
    }
}

/// Cluster-safe sequence generator backed by block claims on a shared store.
///
/// Each node reserves `BLOCK_SIZE` counter values at a time by advancing the
/// shared block index, then serves identifiers locally until the block runs
/// out. Blocks claimed by different nodes never overlap, and one node serves
/// its blocks in the order it claimed them.
pub struct ClusterIdGenerator {
    store: Arc<dyn CounterStore>,
    key: String,
    blocks: Mutex<LocalBlocks>,
    claim: ClaimLock<()>,
}

impl ClusterIdGenerator {
    pub fn new(store: Arc<dyn CounterStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            blocks: Mutex::new(LocalBlocks::default()),
            claim: ClaimLock::new(()),
        }
    }

    /// Seeds the shared store so that generated counters start above `seed`.
    ///
    /// Returns `Ok(false)` when the store was already initialized.
    pub async fn init(&self, seed: i64) -> Result<bool, IdError> {
        if seed <= 0 {
            return Err(IdError::InvalidSeed(seed));
        }
        let first_block = seed.unsigned_abs() / BLOCK_SIZE + 1;
        let stored = self.store.put_if_absent(&self.key, first_block).await?;
        if stored {
            debug!(key = %self.key, first_block, "initialized shared id counter");
        }
        Ok(stored)
    }

    fn take_local(&self) -> Option<u64> {
        let mut blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        blocks.take()
    }

    async fn claim_block(&self) -> Result<u64, IdError> {
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            match self.store.get(&self.key).await? {
                None => {
                    if self.store.put_if_absent(&self.key, 1).await? {
                        return Ok(0);
                    }
                }
                Some(index) => {
                    if self
                        .store
                        .compare_and_swap(&self.key, index, index + 1)
                        .await?
                    {
                        debug!(key = %self.key, index, "claimed id block");
                        return Ok(index * BLOCK_SIZE);
                    }
                }
            }
            debug!(key = %self.key, attempt, "id block claim conflicted, retrying");
        }
        Err(IdError::Contention(MAX_CLAIM_ATTEMPTS))
    }
}

#[async_trait]
impl IdGenerator for ClusterIdGenerator {
    async fn generate_id(&self) -> Result<String, IdError> {
        if let Some(counter) = self.take_local() {
            return Ok(sequence_id(counter));
        }
        // One claim in flight per node: a block is queued before any later
        // claim starts, so ids come out in store order.
        let _claiming = self.claim.lock().await;
        if let Some(counter) = self.take_local() {
            return Ok(sequence_id(counter));
        }
        let base = self.claim_block().await?;
        let mut blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        blocks.spare.push_back(base);
        blocks
            .take()
            .map(sequence_id)
            .ok_or(IdError::Contention(MAX_CLAIM_ATTEMPTS))
    }
}
