//! Core Courier primitives shared across crates.
//!
//! Includes message/correlation identifier generators, the shared counter
//! store contract used by cluster-safe generators, and base errors.

pub mod counter;
pub mod error;
pub mod ids;

pub use counter::{CounterStore, InMemoryCounterStore};
pub use error::{CounterStoreError, IdError};
pub use ids::{
    sequence_id, ClusterIdGenerator, IdGenerator, RandomIdGenerator, SequenceIdGenerator,
    BLOCK_SIZE, MAX_SEQUENCE_ID,
};
