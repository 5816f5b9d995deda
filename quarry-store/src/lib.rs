//! Shared store for Quarry
//!
//! This crate defines the [`Store`] trait the worker engine talks to: an
//! atomic FIFO list per queue, the set of known queues, worker registration
//! state, stat counters and the append-only failure list. Two backends are
//! provided, an in-process [`MemoryStore`] and, behind the `redis` feature,
//! a Resque-compatible [`RedisStore`].

pub mod error;
pub mod memory;
pub mod store;

// Redis implementation (feature-gated)
#[cfg(feature = "redis")]
pub mod redis_store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{Store, STAT_FAILED, STAT_PROCESSED};

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
