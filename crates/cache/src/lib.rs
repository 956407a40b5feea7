//! Bounded in-process read cache.
//!
//! [`BoundedCache`] holds at most `capacity` entries and evicts the oldest
//! *inserted* key when full. Reads never change eviction order and a miss
//! never populates the cache; filling it is the caller's job.

pub mod bounded;

pub use bounded::BoundedCache;
