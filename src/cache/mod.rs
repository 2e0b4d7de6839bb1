//! Read-through response cache for idempotent fetches.
//!
//! Entries expire after their TTL and the cache is bounded: once full, the
//! oldest stored entry is evicted. An optional [`KeyValueStore`] mirrors
//! entries across restarts; backing failures only degrade to memory.

pub mod backing;
pub mod response;

pub use backing::{JsonFileKv, KeyValueStore, MemoryKv};
pub use response::{ResponseCache, request_key};
