//! Remote data operations: the `RemoteSource` seam plus HTTP, in-memory and
//! cached implementations.

pub mod cached;
pub mod envelope;
pub mod http;
pub mod memory;

pub use cached::CachedRemote;
pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteOp};

use crate::core::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// REST-style access to the per-entity collections.
///
/// Records travel as JSON; decoding into typed records happens in the store.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list(&self, collection: &str) -> Result<Vec<JsonValue>>;

    async fn create(&self, collection: &str, body: JsonValue) -> Result<JsonValue>;

    async fn update(&self, collection: &str, id: &str, body: JsonValue) -> Result<JsonValue>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Request URL of a collection; used as the identity of cached reads.
    fn endpoint(&self, collection: &str) -> String {
        format!("/{}", collection)
    }

    /// Drops anything cached for `collection` so the next `list` hits upstream.
    fn invalidate(&self, _collection: &str) {}
}
