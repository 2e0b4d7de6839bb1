use super::RemoteSource;
use crate::cache::{ResponseCache, request_key};
use crate::core::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::trace;

/// Serves `list` through a [`ResponseCache`] and invalidates a collection's
/// cached reads after every write to it, successful or not.
pub struct CachedRemote {
    inner: Arc<dyn RemoteSource>,
    cache: Arc<ResponseCache<JsonValue>>,
}

impl CachedRemote {
    pub fn new(inner: Arc<dyn RemoteSource>, cache: Arc<ResponseCache<JsonValue>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache<JsonValue>> {
        &self.cache
    }

    fn list_key(&self, collection: &str) -> String {
        request_key("GET", &self.inner.endpoint(collection), None)
    }
}

#[async_trait]
impl RemoteSource for CachedRemote {
    async fn list(&self, collection: &str) -> Result<Vec<JsonValue>> {
        let key = self.list_key(collection);
        if let Some(JsonValue::Array(records)) = self.cache.get(&key) {
            trace!(collection, "list served from cache");
            return Ok(records);
        }

        let records = self.inner.list(collection).await?;
        self.cache.insert(key, JsonValue::Array(records.clone()));
        Ok(records)
    }

    async fn create(&self, collection: &str, body: JsonValue) -> Result<JsonValue> {
        let result = self.inner.create(collection, body).await;
        self.invalidate(collection);
        result
    }

    async fn update(&self, collection: &str, id: &str, body: JsonValue) -> Result<JsonValue> {
        let result = self.inner.update(collection, id, body).await;
        self.invalidate(collection);
        result
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let result = self.inner.delete(collection, id).await;
        self.invalidate(collection);
        result
    }

    fn endpoint(&self, collection: &str) -> String {
        self.inner.endpoint(collection)
    }

    fn invalidate(&self, collection: &str) {
        self.cache.invalidate_pattern(&self.inner.endpoint(collection));
        self.inner.invalidate(collection);
    }
}
