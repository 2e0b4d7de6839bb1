use super::RemoteSource;
use crate::core::{Clock, Result, SyncError, SystemClock};
use crate::realtime::{MemoryFeed, RawChangeEvent};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Create,
    Update,
    Delete,
}

/// In-process upstream holding JSON records per collection.
///
/// Assigns server identifiers and timestamps like the real backend, can echo
/// every successful write to a [`MemoryFeed`], and lets callers script
/// failures ([`MemoryRemote::fail_next`]) or hold requests in flight
/// ([`MemoryRemote::hold`] / [`MemoryRemote::release`]).
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    gate: watch::Sender<bool>,
    feed: Option<Arc<MemoryFeed>>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct RemoteState {
    collections: HashMap<String, Vec<JsonValue>>,
    failures: HashMap<RemoteOp, VecDeque<SyncError>>,
    calls: HashMap<RemoteOp, usize>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(RemoteState::default()),
            gate,
            feed: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publishes an INSERT/UPDATE/DELETE event to `feed` after every write.
    pub fn with_feed(mut self, feed: Arc<MemoryFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the contents of `collection`. Order is kept as given.
    pub fn seed(&self, collection: &str, records: Vec<JsonValue>) {
        self.state()
            .collections
            .insert(collection.to_string(), records);
    }

    pub fn records(&self, collection: &str) -> Vec<JsonValue> {
        self.state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// The next `op` fails with `error`. Failures queue up in order.
    pub fn fail_next(&self, op: RemoteOp, error: SyncError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Requests issued from now on wait until [`MemoryRemote::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    async fn enter(&self, op: RemoteOp) -> Result<()> {
        *self.state().calls.entry(op).or_default() += 1;

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| SyncError::Transport("remote shut down".to_string()))?;

        match self
            .state()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn publish(&self, event: RawChangeEvent) {
        if let Some(feed) = &self.feed {
            feed.publish(event);
        }
    }
}

fn not_found(collection: &str, id: &str) -> SyncError {
    SyncError::Rejected {
        status: 404,
        message: format!("{} '{}' not found", collection, id),
    }
}

fn record_id(record: &JsonValue) -> Option<&str> {
    record.get("id").and_then(JsonValue::as_str)
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn list(&self, collection: &str) -> Result<Vec<JsonValue>> {
        self.enter(RemoteOp::List).await?;
        Ok(self.records(collection))
    }

    async fn create(&self, collection: &str, body: JsonValue) -> Result<JsonValue> {
        self.enter(RemoteOp::Create).await?;

        let JsonValue::Object(mut fields) = body else {
            return Err(SyncError::Rejected {
                status: 400,
                message: "request body must be an object".to_string(),
            });
        };
        let now = serde_json::to_value(self.clock.now())?;
        fields.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
        fields.insert("created_at".to_string(), now.clone());
        fields.insert("updated_at".to_string(), now);
        let record = JsonValue::Object(fields);

        self.state()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(0, record.clone());
        self.publish(RawChangeEvent::insert(collection, record.clone()));
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, body: JsonValue) -> Result<JsonValue> {
        self.enter(RemoteOp::Update).await?;

        let JsonValue::Object(patch) = body else {
            return Err(SyncError::Rejected {
                status: 400,
                message: "request body must be an object".to_string(),
            });
        };
        let now = serde_json::to_value(self.clock.now())?;

        let (old, updated) = {
            let mut state = self.state();
            let record = state
                .collections
                .get_mut(collection)
                .and_then(|records| records.iter_mut().find(|r| record_id(r) == Some(id)))
                .ok_or_else(|| not_found(collection, id))?;
            let old = record.clone();
            if let JsonValue::Object(fields) = record {
                for (key, value) in patch {
                    if key != "id" && key != "created_at" {
                        fields.insert(key, value);
                    }
                }
                fields.insert("updated_at".to_string(), now);
            }
            (old, record.clone())
        };

        self.publish(RawChangeEvent::update(collection, Some(old), updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.enter(RemoteOp::Delete).await?;

        let removed = {
            let mut state = self.state();
            let records = state
                .collections
                .get_mut(collection)
                .ok_or_else(|| not_found(collection, id))?;
            let position = records
                .iter()
                .position(|r| record_id(r) == Some(id))
                .ok_or_else(|| not_found(collection, id))?;
            records.remove(position)
        };

        self.publish(RawChangeEvent::delete(collection, json!({ "id": record_id(&removed) })));
        Ok(())
    }
}
