#![allow(dead_code)]

use crm_sync::core::{MemoryNotifier, SystemClock};
use crm_sync::realtime::{MemoryFeed, ReconnectPolicy, SubscriptionManager};
use crm_sync::remote::{MemoryRemote, RemoteSource};
use crm_sync::store::{EntityStore, StoreState};
use crm_sync::Record;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub remote: Arc<MemoryRemote>,
    pub feed: Arc<MemoryFeed>,
    pub notifier: Arc<MemoryNotifier>,
    pub manager: SubscriptionManager,
}

impl Harness {
    /// Remote writes are echoed on the feed, like the hosted backend does.
    pub fn new() -> Self {
        let feed = Arc::new(MemoryFeed::new());
        let remote = Arc::new(MemoryRemote::new().with_feed(feed.clone()));
        let notifier = Arc::new(MemoryNotifier::new());
        let manager =
            SubscriptionManager::new(feed.clone(), ReconnectPolicy::default(), notifier.clone());
        Self {
            remote,
            feed,
            notifier,
            manager,
        }
    }

    pub fn store<T: Record>(&self) -> Arc<EntityStore<T>> {
        store_over(self.remote.clone(), self.notifier.clone())
    }
}

pub fn store_over<T: Record>(
    remote: Arc<dyn RemoteSource>,
    notifier: Arc<MemoryNotifier>,
) -> Arc<EntityStore<T>> {
    EntityStore::new(remote, notifier, Arc::new(SystemClock), 5)
}

/// Lets spawned tasks (feed pumps, in-flight mutations) run.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Waits until the store publishes a state matching `predicate`.
pub async fn wait_for_state<T, F>(store: &EntityStore<T>, predicate: F)
where
    T: Record,
    F: FnMut(&StoreState<T>) -> bool,
{
    let mut rx = store.watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("store never reached the expected state")
        .expect("store dropped");
}
