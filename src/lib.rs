// ============================================================================
// crm-sync Library
// ============================================================================

pub mod cache;
pub mod config;
pub mod core;
pub mod entities;
pub mod realtime;
pub mod remote;
pub mod store;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use crate::core::{
    Clock, ManualClock, MutationKind, Notification, NotificationLevel, Notifier, Record, Result,
    SyncError, SystemClock,
};
pub use entities::{Company, Contact, Deal, Lead, Task};
pub use realtime::{ConnectionState, FeedTransport, ReconnectPolicy, SubscriptionManager};
pub use remote::RemoteSource;
pub use store::{EntityStore, Statistics, StoreState};

use cache::{JsonFileKv, ResponseCache};
use crate::core::TracingNotifier;
use remote::{CachedRemote, HttpRemote};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

// ============================================================================
// High-level Client API
// ============================================================================

/// Entry point of the sync layer.
///
/// Owns the subscription manager, the remote source, the notifier and the
/// clock, and mounts one [`EntityStore`] per collection on first use. Stores
/// are only weakly referenced: once every caller has dropped its handle the
/// store is freed and its feed subscription released. The next request for
/// the collection mounts a fresh store.
///
/// # Examples
///
/// ```ignore
/// let sync = CrmSync::builder(SyncConfig::new("https://crm.example.com/api"))
///     .transport(feed)
///     .build()?;
///
/// let leads = sync.leads().await;
/// leads.create(LeadPatch { name: Some("Ada".into()), ..Default::default() }).await?;
/// println!("{} leads", leads.statistics().total);
/// ```
pub struct CrmSync {
    config: SyncConfig,
    remote: Arc<dyn RemoteSource>,
    subscriptions: SubscriptionManager,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    stores: Mutex<HashMap<&'static str, Weak<dyn Any + Send + Sync>>>,
}

impl CrmSync {
    pub fn builder(config: SyncConfig) -> CrmSyncBuilder {
        CrmSyncBuilder::new(config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<dyn RemoteSource> {
        &self.remote
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<&'static str, Weak<dyn Any + Send + Sync>>> {
        self.stores.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the live store of `T`'s collection, mounting it if needed.
    ///
    /// Mounting runs the initial fetch and subscribes to the change feed. A
    /// failed fetch does not fail the mount: the store's error slot carries
    /// the message and `refresh()` retries. Callers that find the store while
    /// a fetch is running wait for it, up to the request timeout.
    pub async fn store<T: Record>(&self) -> Arc<EntityStore<T>> {
        let (store, mounted) = {
            let mut stores = self.stores();
            let live = stores
                .get(T::COLLECTION)
                .and_then(Weak::upgrade)
                .and_then(|erased| erased.downcast::<EntityStore<T>>().ok());
            match live {
                Some(store) => (store, false),
                None => {
                    let store = EntityStore::<T>::new(
                        Arc::clone(&self.remote),
                        Arc::clone(&self.notifier),
                        Arc::clone(&self.clock),
                        self.config.recent_limit,
                    );
                    store.mark_loading();
                    let erased: Arc<dyn Any + Send + Sync> = store.clone();
                    stores.insert(T::COLLECTION, Arc::downgrade(&erased));
                    (store, true)
                }
            }
        };

        if !mounted {
            self.wait_until_loaded(&store).await;
            return store;
        }

        debug!(collection = T::COLLECTION, "mounting entity store");
        if let Err(err) = store.open(&self.subscriptions).await {
            warn!(collection = T::COLLECTION, error = %err, "initial fetch failed");
        }
        store
    }

    async fn wait_until_loaded<T: Record>(&self, store: &EntityStore<T>) {
        let mut state = store.watch();
        let timed_out = tokio::time::timeout(
            self.config.request_timeout,
            state.wait_for(|state| !state.loading),
        )
        .await
        .is_err();
        if timed_out {
            debug!(collection = T::COLLECTION, "store still loading, handing it out as is");
        }
    }

    pub async fn leads(&self) -> Arc<EntityStore<Lead>> {
        self.store().await
    }

    pub async fn deals(&self) -> Arc<EntityStore<Deal>> {
        self.store().await
    }

    pub async fn tasks(&self) -> Arc<EntityStore<Task>> {
        self.store().await
    }

    pub async fn contacts(&self) -> Arc<EntityStore<Contact>> {
        self.store().await
    }

    pub async fn companies(&self) -> Arc<EntityStore<Company>> {
        self.store().await
    }

    /// Collections whose store is still referenced somewhere.
    pub fn mounted(&self) -> Vec<&'static str> {
        let mut stores = self.stores();
        stores.retain(|_, store| store.strong_count() > 0);
        let mut names: Vec<&'static str> = stores.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Tears down every subscription and forgets mounted stores. Stores still
    /// held by callers keep their data but receive no further changes.
    pub async fn dispose(&self) {
        self.stores().clear();
        self.subscriptions.dispose().await;
        debug!("sync layer disposed");
    }
}

/// Builder for [`CrmSync`]. Everything except the feed transport has a default.
pub struct CrmSyncBuilder {
    config: SyncConfig,
    transport: Option<Arc<dyn FeedTransport>>,
    remote: Option<Arc<dyn RemoteSource>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    cache_reads: bool,
}

impl CrmSyncBuilder {
    fn new(config: SyncConfig) -> Self {
        Self {
            config,
            transport: None,
            remote: None,
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
            cache_reads: true,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn FeedTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the HTTP remote built from `base_url`.
    pub fn remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sends every `list` straight to the remote.
    pub fn without_cache(mut self) -> Self {
        self.cache_reads = false;
        self
    }

    pub fn build(self) -> Result<CrmSync> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| SyncError::Config("a change feed transport is required".to_string()))?;

        let mut remote: Arc<dyn RemoteSource> = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemote::new(
                &self.config.base_url,
                self.config.request_timeout,
            )?),
        };
        if self.cache_reads {
            let cache = response_cache(&self.config, Arc::clone(&self.clock))?;
            remote = Arc::new(CachedRemote::new(remote, Arc::new(cache)));
        }

        let subscriptions = SubscriptionManager::new(
            transport,
            self.config.reconnect.clone(),
            Arc::clone(&self.notifier),
        );

        Ok(CrmSync {
            config: self.config,
            remote,
            subscriptions,
            notifier: self.notifier,
            clock: self.clock,
            stores: Mutex::new(HashMap::new()),
        })
    }
}

/// Cache sized and timed by `config`, mirrored to `cache_path` when the file
/// can be opened. An unusable file leaves the cache memory-only.
fn response_cache(
    config: &SyncConfig,
    clock: Arc<dyn Clock>,
) -> Result<ResponseCache<serde_json::Value>> {
    let cache = ResponseCache::new(config.cache_capacity()?, config.cache_ttl, clock);
    let Some(path) = &config.cache_path else {
        return Ok(cache);
    };
    match JsonFileKv::open(path) {
        Ok(backing) => Ok(cache.with_backing(Arc::new(backing))),
        Err(err) => {
            log::warn!(
                "response cache file {} unavailable, caching in memory only: {}",
                path.display(),
                err
            );
            Ok(cache)
        }
    }
}
