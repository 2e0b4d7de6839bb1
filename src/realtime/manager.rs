// ============================================================================
// Subscription Manager
// ============================================================================
//
// Owns one feed channel per collection and fans every delivered change out to
// the handlers registered for that collection, in registration order.
//
// Connection state machine:
//
//   Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//                                                           -> Failed
//
// A lost channel (or a failed connect) starts a single recovery task that
// retries with exponential backoff. After `max_attempts` failed retries the
// manager parks in `Failed` and stays there until `reconnect()` is called.
//
// ============================================================================

use super::backoff::{BackoffPolicy, ReconnectPolicy};
use super::event::RawChangeEvent;
use super::transport::{ChannelStatus, FeedMessage, FeedTransport};
use crate::core::{Notification, Notifier, Result, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked for every change event of a collection.
pub type ChangeHandler = Arc<dyn Fn(&RawChangeEvent) + Send + Sync>;

/// Callback invoked with the connectivity flag.
pub type ConnectivityObserver = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

enum FeedSlot {
    Idle,
    Opening,
    Live { generation: u64, pump: JoinHandle<()> },
}

struct CollectionFeed {
    handlers: Vec<(u64, ChangeHandler)>,
    slot: FeedSlot,
}

#[derive(Default)]
struct Registry {
    next_handler_id: u64,
    next_generation: u64,
    collections: HashMap<String, CollectionFeed>,
}

struct Shared {
    transport: Arc<dyn FeedTransport>,
    policy: ReconnectPolicy,
    notifier: Arc<dyn Notifier>,
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    recovery: Mutex<Option<JoinHandle<()>>>,
    observer: Mutex<Option<ConnectivityObserver>>,
    failure_reported: AtomicBool,
}

/// Multiplexes change feeds and keeps them alive across transport failures.
///
/// Cloning is cheap; clones share the same registry and connection.
#[derive(Clone)]
pub struct SubscriptionManager {
    shared: Arc<Shared>,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        policy: ReconnectPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                policy,
                notifier,
                registry: Mutex::new(Registry::default()),
                state,
                attempts: AtomicU32::new(0),
                recovery: Mutex::new(None),
                observer: Mutex::new(None),
                failure_reported: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnection attempts made since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared
            .attempts
            .load(Ordering::SeqCst)
            .min(self.shared.policy.max_attempts)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.shared.policy
    }

    /// Registers the connectivity observer, replacing any previous one.
    ///
    /// Called with `true` whenever a connection is (re)established and once
    /// with `false` when retries are exhausted.
    pub fn on_connectivity<F>(&self, observer: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *lock(&self.shared.observer) = Some(Arc::new(observer));
    }

    /// Collections with at least one registered handler.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.registry().collections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn handler_count(&self, collection: &str) -> usize {
        self.shared
            .registry()
            .collections
            .get(collection)
            .map_or(0, |feed| feed.handlers.len())
    }

    /// Registers `on_change` for `collection` and makes sure the feed is open.
    ///
    /// Never fails: connection problems are handled by the recovery loop and
    /// the handler is attached as soon as a channel is available.
    pub async fn subscribe<F>(&self, collection: &str, on_change: F) -> Subscription
    where
        F: Fn(&RawChangeEvent) + Send + Sync + 'static,
    {
        let handler: ChangeHandler = Arc::new(on_change);
        let handler_id = {
            let mut registry = self.shared.registry();
            registry.next_handler_id += 1;
            let id = registry.next_handler_id;
            registry
                .collections
                .entry(collection.to_string())
                .or_insert_with(|| CollectionFeed {
                    handlers: Vec::new(),
                    slot: FeedSlot::Idle,
                })
                .handlers
                .push((id, handler));
            id
        };
        debug!(collection, handler_id, "registered change handler");

        match self.state() {
            ConnectionState::Disconnected => self.shared.start().await,
            ConnectionState::Connected => self.shared.open_idle().await,
            // Recovery in flight or parked in Failed: attached on next connection.
            _ => {}
        }

        Subscription {
            collection: collection.to_string(),
            handler_id,
            shared: Arc::downgrade(&self.shared),
            active: AtomicBool::new(true),
        }
    }

    /// Tears every channel down and establishes the feed again from scratch.
    ///
    /// Cancels any pending backoff timer and resets the attempt counter. All
    /// registered handlers are re-attached. On failure a fresh backoff cycle
    /// starts and the error is returned.
    pub async fn reconnect(&self) -> Result<()> {
        let shared = &self.shared;
        if let Some(task) = lock(&shared.recovery).take() {
            task.abort();
        }
        shared.attempts.store(0, Ordering::SeqCst);
        shared.failure_reported.store(false, Ordering::SeqCst);
        shared.state.send_replace(ConnectionState::Connecting);
        info!("manual change feed reconnect requested");

        match shared.establish().await {
            Ok(()) => {
                shared.mark_connected();
                shared.open_idle().await;
                Ok(())
            }
            Err(err) => {
                shared.schedule_recovery(err.clone());
                Err(err)
            }
        }
    }

    /// Releases every channel and handler and disconnects the transport.
    pub async fn dispose(&self) {
        let shared = &self.shared;
        if let Some(task) = lock(&shared.recovery).take() {
            task.abort();
        }
        shared.teardown_channels();
        shared.registry().collections.clear();
        shared.transport.disconnect().await;
        shared.attempts.store(0, Ordering::SeqCst);
        shared.state.send_replace(ConnectionState::Disconnected);
        debug!("subscription manager disposed");
    }
}

/// Handle for one registered handler.
///
/// `unsubscribe` is idempotent; dropping the handle unsubscribes too. When the
/// last handler of a collection goes away its channel is released.
pub struct Subscription {
    collection: String,
    handler_id: u64,
    shared: Weak<Shared>,
    active: AtomicBool,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.detach(&self.collection, self.handler_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .field("handler_id", &self.handler_id)
            .field("active", &self.is_active())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// First connection. Only the caller that moves the manager out of
    /// `Disconnected` performs it.
    async fn start(self: &Arc<Self>) {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            if self.current_state() == ConnectionState::Connected {
                self.open_idle().await;
            }
            return;
        }

        match self.transport.connect().await {
            Ok(()) => {
                self.mark_connected();
                self.open_idle().await;
            }
            Err(err) => self.schedule_recovery(err),
        }
    }

    /// Marks every idle collection as opening and returns their names.
    fn claim_idle(&self) -> Vec<String> {
        let mut registry = self.registry();
        registry
            .collections
            .iter_mut()
            .filter(|(_, feed)| matches!(feed.slot, FeedSlot::Idle))
            .map(|(name, feed)| {
                feed.slot = FeedSlot::Opening;
                name.clone()
            })
            .collect()
    }

    fn reset_opening(&self) {
        for feed in self.registry().collections.values_mut() {
            if matches!(feed.slot, FeedSlot::Opening) {
                feed.slot = FeedSlot::Idle;
            }
        }
    }

    /// Opens channels for idle collections while connected; any failure hands
    /// over to the recovery loop.
    async fn open_idle(self: &Arc<Self>) {
        for name in self.claim_idle() {
            if let Err(err) = self.open_channel(&name).await {
                self.reset_opening();
                self.schedule_recovery(err);
                return;
            }
        }
    }

    async fn open_channel(self: &Arc<Self>, collection: &str) -> Result<()> {
        let channel = match self.transport.subscribe(collection).await {
            Ok(channel) => channel,
            Err(err) => {
                if let Some(feed) = self.registry().collections.get_mut(collection) {
                    feed.slot = FeedSlot::Idle;
                }
                return Err(err);
            }
        };

        let mut registry = self.registry();
        registry.next_generation += 1;
        let generation = registry.next_generation;
        match registry.collections.get_mut(collection) {
            Some(feed) if matches!(feed.slot, FeedSlot::Opening) => {
                let pump = tokio::spawn(pump(
                    Arc::downgrade(self),
                    collection.to_string(),
                    generation,
                    channel.messages,
                ));
                feed.slot = FeedSlot::Live { generation, pump };
                debug!(collection, generation, "change feed channel open");
            }
            _ => {
                // Unsubscribed or torn down while the channel was opening.
                drop(registry);
                self.transport.release(collection);
            }
        }
        Ok(())
    }

    /// Connects and reopens every registered collection.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        self.teardown_channels();
        self.transport.connect().await?;
        for name in self.claim_idle() {
            if let Err(err) = self.open_channel(&name).await {
                self.reset_opening();
                return Err(err);
            }
        }
        Ok(())
    }

    fn teardown_channels(&self) {
        let released: Vec<String> = {
            let mut registry = self.registry();
            registry
                .collections
                .iter_mut()
                .map(|(name, feed)| {
                    if let FeedSlot::Live { pump, .. } =
                        std::mem::replace(&mut feed.slot, FeedSlot::Idle)
                    {
                        pump.abort();
                    }
                    name.clone()
                })
                .collect()
        };
        for name in released {
            self.transport.release(&name);
        }
    }

    fn dispatch(&self, collection: &str, event: &RawChangeEvent) {
        let handlers: Vec<ChangeHandler> = match self.registry().collections.get(collection) {
            Some(feed) => feed.handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };
        for handler in handlers {
            handler(event);
        }
    }

    fn channel_lost(self: &Arc<Self>, collection: &str, generation: u64, status: ChannelStatus) {
        {
            let mut registry = self.registry();
            let Some(feed) = registry.collections.get_mut(collection) else {
                return;
            };
            let current = matches!(
                &feed.slot,
                FeedSlot::Live { generation: live, .. } if *live == generation
            );
            if !current {
                // A newer channel already replaced this one.
                return;
            }
            feed.slot = FeedSlot::Idle;
        }
        self.schedule_recovery(SyncError::Subscription(format!(
            "channel for '{}' ended with {:?}",
            collection, status
        )));
    }

    fn detach(&self, collection: &str, handler_id: u64) {
        let released = {
            let mut registry = self.registry();
            let Some(feed) = registry.collections.get_mut(collection) else {
                return;
            };
            feed.handlers.retain(|(id, _)| *id != handler_id);
            if feed.handlers.is_empty() {
                if let Some(feed) = registry.collections.remove(collection) {
                    if let FeedSlot::Live { pump, .. } = feed.slot {
                        pump.abort();
                    }
                }
                true
            } else {
                false
            }
        };
        debug!(collection, handler_id, released, "change handler detached");
        if released {
            self.transport.release(collection);
        }
    }

    fn schedule_recovery(self: &Arc<Self>, cause: SyncError) {
        let mut recovery = lock(&self.recovery);
        let entered = self.state.send_if_modified(|state| match state {
            ConnectionState::Reconnecting { .. } | ConnectionState::Failed => false,
            _ => {
                *state = ConnectionState::Reconnecting { attempt: 0 };
                true
            }
        });
        if !entered {
            debug!(error = %cause, "recovery already running or connection failed");
            return;
        }

        warn!(error = %cause, "change feed unavailable, scheduling reconnection");
        let shared = Arc::clone(self);
        *recovery = Some(tokio::spawn(async move { shared.recover().await }));
    }

    async fn recover(self: Arc<Self>) {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.policy.allows(attempt) {
                self.enter_failed();
                return;
            }

            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });
            let delay = self.policy.delay_for_attempt(attempt);
            info!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting change feed"
            );
            tokio::time::sleep(delay).await;

            match self.establish().await {
                Ok(()) => {
                    self.mark_connected();
                    self.open_idle().await;
                    return;
                }
                Err(err) => warn!(attempt, error = %err, "reconnection attempt failed"),
            }
        }
    }

    fn mark_connected(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.failure_reported.store(false, Ordering::SeqCst);
        let previous = self.state.send_replace(ConnectionState::Connected);
        if previous != ConnectionState::Connected {
            info!(?previous, "change feed connected");
            self.emit_connectivity(true);
        }
    }

    fn enter_failed(&self) {
        self.state.send_replace(ConnectionState::Failed);
        if self.failure_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(
            max_attempts = self.policy.max_attempts,
            "change feed reconnection attempts exhausted"
        );
        self.emit_connectivity(false);
        self.notifier.notify(Notification::connection_lost(
            "Realtime connection lost. Reload to resume live updates.",
        ));
    }

    fn emit_connectivity(&self, connected: bool) {
        let observer = lock(&self.observer).clone();
        if let Some(observer) = observer {
            observer(connected);
        }
    }
}

async fn pump(
    shared: Weak<Shared>,
    collection: String,
    generation: u64,
    mut messages: mpsc::UnboundedReceiver<FeedMessage>,
) {
    let mut last_status = ChannelStatus::Closed;
    while let Some(message) = messages.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match message {
            FeedMessage::Change(mut event) => {
                if event.collection.is_empty() {
                    event.collection = collection.clone();
                }
                shared.dispatch(&collection, &event);
            }
            FeedMessage::Status(ChannelStatus::Subscribed) => {
                debug!(collection = %collection, "channel subscribed");
            }
            FeedMessage::Status(status) => {
                last_status = status;
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.channel_lost(&collection, generation, last_status);
    }
}
