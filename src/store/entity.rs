// ============================================================================
// Entity Store
// ============================================================================
//
// Client-side state of one CRM collection. Local mutations are applied
// before the server answers and are then confirmed, rolled back or resynced:
//
//   create  insert provisional record -> swap in server record | remove it
//   update  merge patch in place      -> overwrite with server record | refetch
//   delete  snapshot, remove          -> keep | restore snapshot exactly
//
// Change events from the feed are reconciled independently of mutations via
// the idempotent edits in `reconcile`. Statistics are recomputed after every
// edit of the collection.
//
// ============================================================================

use super::optimistic::run_optimistic;
use super::reconcile;
use super::state::{MutationPhase, PendingMutation, StoreState};
use super::stats::Statistics;
use crate::core::{
    Clock, MutationKind, Notification, Notifier, Record, Result, SyncError, is_provisional,
    provisional_id,
};
use crate::realtime::{ChangeEvent, RawChangeEvent, Subscription, SubscriptionManager};
use crate::remote::RemoteSource;
use futures::future::ready;
use im::Vector;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct EntityStore<T: Record> {
    remote: Arc<dyn RemoteSource>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    recent_limit: usize,
    state: watch::Sender<StoreState<T>>,
    next_mutation: AtomicU64,
    subscription: Mutex<Option<Subscription>>,
}

impl<T: Record> EntityStore<T> {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        recent_limit: usize,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(StoreState::default());
        let store = Self {
            remote,
            notifier,
            clock,
            recent_limit,
            state,
            next_mutation: AtomicU64::new(0),
            subscription: Mutex::new(None),
        };
        // Empty collection still reports every breakdown field.
        store.edit_records(|_| true);
        Arc::new(store)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    pub fn snapshot(&self) -> StoreState<T> {
        self.state.borrow().clone()
    }

    /// Receives every published state. Dropping the receiver stops delivery
    /// without affecting requests already in flight.
    pub fn watch(&self) -> watch::Receiver<StoreState<T>> {
        self.state.subscribe()
    }

    pub fn records(&self) -> Vector<T> {
        self.state.borrow().records.clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.state.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn statistics(&self) -> Arc<Statistics<T>> {
        Arc::clone(&self.state.borrow().statistics)
    }

    /// Mutations applied locally and still waiting for the server.
    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.state.borrow().pending.values().cloned().collect()
    }

    pub fn is_attached(&self) -> bool {
        self.subscription_slot()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    /// Fetches the collection and replaces local state with it.
    ///
    /// The loading flag is set for the duration. On failure the error slot
    /// holds the message and the records are left untouched.
    pub async fn load(&self) -> Result<()> {
        self.edit_state(|state| {
            state.loading = true;
            state.error = None;
            true
        });

        let fetched = match self.remote.list(T::COLLECTION).await {
            Ok(values) => values
                .into_iter()
                .map(|value| self.accept(value))
                .collect::<Result<Vec<T>>>(),
            Err(err) => Err(err),
        };

        match fetched {
            Ok(records) => {
                let count = records.len();
                self.state.send_modify(|state| {
                    reconcile::replace_all(&mut state.records, records);
                    state.loading = false;
                    state.error = None;
                    state.statistics = Arc::new(Statistics::compute(&state.records, self.recent_limit));
                });
                debug!(collection = T::COLLECTION, count, "collection loaded");
                Ok(())
            }
            Err(err) => {
                warn!(collection = T::COLLECTION, error = %err, "failed to load collection");
                self.edit_state(|state| {
                    state.loading = false;
                    state.error = Some(err.message());
                    true
                });
                Err(err)
            }
        }
    }

    /// Raises the loading flag ahead of a fetch that has not started yet.
    pub(crate) fn mark_loading(&self) {
        self.edit_state(|state| {
            let changed = !state.loading;
            state.loading = true;
            changed
        });
    }

    /// Drops cached reads and fetches the collection again.
    pub async fn refresh(&self) -> Result<()> {
        self.remote.invalidate(T::COLLECTION);
        self.load().await
    }

    // ------------------------------------------------------------------
    // Change feed wiring
    // ------------------------------------------------------------------

    /// Routes the collection's change feed into this store.
    ///
    /// The handler only holds a weak reference, so the store can be dropped
    /// while subscribed; dropping it releases the subscription.
    pub async fn attach(self: &Arc<Self>, manager: &SubscriptionManager) {
        let store = Arc::downgrade(self);
        let subscription = manager
            .subscribe(T::COLLECTION, move |event| {
                if let Some(store) = store.upgrade() {
                    store.handle_raw_event(event);
                }
            })
            .await;
        let previous = self.subscription_slot().replace(subscription);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
    }

    pub fn detach(&self) {
        let subscription = self.subscription_slot().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    /// Initial fetch followed by the feed subscription. The subscription is
    /// made even when the fetch fails so later changes are not missed.
    pub async fn open(self: &Arc<Self>, manager: &SubscriptionManager) -> Result<()> {
        let loaded = self.load().await;
        self.attach(manager).await;
        loaded
    }

    /// Decodes and reconciles one feed event. Undecodable events are logged
    /// and dropped.
    pub fn handle_raw_event(&self, raw: &RawChangeEvent) {
        let event = ChangeEvent::<T>::decode(raw).and_then(|event| match event {
            ChangeEvent::Insert(record) => self.validate(record).map(ChangeEvent::Insert),
            ChangeEvent::Update(record) => self.validate(record).map(ChangeEvent::Update),
            delete => Ok(delete),
        });
        match event {
            Ok(event) => {
                self.apply_remote_change(event);
            }
            Err(err) => warn!(
                collection = T::COLLECTION,
                kind = ?raw.kind,
                error = %err,
                "dropping undecodable change event"
            ),
        }
    }

    /// Applies a feed change. Returns whether the collection changed.
    ///
    /// Cached reads of the collection are dropped either way: the server has
    /// moved past them, and a later mount must not fetch the old list.
    pub fn apply_remote_change(&self, event: ChangeEvent<T>) -> bool {
        let kind = event.kind();
        let record_id = event.record_id().to_string();
        self.remote.invalidate(T::COLLECTION);
        let changed = self.edit_records(|records| match event {
            ChangeEvent::Insert(record) => reconcile::apply_insert(records, record),
            ChangeEvent::Update(record) => reconcile::apply_update(records, record),
            ChangeEvent::Delete { id } => reconcile::apply_delete(records, &id),
        });
        debug!(
            collection = T::COLLECTION,
            record_id = %record_id,
            ?kind,
            changed,
            "change event reconciled"
        );
        changed
    }

    // ------------------------------------------------------------------
    // Optimistic mutations
    // ------------------------------------------------------------------

    /// Creates a record from `draft`.
    ///
    /// A provisional record is at the front of the collection before the
    /// request is sent. It is replaced in place by the server's record, or
    /// removed again if the request fails.
    pub async fn create(&self, draft: T::Patch) -> Result<T> {
        let body = serde_json::to_value(&draft)?;
        let now = self.clock.now();
        let provisional = self.fresh_provisional_id(now);
        let record = T::draft(provisional.clone(), now, &draft);
        let mutation = self.begin(MutationKind::Create, &provisional);

        let request = self.remote.create(T::COLLECTION, body);
        run_optimistic(
            || {
                self.edit_records(|records| {
                    records.push_front(record);
                    true
                });
                self.advance(mutation, MutationPhase::Applied);
                provisional
            },
            async move { self.accept(request.await?) },
            |provisional, confirmed: &T| {
                self.edit_records(|records| {
                    reconcile::confirm_create(records, &provisional, confirmed.clone())
                });
                self.settle(mutation, MutationPhase::Confirmed);
                self.succeed(MutationKind::Create, confirmed.id());
            },
            |provisional, err| {
                self.edit_records(|records| reconcile::apply_delete(records, &provisional));
                self.settle(mutation, MutationPhase::RolledBack);
                ready(self.fail(MutationKind::Create, &provisional, err))
            },
        )
        .await
    }

    /// Merges `patch` into record `id`, then overwrites it with the server's
    /// record. A failed request triggers a full refetch instead of undoing the
    /// patch locally.
    pub async fn update(&self, id: &str, patch: T::Patch) -> Result<T> {
        if is_provisional(id) || self.get(id).is_none() {
            let err = SyncError::NotFound {
                entity: T::ENTITY,
                id: id.to_string(),
            };
            return Err(self.fail(MutationKind::Update, id, err));
        }

        let body = serde_json::to_value(&patch)?;
        let now = self.clock.now();
        let mutation = self.begin(MutationKind::Update, id);

        let request = self.remote.update(T::COLLECTION, id, body);
        run_optimistic(
            || {
                self.edit_records(|records| match reconcile::position(records, id) {
                    Some(index) => {
                        let mut merged = records[index].clone();
                        merged.apply_patch(&patch, now);
                        records.set(index, merged);
                        true
                    }
                    None => false,
                });
                self.advance(mutation, MutationPhase::Applied);
            },
            async move { self.accept(request.await?) },
            |_, confirmed: &T| {
                self.edit_records(|records| reconcile::apply_update(records, confirmed.clone()));
                self.settle(mutation, MutationPhase::Confirmed);
                self.succeed(MutationKind::Update, id);
            },
            |_, err| async move {
                self.settle(mutation, MutationPhase::RolledBack);
                if let Err(resync) = self.refresh().await {
                    warn!(
                        collection = T::COLLECTION,
                        error = %resync,
                        "resync after failed update also failed"
                    );
                }
                self.fail(MutationKind::Update, id, err)
            },
        )
        .await
    }

    /// Removes record `id`. A failed request restores the collection exactly
    /// as it was before the removal.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if is_provisional(id) || self.get(id).is_none() {
            let err = SyncError::NotFound {
                entity: T::ENTITY,
                id: id.to_string(),
            };
            return Err(self.fail(MutationKind::Delete, id, err));
        }

        let mutation = self.begin(MutationKind::Delete, id);
        let request = self.remote.delete(T::COLLECTION, id);
        run_optimistic(
            || {
                let snapshot = self.records();
                self.edit_records(|records| reconcile::apply_delete(records, id));
                self.advance(mutation, MutationPhase::Applied);
                snapshot
            },
            request,
            |_, _| {
                self.settle(mutation, MutationPhase::Confirmed);
                self.succeed(MutationKind::Delete, id);
            },
            |snapshot, err| {
                self.edit_records(|records| {
                    *records = snapshot;
                    true
                });
                self.settle(mutation, MutationPhase::RolledBack);
                ready(self.fail(MutationKind::Delete, id, err))
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn subscription_slot(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publishes a state change when `edit` reports one.
    fn edit_state(&self, edit: impl FnOnce(&mut StoreState<T>) -> bool) -> bool {
        self.state.send_if_modified(edit)
    }

    /// Edits the collection and recomputes statistics when it changed.
    fn edit_records(&self, edit: impl FnOnce(&mut Vector<T>) -> bool) -> bool {
        let recent_limit = self.recent_limit;
        self.state.send_if_modified(|state| {
            if !edit(&mut state.records) {
                return false;
            }
            state.statistics = Arc::new(Statistics::compute(&state.records, recent_limit));
            true
        })
    }

    /// Decodes a server record and rejects identifiers the server never
    /// hands out.
    fn accept(&self, value: JsonValue) -> Result<T> {
        let record: T = serde_json::from_value(value)?;
        self.validate(record)
    }

    fn validate(&self, record: T) -> Result<T> {
        if record.id().is_empty() || is_provisional(record.id()) {
            return Err(SyncError::Malformed(format!(
                "{} record without a server identifier: '{}'",
                T::ENTITY,
                record.id()
            )));
        }
        Ok(record)
    }

    fn fresh_provisional_id(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        let state = self.state.borrow();
        loop {
            let id = provisional_id(now);
            if state.get(&id).is_none() {
                return id;
            }
        }
    }

    fn begin(&self, action: MutationKind, record_id: &str) -> u64 {
        let id = self.next_mutation.fetch_add(1, Ordering::SeqCst) + 1;
        self.edit_state(|state| {
            state.pending.insert(
                id,
                PendingMutation {
                    id,
                    action,
                    record_id: record_id.to_string(),
                    phase: MutationPhase::Requested,
                },
            );
            true
        });
        id
    }

    fn advance(&self, mutation: u64, phase: MutationPhase) {
        self.edit_state(|state| match state.pending.get_mut(&mutation) {
            Some(pending) if pending.phase != phase => {
                pending.phase = phase;
                true
            }
            _ => false,
        });
    }

    /// Moves a mutation to its final phase and drops it from the pending set.
    fn settle(&self, mutation: u64, phase: MutationPhase) {
        let mut settled = None;
        self.edit_state(|state| {
            settled = state.pending.remove(&mutation);
            settled.is_some()
        });
        if let Some(pending) = settled {
            debug!(
                collection = T::COLLECTION,
                mutation,
                action = %pending.action,
                record_id = %pending.record_id,
                ?phase,
                "mutation settled"
            );
        }
    }

    fn succeed(&self, action: MutationKind, record_id: &str) {
        info!(collection = T::COLLECTION, %action, record_id, "mutation confirmed");
        let verb = match action {
            MutationKind::Create => "created",
            MutationKind::Update => "updated",
            MutationKind::Delete => "deleted",
        };
        self.notifier.notify(Notification::success(
            T::ENTITY,
            action.as_str(),
            format!("{} {} successfully", T::ENTITY, verb),
        ));
    }

    /// Normalizes `err`, reports it and returns what the caller receives.
    fn fail(&self, action: MutationKind, record_id: &str, err: SyncError) -> SyncError {
        let err = err.into_mutation_failure(T::ENTITY, action);
        warn!(collection = T::COLLECTION, %action, record_id, error = %err, "mutation failed");
        self.notifier
            .notify(Notification::error(T::ENTITY, action.as_str(), err.to_string()));
        err
    }
}

impl<T: Record> Drop for EntityStore<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription_slot().take() {
            subscription.unsubscribe();
        }
    }
}

impl<T: Record> std::fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EntityStore")
            .field("collection", &T::COLLECTION)
            .field("records", &state.records.len())
            .field("loading", &state.loading)
            .field("pending", &state.pending.len())
            .finish()
    }
}
