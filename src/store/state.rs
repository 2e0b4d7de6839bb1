use super::stats::Statistics;
use crate::core::{MutationKind, Record};
use im::Vector;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle of one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Requested,
    Applied,
    Confirmed,
    RolledBack,
}

impl MutationPhase {
    pub fn is_settled(&self) -> bool {
        matches!(self, MutationPhase::Confirmed | MutationPhase::RolledBack)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub id: u64,
    pub action: MutationKind,
    /// Target record; provisional for creates.
    pub record_id: String,
    pub phase: MutationPhase,
}

/// Everything a consumer of an entity store can observe.
#[derive(Debug, Clone)]
pub struct StoreState<T: Record> {
    /// Newest first.
    pub records: Vector<T>,
    pub loading: bool,
    pub error: Option<String>,
    pub statistics: Arc<Statistics<T>>,
    pub pending: BTreeMap<u64, PendingMutation>,
}

impl<T: Record> Default for StoreState<T> {
    fn default() -> Self {
        Self {
            records: Vector::new(),
            loading: false,
            error: None,
            statistics: Arc::new(Statistics::default()),
            pending: BTreeMap::new(),
        }
    }
}

impl<T: Record> StoreState<T> {
    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|record| record.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(Record::id).collect()
    }
}
