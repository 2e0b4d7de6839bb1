//! Per-collection client state: the optimistic mutation protocol, change
//! reconciliation and derived statistics.

pub mod entity;
pub mod optimistic;
pub mod reconcile;
pub mod state;
pub mod stats;

pub use entity::EntityStore;
pub use optimistic::run_optimistic;
pub use state::{MutationPhase, PendingMutation, StoreState};
pub use stats::{Statistics, UNKNOWN_BUCKET};
