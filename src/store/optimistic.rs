use crate::core::{Result, SyncError};
use std::future::Future;

/// Runs one optimistic mutation.
///
/// `apply_local` runs before the remote future is first polled and returns a
/// guard describing what it changed. On success the guard and the remote value
/// go to `reconcile`; on failure the guard and the error go to `recover`,
/// which undoes or resyncs and yields the error handed back to the caller.
pub async fn run_optimistic<G, V, A, F, C, R, RF>(
    apply_local: A,
    remote: F,
    reconcile: C,
    recover: R,
) -> Result<V>
where
    A: FnOnce() -> G,
    F: Future<Output = Result<V>>,
    C: FnOnce(G, &V),
    R: FnOnce(G, SyncError) -> RF,
    RF: Future<Output = SyncError>,
{
    let guard = apply_local();
    match remote.await {
        Ok(value) => {
            reconcile(guard, &value);
            Ok(value)
        }
        Err(err) => Err(recover(guard, err).await),
    }
}
