//! Collapses concurrent fetches for the same cache key into one upstream
//! call.
//!
//! The first caller for a key becomes the leader and runs the fetch; callers
//! arriving while it is pending subscribe to the leader's outcome instead of
//! hitting the extractor themselves. Failures reach every waiter, and a
//! leader that disappears without reporting (its request was cancelled)
//! closes the channel, so waiters re-elect a leader rather than hang.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

type PendingMap<T, E> = Arc<Mutex<HashMap<String, broadcast::Sender<Result<T, E>>>>>;

/// In-flight fetches keyed by cache key.
pub struct FlightGroup<T, E> {
    pending: PendingMap<T, E>,
}

impl<T, E> FlightGroup<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `fetch` for `key` unless another caller already is, in which
    /// case the result of that in-flight call is awaited and shared.
    ///
    /// The pending slot is cleared before the outcome is broadcast, so a
    /// request arriving after completion starts a fresh flight instead of
    /// subscribing to a dead channel. `fetch` is invoked at most once per
    /// caller.
    pub async fn run<F, Fut>(&self, key: &str, mut fetch: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            let role = {
                let mut pending = self.pending.lock();
                match pending.entry(key.to_owned()) {
                    Entry::Occupied(slot) => Err(slot.get().subscribe()),
                    Entry::Vacant(slot) => {
                        let (tx, _rx) = broadcast::channel(1);
                        slot.insert(tx.clone());
                        Ok(tx)
                    }
                }
            };

            match role {
                Ok(tx) => {
                    let slot = ClearSlot {
                        pending: Arc::clone(&self.pending),
                        key: key.to_owned(),
                    };
                    let result = fetch().await;
                    drop(slot);
                    let _ = tx.send(result.clone());
                    return result;
                }
                Err(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    // Leader vanished without reporting; elect a new one.
                    Err(_) => continue,
                },
            }
        }
    }
}

impl<T, E> Default for FlightGroup<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the pending slot when the leader finishes or is dropped
/// mid-flight.
struct ClearSlot<T, E> {
    pending: PendingMap<T, E>,
    key: String,
}

impl<T, E> Drop for ClearSlot<T, E> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}
