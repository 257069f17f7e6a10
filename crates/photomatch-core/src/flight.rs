//! Key-scoped single-flight de-duplication.
//!
//! Concurrent callers asking for the same key while a fetch is running join
//! that fetch and receive a clone of its output instead of starting another.
//! The entry is removed once the fetch resolves, so a later call after a
//! failure starts fresh.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

/// In-flight fetches keyed by `K`, each resolving to a shared `T`.
pub struct SingleFlight<K, T: Clone> {
    in_flight: Mutex<HashMap<K, Shared<BoxFuture<'static, T>>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `start` for `key` unless a fetch for the same key is already running,
    /// in which case wait for that one.
    ///
    /// `start` is only invoked when this caller becomes the leader.
    pub async fn run<F>(&self, key: K, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let flight = self
            .lock()
            .entry(key.clone())
            .or_insert_with(|| start().shared())
            .clone();

        let output = flight.clone().await;

        let mut in_flight = self.lock();
        if in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&flight))
        {
            in_flight.remove(&key);
        }
        output
    }

    /// Number of keys with a fetch currently running.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Shared<BoxFuture<'static, T>>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
