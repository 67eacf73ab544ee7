//! Single-flight coordination: at most one in-progress operation per key

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::watch;

/// Outcome of joining a flight for a key
pub enum Flight<'a, K: Hash + Eq + Clone> {
    /// The caller owns the operation and must drop (or `complete`) the guard
    /// once it is finished.
    Leader(FlightGuard<'a, K>),
    /// Someone else owns the operation; wait for it to finish.
    Follower(FlightWaiter),
}

/// Tracks in-progress operations by key.
///
/// The map lock is only held for bookkeeping. The operations themselves run
/// outside it.
pub struct SingleFlight<K: Hash + Eq + Clone> {
    waiting: Mutex<HashMap<K, watch::Receiver<()>>>,
}

impl<K: Hash + Eq + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Register as leader for `key`, or join the flight already running
    pub fn join(&self, key: K) -> Flight<'_, K> {
        let mut waiting = self.waiting.lock();

        if let Some(rx) = waiting.get(&key) {
            return Flight::Follower(FlightWaiter { rx: rx.clone() });
        }

        self.lead(&mut waiting, key)
    }

    /// Like [`join`](Self::join), but when nobody is in flight for `key` the
    /// `done` check runs while the map is still locked. If it returns true no
    /// flight is started and `None` is returned.
    pub fn join_unless<F>(&self, key: K, done: F) -> Option<Flight<'_, K>>
    where
        F: FnOnce() -> bool,
    {
        let mut waiting = self.waiting.lock();

        if let Some(rx) = waiting.get(&key) {
            return Some(Flight::Follower(FlightWaiter { rx: rx.clone() }));
        }

        if done() {
            return None;
        }

        Some(self.lead(&mut waiting, key))
    }

    fn lead(&self, waiting: &mut HashMap<K, watch::Receiver<()>>, key: K) -> Flight<'_, K> {
        let (tx, rx) = watch::channel(());
        waiting.insert(key.clone(), rx);

        Flight::Leader(FlightGuard {
            flight: self,
            key,
            _release: tx,
        })
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.waiting.lock().contains_key(key)
    }

    /// Number of keys currently in flight
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

impl<K: Hash + Eq + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of an in-progress operation.
///
/// Dropping the guard first removes the key from the waiting set and then
/// releases every follower, so a follower never sees a stale entry and a new
/// leader can start as soon as this one is gone. This also happens when the
/// leader's future is cancelled.
pub struct FlightGuard<'a, K: Hash + Eq + Clone> {
    flight: &'a SingleFlight<K>,
    key: K,
    _release: watch::Sender<()>,
}

impl<K: Hash + Eq + Clone> FlightGuard<'_, K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Finish the flight and release all followers
    pub fn complete(self) {}
}

impl<K: Hash + Eq + Clone> Drop for FlightGuard<'_, K> {
    fn drop(&mut self) {
        self.flight.waiting.lock().remove(&self.key);
        // `_release` is dropped after this, which wakes the followers
    }
}

/// Handle for waiting on somebody else's flight
pub struct FlightWaiter {
    rx: watch::Receiver<()>,
}

impl FlightWaiter {
    /// Resolves once the leader finishes, whether it succeeded, failed or
    /// was cancelled
    pub async fn wait(mut self) {
        // The sender never publishes; the only wake-up is it being dropped.
        while self.rx.changed().await.is_ok() {}
    }
}
