//! Single-Flight Signing
//!
//! When a popular RRset falls out of the cache, every worker answering it
//! would sign it at the same moment. The coordinator lets exactly one of
//! them run the signing function; the others block until it is done and
//! share its result.
//!
//! The map lock is only held to look up, insert or remove a call. Signing
//! itself runs outside of it, so different keys never wait on each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

use crate::lock_utils::lock_or_recover;

/// Outcome of [`SingleFlight::execute`]
#[derive(Debug, Clone, PartialEq)]
pub struct Flight<V, E> {
    pub result: Result<V, E>,
    /// `false` only for the caller that actually ran the function
    pub shared: bool,
}

enum CallState<V, E> {
    Pending,
    Done(Result<V, E>),
    /// The executing caller unwound before publishing a result
    Abandoned,
}

struct Call<V, E> {
    state: Mutex<CallState<V, E>>,
    done: Condvar,
}

impl<V: Clone, E: Clone> Call<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Pending),
            done: Condvar::new(),
        }
    }

    /// Block until the call completes. `None` means it was abandoned.
    fn wait(&self) -> Option<Result<V, E>> {
        let mut state = lock_or_recover(&self.state, "single-flight call");
        loop {
            match &*state {
                CallState::Pending => {
                    state = self
                        .done
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                CallState::Done(result) => return Some(result.clone()),
                CallState::Abandoned => return None,
            }
        }
    }

    fn complete(&self, outcome: CallState<V, E>) {
        *lock_or_recover(&self.state, "single-flight call") = outcome;
        self.done.notify_all();
    }
}

/// Deduplicates concurrent calls that share a key
pub struct SingleFlight<K, V, E> {
    calls: Mutex<HashMap<K, Arc<Call<V, E>>>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` for `key` unless a call for `key` is already in flight, in
    /// which case wait for it and return its result.
    pub fn execute<F>(&self, key: K, f: F) -> Flight<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let call = loop {
            let (call, leader) = {
                let mut calls = lock_or_recover(&self.calls, "single-flight calls");
                match calls.get(&key) {
                    Some(call) => (Arc::clone(call), false),
                    None => {
                        let call = Arc::new(Call::new());
                        calls.insert(key.clone(), Arc::clone(&call));
                        (call, true)
                    }
                }
            };

            if leader {
                break call;
            }
            if let Some(result) = call.wait() {
                return Flight {
                    result,
                    shared: true,
                };
            }
            // Abandoned: go around, one of the waiters becomes the new leader
        };

        let mut guard = LeaderGuard {
            flight: self,
            key: &key,
            call: &call,
            finished: false,
        };
        let result = f();
        guard.finish(CallState::Done(result.clone()));

        Flight {
            result,
            shared: false,
        }
    }

    /// Number of calls currently in flight
    pub fn in_flight(&self) -> usize {
        lock_or_recover(&self.calls, "single-flight calls").len()
    }

    fn forget(&self, key: &K, call: &Arc<Call<V, E>>) {
        let mut calls = lock_or_recover(&self.calls, "single-flight calls");
        if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, call)) {
            calls.remove(key);
        }
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes the leader's result and deregisters the key, also on unwind
struct LeaderGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    flight: &'a SingleFlight<K, V, E>,
    key: &'a K,
    call: &'a Arc<Call<V, E>>,
    finished: bool,
}

impl<'a, K, V, E> LeaderGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn finish(&mut self, outcome: CallState<V, E>) {
        self.call.complete(outcome);
        self.flight.forget(self.key, self.call);
        self.finished = true;
    }
}

impl<'a, K, V, E> Drop for LeaderGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if !self.finished {
            self.finish(CallState::Abandoned);
        }
    }
}
