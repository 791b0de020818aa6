//! Per-key debouncing of rapid triggers
//!
//! Rapid registrations for the same key collapse into a single delayed
//! execution: a registration arriving before the pending delay elapses
//! replaces the pending action and resets the deadline, and every caller
//! still waiting on that key receives a clone of the result of whichever
//! action finally fires. An action that has already started executing is
//! never cancelled; registrations during execution open a fresh cycle that
//! runs after the in-flight one completes, so work for one key is fully
//! serialized while distinct keys proceed independently.
//!
//! Per-key state lives in a `DashMap` and each active key owns exactly one
//! worker task, so no lock is held across an `.await`.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

struct KeyState<T> {
    /// Pending action; `None` between firing and the next registration.
    /// The `Mutex` makes the boxed future `Sync` so key state can be held
    /// in a map shared across tasks; it is only ever locked by take-out.
    action: Option<Mutex<BoxFuture<'static, T>>>,
    /// When the pending action is allowed to fire.
    deadline: Instant,
    /// Callers waiting on the current cycle.
    waiters: Vec<oneshot::Sender<Option<T>>>,
    /// Monotonic per-key registration counter, for tracing only.
    generation: u64,
}

/// Coalesces rapid triggers per key into one delayed execution.
pub struct Debouncer<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    state: Arc<DashMap<K, KeyState<T>>>,
}

impl<K, T> Debouncer<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(DashMap::new()),
        }
    }

    /// Register `action` under `key`, superseding any pending (not yet
    /// fired) registration for the same key. Resolves with the result of
    /// the registration that ultimately fires, or `None` if the pending
    /// cycle was cancelled via [`Debouncer::cancel`].
    pub async fn debounce<F>(&self, key: K, delay: Duration, action: F) -> Option<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + delay;
        let spawn_worker = {
            let mut needs_worker = false;
            let mut entry = self.state.entry(key.clone()).or_insert_with(|| {
                needs_worker = true;
                KeyState {
                    action: None,
                    deadline,
                    waiters: Vec::new(),
                    generation: 0,
                }
            });
            let state = entry.value_mut();
            state.action = Some(Mutex::new(action.boxed()));
            state.deadline = deadline;
            state.waiters.push(tx);
            state.generation += 1;
            trace!(generation = state.generation, "debounce registration");
            needs_worker
        };

        if spawn_worker {
            let map = self.state.clone();
            tokio::spawn(Self::run_key(map, key));
        }

        rx.await.unwrap_or(None)
    }

    /// Drop the pending registration for `key`, if any. Waiting callers
    /// resolve with `None`. An in-flight action is unaffected.
    pub fn cancel(&self, key: &K) {
        if let Some(mut entry) = self.state.get_mut(key) {
            let state = entry.value_mut();
            state.action = None;
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(None);
            }
        }
    }

    /// Number of keys with pending or in-flight work (test/observability).
    pub fn active_keys(&self) -> usize {
        self.state.len()
    }

    /// Worker loop owning all execution for one key. Exactly one instance
    /// runs per key at a time; it exits once the key has nothing pending.
    async fn run_key(map: Arc<DashMap<K, KeyState<T>>>, key: K) {
        loop {
            // Wait until the deadline stops moving.
            let fired = loop {
                let deadline = match map.get(&key) {
                    Some(entry) => entry.deadline,
                    None => return,
                };
                tokio::time::sleep_until(deadline).await;
                match map.get_mut(&key) {
                    Some(mut entry) => {
                        let state = entry.value_mut();
                        if state.deadline > Instant::now() {
                            // Superseded while sleeping; wait again.
                            continue;
                        }
                        // Fire: take the action and the waiters of this
                        // cycle. The entry stays in the map so concurrent
                        // registrations queue a follow-up cycle instead of
                        // spawning a second worker.
                        let action = state.action.take().map(Mutex::into_inner);
                        let waiters = std::mem::take(&mut state.waiters);
                        break (action, waiters);
                    }
                    None => return,
                }
            };

            match fired {
                (Some(action), waiters) => {
                    // In-flight: cannot be superseded or cancelled.
                    let result = action.await;
                    for waiter in waiters {
                        let _ = waiter.send(Some(result.clone()));
                    }
                }
                (None, waiters) => {
                    // Cancelled before firing.
                    for waiter in waiters {
                        let _ = waiter.send(None);
                    }
                }
            }

            // Exit unless a new cycle was registered while in flight. The
            // predicate runs under the shard lock, so a racing registration
            // either lands before (worker continues) or after (fresh worker
            // is spawned for the re-inserted entry).
            let mut exited = false;
            map.remove_if(&key, |_, state| {
                let idle = state.action.is_none() && state.waiters.is_empty();
                exited = idle;
                idle
            });
            if exited {
                return;
            }
        }
    }
}

impl<K, T> Default for Debouncer<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
