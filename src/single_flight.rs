// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-flight de-duplication of concurrent async work.
//!
//! A [`SingleFlight`] maps an operation key to the shared handle of the
//! work currently in progress for that key. Late callers attach to the
//! existing handle instead of starting the work again, so N concurrent
//! callers trigger exactly one underlying operation and all observe the
//! same outcome.
//!
//! The work runs on a spawned task: a caller that stops waiting (for
//! example on a local timeout) does not cancel it, and its result is
//! still delivered to every other waiter. The map entry is removed by the
//! task itself once the work completes.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

/// Shared handle to in-flight work; cloneable and awaitable by many callers.
pub type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

type InflightMap<K, T, E> = Arc<Mutex<HashMap<K, SharedResult<T, E>>>>;

/// Keyed single-flight group.
pub struct SingleFlight<K, T, E> {
    inflight: InflightMap<K, T, E>,
}

impl<K, T, E> Default for SingleFlight<K, T, E> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight work for `key`, or start it with `start`.
    ///
    /// `start` is only invoked when nothing is in flight for the key.
    pub fn run<F, Fut>(&self, key: K, start: F) -> SharedResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        // The lock is held across spawn + insert so the spawned task cannot
        // remove its entry before it has been inserted.
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inflight.get(&key) {
            return existing.clone();
        }

        let work = start();
        let registry = Arc::clone(&self.inflight);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = work.await;
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_key);
            result
        });

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(E::from(join_error)),
            }
        }
        .boxed()
        .shared();

        inflight.insert(key, shared.clone());
        shared
    }

    /// Whether work is currently in flight for `key`.
    pub fn is_inflight(&self, key: &K) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}
