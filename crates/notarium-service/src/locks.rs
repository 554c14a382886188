// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-name async locks, for check-then-write sequences on the blob store
// that must not interleave (one audit pack per document version).
//
// A name's lock lives in the map only while somebody holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `name` is free and hold it until the guard is dropped.
    pub async fn lock(&self, name: &str) -> KeyedGuard<'_> {
        let lock = Arc::clone(self.map().entry(name.to_owned()).or_default());
        let guard = lock.lock_owned().await;
        KeyedGuard {
            owner: self,
            name: name.to_owned(),
            guard: Some(guard),
        }
    }

    /// Number of names currently held or waited on.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one name of a [`KeyedLocks`].
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.owner.map();
        // Release first so the count below only sees the map and waiters.
        drop(self.guard.take());
        let idle = map
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            map.remove(&self.name);
        }
    }
}
