// libs/appointment-cell/src/services/locks.rs
//
// Per-resource critical sections. A write holds the guard of every resource
// it touches for the whole check + persist sequence, so two requests can
// never both observe a free slot and then both claim it.
//

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::models::Scope;

#[derive(Default)]
pub struct ScopeLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of a scheduling write; releases on drop.
pub struct ScopeGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
}

impl ScopeGuard {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every resource named by `scopes`, plus the appointment row itself
    /// when one is given. Keys are taken in sorted order so overlapping
    /// requests cannot deadlock.
    pub async fn acquire(&self, scopes: &[&Scope], appointment_id: Option<Uuid>) -> ScopeGuard {
        let mut keys: BTreeSet<String> = scopes
            .iter()
            .flat_map(|scope| scope.resource_keys())
            .collect();
        if let Some(id) = appointment_id {
            keys.insert(format!("appointment:{}", id));
        }

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            keys.iter()
                .map(|key| Arc::clone(locks.entry(key.clone()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        let keys: Vec<String> = keys.into_iter().collect();
        debug!("Acquired scheduling locks {:?}", keys);
        ScopeGuard { _guards: guards, keys }
    }

    /// Number of resources currently tracked; stale entries are pruned lazily.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
