use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard},
};

use lru::LruCache;

use crate::rac::ExperimentConfiguration;

/// `ConfigurationStore` provides a Sync, capacity-bounded storage for experiment configurations
/// keyed by experiment key.
///
/// Once the store is full, writing a new key evicts the least-recently-used entry. Entries never
/// expire by time.
pub struct ConfigurationStore {
    // LruCache::get() updates recency, so even readers need exclusive access.
    cache: Mutex<LruCache<String, Arc<ExperimentConfiguration>>>,
}

impl ConfigurationStore {
    pub fn new(max_entries: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(max_entries)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get configuration for `key`, marking it as most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<ExperimentConfiguration>> {
        self.lock().get(key).cloned()
    }

    /// Upsert all `entries`. The whole batch is written under one lock, so readers observe each key
    /// either before or after the update.
    pub fn set_many(&self, entries: HashMap<String, ExperimentConfiguration>) {
        // Constructing new values before requesting the lock to minimize lock span.
        let entries: Vec<_> = entries
            .into_iter()
            .map(|(key, configuration)| (key, Arc::new(configuration)))
            .collect();

        let mut cache = self.lock();
        for (key, configuration) in entries {
            if let Some((evicted, _)) = cache.push(key.clone(), configuration) {
                if evicted != key {
                    log::debug!(target: "eppo", experiment_key:display = evicted; "evicted configuration from store");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<ExperimentConfiguration>>> {
        // Poisoning is only possible if a writer panicked mid-update. LruCache operations leave the
        // cache consistent, so it's fine to keep using it.
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
