//! In-process TTL cache for computed query results.
//!
//! Entries are keyed by a canonical hash of the operation name and its
//! parameters, so two calls with the same arguments share one computation.
//! A per-key lock closes the stampede window: while one caller computes,
//! others asking for the same key wait and then read the fresh entry.

use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Canonical cache key: operation name plus parameters sorted by name.
///
/// Parameter order at the call site does not matter, only the set of
/// name/value pairs does.
pub struct CacheKey {
    operation: &'static str,
    params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            params: Vec::new(),
        }
    }

    pub fn param<V: ToString>(mut self, name: &str, value: V) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn opt_param<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    fn digest(mut self) -> String {
        self.params.sort();
        let mut canonical = String::from(self.operation);
        for (name, value) in &self.params {
            canonical.push('|');
            canonical.push_str(name);
            canonical.push('=');
            canonical.push_str(value);
        }
        let hash = Sha256::digest(canonical.as_bytes());
        format!("{:x}", hash)
    }
}

struct CacheEntry {
    payload: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, or runs `compute` and caches the
    /// result for `ttl`. Errors are propagated and never cached.
    pub fn get_or_compute<T, E, F>(
        &self,
        key: CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let operation = key.operation;
        let key = key.digest();

        if let Some(hit) = self.lookup(&key) {
            crate::server::metrics::record_cache_lookup(operation, true);
            return Ok(hit);
        }
        crate::server::metrics::record_cache_lookup(operation, false);

        let key_lock = {
            let mut in_flight = self.in_flight.lock().unwrap();
            Arc::clone(
                in_flight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = key_lock.lock().unwrap();

        // Another caller may have filled the entry while we waited.
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let result = compute().map(Arc::new);
        if let Ok(payload) = &result {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(
                key.clone(),
                CacheEntry {
                    payload: Arc::clone(payload) as Arc<dyn Any + Send + Sync>,
                    expires_at: Instant::now() + ttl,
                },
            );
        }

        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.remove(&key);

        result
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn lookup<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.payload.clone().downcast::<T>().ok()
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}
