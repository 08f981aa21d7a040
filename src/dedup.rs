//! Request deduplication
//!
//! Collapses identical concurrent requests into one in-flight call and fans
//! the completion out to every caller. Keys must have value-based equality;
//! request types project their identity into a dedicated key type that
//! excludes bookkeeping fields (request ids, uuids).

use crate::Result;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Listener notified exactly once with the outcome of the in-flight request.
pub type CompletionListener = Box<dyn FnOnce(Result<()>) + Send>;

struct Inflight {
    generation: u64,
    listeners: Vec<CompletionListener>,
}

/// At-most-one in-flight operation per logical key.
pub struct RequestDeduplicator<K> {
    inflight: Mutex<HashMap<K, Inflight>>,
    next_generation: AtomicU64,
}

impl<K> RequestDeduplicator<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Run `action` only if no request for `key` is already in flight;
    /// otherwise add `listener` to the existing entry's fan-in list. The
    /// action receives a [`Completion`] handle it must resolve exactly once.
    pub fn execute_once<F>(self: &Arc<Self>, key: K, listener: CompletionListener, action: F)
    where
        F: FnOnce(&K, Completion<K>),
    {
        let generation = {
            let mut inflight = self.inflight.lock();
            match inflight.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().listeners.push(listener);
                    return;
                }
                Entry::Vacant(entry) => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    entry.insert(Inflight {
                        generation,
                        listeners: vec![listener],
                    });
                    generation
                }
            }
        };

        let completion = Completion {
            key: key.clone(),
            generation,
            dedup: Arc::clone(self),
        };
        action(&key, completion);
    }

    /// Drop all in-flight entries. Outstanding completions become no-ops so
    /// that requests re-issued after a master failover get a fresh entry.
    pub fn clear(&self) {
        self.inflight.lock().clear();
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn complete(&self, key: &K, generation: u64) -> Vec<CompletionListener> {
        let mut inflight = self.inflight.lock();
        match inflight.get(key) {
            // only remove the entry this completion belongs to; a stale
            // completion must not evict an entry created after clear()
            Some(entry) if entry.generation == generation => {
                inflight.remove(key).map(|e| e.listeners).unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}

/// Handle resolving one in-flight request. Completing it notifies every
/// fanned-in listener and removes the entry.
pub struct Completion<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    key: K,
    generation: u64,
    dedup: Arc<RequestDeduplicator<K>>,
}

impl<K> Completion<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn complete(self, result: Result<()>) {
        let listeners = self.dedup.complete(&self.key, self.generation);
        for listener in listeners {
            listener(result.clone());
        }
    }
}
