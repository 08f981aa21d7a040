//! Per-index error store
//!
//! Records the last error the lifecycle controller hit for each index, so
//! operators can inspect why an index is not progressing. `record` returns
//! the previous entry, which lets callers log a failure at ERROR only when
//! the message actually changed.

use crate::Error;
use dashmap::DashMap;

/// Cap on stored messages; a pathological error must not bloat the store.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Thread-safe mapping of index name to last error message.
#[derive(Debug, Default)]
pub struct ErrorStore {
    errors: DashMap<String, String>,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` against `index`, returning the previously stored
    /// message, if any.
    pub fn record(&self, index: &str, error: &Error) -> Option<String> {
        let mut message = error.to_string();
        if message.len() > MAX_ERROR_MESSAGE_CHARS {
            message.truncate(MAX_ERROR_MESSAGE_CHARS);
        }
        self.errors.insert(index.to_string(), message)
    }

    pub fn clear(&self, index: &str) {
        self.errors.remove(index);
    }

    pub fn get(&self, index: &str) -> Option<String> {
        self.errors.get(index).map(|entry| entry.value().clone())
    }

    /// Names of all indices with a recorded error.
    pub fn all_indices(&self) -> Vec<String> {
        self.errors.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Wipe the store. Used on mastership loss; the new master rediscovers
    /// errors on its own runs.
    pub fn clear_all(&self) {
        self.errors.clear();
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_returns_previous_message() {
        let store = ErrorStore::new();
        let first = Error::Transport("connection reset".to_string());
        let second = Error::NotAcknowledged("request was not acknowledged".to_string());

        assert!(store.record("idx-1", &first).is_none());
        let previous = store.record("idx-1", &second);
        assert_eq!(previous.as_deref(), Some("transport error: connection reset"));
        assert_eq!(store.get("idx-1").as_deref(), Some("request was not acknowledged"));
    }

    #[test]
    fn clear_and_clear_all() {
        let store = ErrorStore::new();
        store.record("idx-1", &Error::IndexNotFound("idx-1".to_string()));
        store.record("idx-2", &Error::IndexNotFound("idx-2".to_string()));
        assert_eq!(store.len(), 2);

        store.clear("idx-1");
        assert!(store.get("idx-1").is_none());
        assert_eq!(store.all_indices(), vec!["idx-2".to_string()]);

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn messages_are_truncated() {
        let store = ErrorStore::new();
        let huge = Error::Internal("x".repeat(5 * MAX_ERROR_MESSAGE_CHARS));
        store.record("idx-1", &huge);
        assert_eq!(store.get("idx-1").unwrap().len(), MAX_ERROR_MESSAGE_CHARS);
    }
}
