use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::model::{PayloadWithId, StreamPayload};

/// Content id to payload cache, filled on store reads and commits.
pub struct ContentCache {
    entries: Mutex<HashMap<String, StreamPayload>>,
    capacity: usize,
}

impl ContentCache {
    /// Create a cache holding at most `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, content_id: &str) -> Option<StreamPayload> {
        self.entries.lock().unwrap().get(content_id).cloned()
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(content_id)
    }

    /// Insert or replace a payload. New ids are dropped once the cache is full.
    pub fn put(&self, content_id: impl Into<String>, payload: StreamPayload) {
        let content_id = content_id.into();
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity && !entries.contains_key(&content_id) {
            debug!(
                content_id = %content_id,
                capacity = self.capacity,
                "Content cache full, not caching payload"
            );
            return;
        }
        entries.insert(content_id, payload);
    }

    pub fn put_all(&self, payloads: &[PayloadWithId]) {
        for p in payloads {
            self.put(p.content_id.clone(), p.payload.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        let mut entries = self.entries.lock().unwrap();
        debug!(entries = entries.len(), "Resetting content cache");
        entries.clear();
    }
}
