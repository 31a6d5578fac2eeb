use std::collections::HashMap;
use std::sync::Mutex;

use super::interner::StreamSharedStateInterner;
use crate::model::StreamSharedState;

struct Inner {
    states: HashMap<String, StreamSharedState>,
    interner: StreamSharedStateInterner,
}

/// Shared states by content id, interned on insertion.
pub struct SharedStateCache {
    inner: Mutex<Inner>,
}

impl SharedStateCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                states: HashMap::new(),
                interner: StreamSharedStateInterner::new(),
            }),
        }
    }

    pub fn put(&self, state: StreamSharedState) {
        let mut inner = self.inner.lock().unwrap();
        let interned = inner.interner.intern(state);
        inner.states.insert(interned.content_id.clone(), interned);
    }

    pub fn get(&self, content_id: &str) -> Option<StreamSharedState> {
        self.inner.lock().unwrap().states.get(content_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct inner items backing the cached states.
    pub fn distinct_items(&self) -> usize {
        self.inner.lock().unwrap().interner.len()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.states.clear();
        inner.interner.clear();
    }
}

impl Default for SharedStateCache {
    fn default() -> Self {
        Self::new()
    }
}
