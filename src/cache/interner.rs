use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use crate::model::{SharedStateItem, StreamSharedState};

/// Content-addressed interner.
///
/// Values are deduplicated by structural equality: interning a value equal
/// to one seen before returns the canonical `Arc` instead of a new one.
pub struct Interner<T: Hash + Eq> {
    pool: HashSet<Arc<T>>,
}

impl<T: Hash + Eq> Interner<T> {
    pub fn new() -> Self {
        Self {
            pool: HashSet::new(),
        }
    }

    /// Return the canonical instance equal to `value`, registering it if new.
    pub fn intern(&mut self, value: Arc<T>) -> Arc<T> {
        if let Some(canonical) = self.pool.get(&*value) {
            return Arc::clone(canonical);
        }
        self.pool.insert(Arc::clone(&value));
        value
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }
}

impl<T: Hash + Eq> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interns shared states at the level of their inner item.
///
/// Two shared states often differ only in their outer content id, so the
/// returned state keeps its own id and points at the canonical item.
#[derive(Default)]
pub struct StreamSharedStateInterner {
    items: Interner<SharedStateItem>,
}

impl StreamSharedStateInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, state: StreamSharedState) -> StreamSharedState {
        StreamSharedState {
            content_id: state.content_id,
            shared_state_item: self.items.intern(state.shared_state_item),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
