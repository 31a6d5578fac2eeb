use std::sync::Mutex;

use tracing::debug;

use crate::model::StreamStructure;
use crate::store::compact_structures;

#[derive(Default)]
struct HeadState {
    journal: Vec<StreamStructure>,
    live: Vec<StreamStructure>,
    initialized: bool,
    last_refresh_ms: i64,
}

/// The canonical session every new session is copied from.
#[derive(Default)]
pub struct HeadSession {
    state: Mutex<HeadState>,
}

impl HeadSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load head's persisted journal. Marks head initialized.
    pub fn initialize(&self, journal: Vec<StreamStructure>) {
        let mut state = self.state.lock().unwrap();
        state.live = compact_structures(&journal);
        state.journal = journal;
        state.initialized = true;
        debug!(items = state.live.len(), "Head session initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().live.is_empty()
    }

    /// Append structures to head's journal.
    pub fn update(&self, structures: &[StreamStructure]) {
        if structures.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.journal.extend_from_slice(structures);
        state.live = compact_structures(&state.journal);
    }

    /// Drop all content. Head stays initialized.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.journal.clear();
        state.live.clear();
        state.last_refresh_ms = 0;
    }

    /// Live structures in render order.
    pub fn structures(&self) -> Vec<StreamStructure> {
        self.state.lock().unwrap().live.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Epoch millis of the last committed refresh, 0 if none.
    pub fn last_refresh_ms(&self) -> i64 {
        self.state.lock().unwrap().last_refresh_ms
    }

    pub fn set_last_refresh_ms(&self, timestamp_ms: i64) {
        self.state.lock().unwrap().last_refresh_ms = timestamp_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_starts_uninitialized_and_empty() {
        let head = HeadSession::new();
        assert!(!head.is_initialized());
        assert!(head.is_empty());
        assert_eq!(head.last_refresh_ms(), 0);
    }

    #[test]
    fn test_update_compacts_journal() {
        let head = HeadSession::new();
        head.initialize(vec![StreamStructure::update_or_append("a", None)]);
        head.update(&[
            StreamStructure::update_or_append("b", None),
            StreamStructure::remove("a"),
        ]);
        let ids: Vec<_> = head.structures().into_iter().map(|s| s.content_id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
        assert_eq!(head.len(), 1);
    }

    #[test]
    fn test_reset_keeps_initialized() {
        let head = HeadSession::new();
        head.initialize(vec![StreamStructure::update_or_append("a", None)]);
        head.set_last_refresh_ms(10);
        head.reset();
        assert!(head.is_initialized());
        assert!(head.is_empty());
        assert_eq!(head.last_refresh_ms(), 0);
    }
}
