//! Content store used by the session manager.
//!
//! The [`Store`] trait is the persistence seam: content payloads, the
//! per-session structure journals, pending actions, session metadata and
//! the consistency token. Two implementations ship with the crate:
//! [`MemoryStore`] and the SQLite-backed [`SqliteStore`], which falls back
//! to an embedded `MemoryStore` once switched to ephemeral mode.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::error::StoreResult;
use crate::model::{
    ConsistencyToken, PayloadWithId, SessionMetadata, StreamSharedState, StreamStructure,
    StreamUploadableAction,
};

/// Observer of store-wide state changes.
pub trait StoreListener: Send + Sync {
    /// The store stopped persisting and now only holds data in memory.
    fn on_switch_to_ephemeral_mode(&self);
}

/// Persistent content storage.
///
/// Every operation reports failure through [`StoreResult`]; callers decide
/// whether a failure is fatal.
#[async_trait]
pub trait Store: Send + Sync {
    // ========================================================================
    // Content
    // ========================================================================

    /// All shared states held in content storage.
    async fn get_shared_states(&self) -> StoreResult<Vec<StreamSharedState>>;

    /// Payloads for the given ids. Unknown ids are skipped.
    async fn get_payloads(&self, content_ids: &[String]) -> StoreResult<Vec<PayloadWithId>>;

    /// Insert or replace payloads.
    async fn commit_content(&self, payloads: &[PayloadWithId]) -> StoreResult<()>;

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Allocate a new session whose journal starts as a copy of head.
    async fn create_new_session(&self) -> StoreResult<String>;

    /// Structure journal of a session, in commit order.
    async fn get_stream_structures(&self, session_id: &str) -> StoreResult<Vec<StreamStructure>>;

    /// Append structures to a session's journal.
    async fn commit_session(&self, session_id: &str, structures: &[StreamStructure])
        -> StoreResult<()>;

    /// Drop head's journal.
    async fn clear_head(&self) -> StoreResult<()>;

    /// Drop a session's journal and metadata.
    async fn remove_session(&self, session_id: &str) -> StoreResult<()>;

    async fn get_session_metadata(&self) -> StoreResult<Vec<SessionMetadata>>;

    /// Replace the stored session metadata list.
    async fn set_session_metadata(&self, sessions: &[SessionMetadata]) -> StoreResult<()>;

    // ========================================================================
    // Actions and consistency
    // ========================================================================

    async fn get_all_uploadable_actions(&self) -> StoreResult<Vec<StreamUploadableAction>>;

    async fn add_uploadable_actions(&self, actions: &[StreamUploadableAction]) -> StoreResult<()>;

    async fn remove_uploadable_actions(&self, actions: &[StreamUploadableAction])
        -> StoreResult<()>;

    async fn get_consistency_token(&self) -> StoreResult<Option<ConsistencyToken>>;

    async fn set_consistency_token(&self, token: &ConsistencyToken) -> StoreResult<()>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Delete everything.
    async fn clear_all(&self) -> StoreResult<()>;

    /// Stop persisting. Observers are notified the first time only.
    async fn switch_to_ephemeral_mode(&self);

    fn is_ephemeral_mode(&self) -> bool;

    fn register_observer(&self, listener: Arc<dyn StoreListener>);
}

/// Registered store observers.
#[derive(Default)]
pub(crate) struct Listeners {
    listeners: Mutex<Vec<Arc<dyn StoreListener>>>,
}

impl Listeners {
    pub(crate) fn register(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub(crate) fn notify_ephemeral(&self) {
        // Snapshot so listeners may call back into the store.
        let listeners: Vec<_> = self.listeners.lock().unwrap().clone();
        info!(listeners = listeners.len(), "Store switched to ephemeral mode");
        for listener in listeners {
            listener.on_switch_to_ephemeral_mode();
        }
    }
}

/// Replay a structure journal into the ordered list of live structures.
///
/// Later `UpdateOrAppend` entries for an id already present keep the
/// original position; `Remove` drops the id; `ClearAll` empties the list.
/// `RequiredContent` entries are not part of the rendered list.
pub fn compact_structures(journal: &[StreamStructure]) -> Vec<StreamStructure> {
    use crate::model::Operation;

    let mut live: Vec<StreamStructure> = Vec::new();
    for structure in journal {
        match structure.operation {
            Operation::ClearAll => live.clear(),
            Operation::UpdateOrAppend => {
                if let Some(existing) = live
                    .iter_mut()
                    .find(|s| s.content_id == structure.content_id)
                {
                    existing.parent_content_id = structure.parent_content_id.clone();
                } else {
                    live.push(structure.clone());
                }
            }
            Operation::Remove => live.retain(|s| s.content_id != structure.content_id),
            Operation::RequiredContent => {}
        }
    }
    live
}
