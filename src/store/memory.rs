use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Listeners, Store, StoreListener};
use crate::error::StoreResult;
use crate::model::{
    ConsistencyToken, PayloadWithId, SessionMetadata, StreamPayload, StreamSharedState,
    StreamStructure, StreamUploadableAction, HEAD_SESSION_ID,
};

#[derive(Default)]
struct MemoryState {
    content: HashMap<String, StreamPayload>,
    sessions: HashMap<String, Vec<StreamStructure>>,
    actions: Vec<StreamUploadableAction>,
    metadata: Vec<SessionMetadata>,
    consistency_token: Option<ConsistencyToken>,
}

/// In-memory store.
///
/// Behaves the same before and after `switch_to_ephemeral_mode`; the flag
/// only records that the switch happened.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    ephemeral: AtomicBool,
    listeners: Listeners,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all data without touching the ephemeral flag.
    pub(crate) fn wipe(&self) {
        *self.state.lock().unwrap() = MemoryState::default();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_shared_states(&self) -> StoreResult<Vec<StreamSharedState>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .content
            .values()
            .filter_map(|p| match p {
                StreamPayload::SharedState(s) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn get_payloads(&self, content_ids: &[String]) -> StoreResult<Vec<PayloadWithId>> {
        let state = self.state.lock().unwrap();
        Ok(content_ids
            .iter()
            .filter_map(|id| {
                state.content.get(id).map(|payload| PayloadWithId {
                    content_id: id.clone(),
                    payload: payload.clone(),
                })
            })
            .collect())
    }

    async fn commit_content(&self, payloads: &[PayloadWithId]) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for p in payloads {
            state.content.insert(p.content_id.clone(), p.payload.clone());
        }
        Ok(())
    }

    async fn create_new_session(&self) -> StoreResult<String> {
        let session_id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().unwrap();
        let head = state
            .sessions
            .get(HEAD_SESSION_ID)
            .cloned()
            .unwrap_or_default();
        state.sessions.insert(session_id.clone(), head);
        Ok(session_id)
    }

    async fn get_stream_structures(&self, session_id: &str) -> StoreResult<Vec<StreamStructure>> {
        let state = self.state.lock().unwrap();
        Ok(state.sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn commit_session(
        &self,
        session_id: &str,
        structures: &[StreamStructure],
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(structures);
        Ok(())
    }

    async fn clear_head(&self) -> StoreResult<()> {
        self.state.lock().unwrap().sessions.remove(HEAD_SESSION_ID);
        Ok(())
    }

    async fn remove_session(&self, session_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(session_id);
        state.metadata.retain(|m| m.session_id != session_id);
        Ok(())
    }

    async fn get_session_metadata(&self) -> StoreResult<Vec<SessionMetadata>> {
        Ok(self.state.lock().unwrap().metadata.clone())
    }

    async fn set_session_metadata(&self, sessions: &[SessionMetadata]) -> StoreResult<()> {
        self.state.lock().unwrap().metadata = sessions.to_vec();
        Ok(())
    }

    async fn get_all_uploadable_actions(&self) -> StoreResult<Vec<StreamUploadableAction>> {
        Ok(self.state.lock().unwrap().actions.clone())
    }

    async fn add_uploadable_actions(&self, actions: &[StreamUploadableAction]) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for action in actions {
            if !state.actions.contains(action) {
                state.actions.push(action.clone());
            }
        }
        Ok(())
    }

    async fn remove_uploadable_actions(
        &self,
        actions: &[StreamUploadableAction],
    ) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .actions
            .retain(|a| !actions.contains(a));
        Ok(())
    }

    async fn get_consistency_token(&self) -> StoreResult<Option<ConsistencyToken>> {
        Ok(self.state.lock().unwrap().consistency_token.clone())
    }

    async fn set_consistency_token(&self, token: &ConsistencyToken) -> StoreResult<()> {
        self.state.lock().unwrap().consistency_token = Some(token.clone());
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.wipe();
        Ok(())
    }

    async fn switch_to_ephemeral_mode(&self) {
        if !self.ephemeral.swap(true, Ordering::SeqCst) {
            self.listeners.notify_ephemeral();
        }
    }

    fn is_ephemeral_mode(&self) -> bool {
        self.ephemeral.load(Ordering::SeqCst)
    }

    fn register_observer(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.register(listener);
    }
}
