use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

use super::{HeadSession, Session, SessionFactory};
use crate::error::StoreResult;
use crate::model::{SessionMetadata, HEAD_SESSION_ID};
use crate::store::{compact_structures, Store};

/// Head plus every attached session, keyed by session id.
pub struct SessionCache {
    head: HeadSession,
    attached: Mutex<HashMap<String, Arc<Session>>>,
    store: Arc<dyn Store>,
    lifetime_ms: i64,
}

impl SessionCache {
    pub fn new(store: Arc<dyn Store>, lifetime_ms: u64) -> Self {
        Self {
            head: HeadSession::new(),
            attached: Mutex::new(HashMap::new()),
            store,
            lifetime_ms: i64::try_from(lifetime_ms).unwrap_or(i64::MAX),
        }
    }

    pub fn head(&self) -> &HeadSession {
        &self.head
    }

    /// Load head and restore persisted sessions that are still alive.
    ///
    /// Expired sessions are removed from the store. Head is marked
    /// initialized even if loading fails so population can proceed.
    pub async fn initialize(&self, factory: &SessionFactory) -> StoreResult<()> {
        let result = self.load(factory).await;
        if !self.head.is_initialized() {
            self.head.initialize(Vec::new());
        }
        result
    }

    async fn load(&self, factory: &SessionFactory) -> StoreResult<()> {
        let head = self.store.get_stream_structures(HEAD_SESSION_ID).await?;
        self.head.initialize(head);

        let now = Utc::now().timestamp_millis();
        let mut restored = Vec::new();
        let mut expired = Vec::new();
        for metadata in self.store.get_session_metadata().await? {
            if now - metadata.created_at_ms >= self.lifetime_ms {
                expired.push(metadata.session_id);
                continue;
            }
            let journal = self.store.get_stream_structures(&metadata.session_id).await?;
            restored.push(factory.restore_session(&metadata, compact_structures(&journal)));
        }

        for session_id in &expired {
            self.store.remove_session(session_id).await?;
        }

        {
            let mut attached = self.attached.lock().unwrap();
            for session in restored {
                if let Some(id) = session.session_id() {
                    attached.insert(id, session);
                }
            }
        }

        info!(
            head_items = self.head.len(),
            restored = self.attached.lock().unwrap().len(),
            expired = expired.len(),
            "Session cache initialized"
        );
        Ok(())
    }

    /// Attach a populated session. Sessions without an id are ignored.
    pub fn put_attached(&self, session: Arc<Session>) {
        let Some(id) = session.session_id() else {
            debug!(session_key = session.key(), "Refusing to attach session without id");
            return;
        };
        self.attached.lock().unwrap().insert(id, session);
    }

    /// Live attached session, or `None` if unknown or expired.
    pub fn get_attached(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.attached.lock().unwrap().get(session_id).cloned()?;
        if session.is_expired(self.lifetime_ms, Utc::now().timestamp_millis()) {
            debug!(session_id, "Attached session expired");
            return None;
        }
        Some(session)
    }

    /// Every attached session that has not expired.
    pub fn attached_sessions(&self) -> Vec<Arc<Session>> {
        let now = Utc::now().timestamp_millis();
        self.attached
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.is_expired(self.lifetime_ms, now))
            .cloned()
            .collect()
    }

    pub fn attached_len(&self) -> usize {
        self.attached.lock().unwrap().len()
    }

    /// Detach a session and drop it from the store.
    pub async fn remove(&self, session_id: &str) -> StoreResult<()> {
        self.attached.lock().unwrap().remove(session_id);
        self.store.remove_session(session_id).await
    }

    /// Detach and delete every expired session. Returns how many went.
    pub async fn evict_expired(&self) -> StoreResult<usize> {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = {
            let mut attached = self.attached.lock().unwrap();
            let ids: Vec<String> = attached
                .iter()
                .filter(|(_, s)| s.is_expired(self.lifetime_ms, now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                attached.remove(id);
            }
            ids
        };
        for id in &expired {
            self.store.remove_session(id).await?;
        }
        if !expired.is_empty() {
            self.persist_metadata().await?;
        }
        Ok(expired.len())
    }

    /// Write the attached sessions' metadata to the store.
    pub async fn persist_metadata(&self) -> StoreResult<()> {
        let metadata: Vec<SessionMetadata> = self
            .attached
            .lock()
            .unwrap()
            .values()
            .filter_map(|s| s.metadata())
            .collect();
        self.store.set_session_metadata(&metadata).await
    }

    /// Reset head and detach every session.
    pub fn reset(&self) {
        self.head.reset();
        let mut attached = self.attached.lock().unwrap();
        debug!(sessions = attached.len(), "Resetting session cache");
        attached.clear();
    }
}
