//! Sessions over the feed's content tree.
//!
//! Head is the canonical superset of everything the feed knows about.
//! Every UI-facing [`Session`] starts as a copy of head and then only
//! follows updates to content it already holds, plus the pages it asked
//! for itself.

mod cache;
mod head;
mod mutation;

pub use cache::SessionCache;
pub use head::HeadSession;
pub use mutation::{MutationOutcome, SessionDiff, SessionManagerMutation};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tracing::debug;

use crate::model::{
    ModelError, ModelProvider, MutationContext, Operation, SessionMetadata, StreamStructure,
    UiContext, ViewDepthProvider,
};
use crate::store::compact_structures;

#[derive(Default)]
struct SessionContent {
    structures: Vec<StreamStructure>,
    ids: HashSet<String>,
    empty: bool,
}

impl SessionContent {
    fn replace(&mut self, structures: Vec<StreamStructure>) {
        self.ids = structures.iter().map(|s| s.content_id.clone()).collect();
        self.structures = structures;
    }
}

/// A UI-facing view of the feed.
///
/// Created synchronously for the caller and populated later on the task
/// queue; the id is only known once population has allocated it.
pub struct Session {
    key: u64,
    id: Mutex<Option<String>>,
    created_at_ms: i64,
    last_accessed_ms: Mutex<i64>,
    schema_version: u32,
    provider: Mutex<Option<Weak<dyn ModelProvider>>>,
    view_depth_provider: Option<Arc<dyn ViewDepthProvider>>,
    content: Mutex<SessionContent>,
}

impl Session {
    fn new(
        key: u64,
        schema_version: u32,
        provider: Option<&Arc<dyn ModelProvider>>,
        view_depth_provider: Option<Arc<dyn ViewDepthProvider>>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            key,
            id: Mutex::new(None),
            created_at_ms: now,
            last_accessed_ms: Mutex::new(now),
            schema_version,
            provider: Mutex::new(provider.map(Arc::downgrade)),
            view_depth_provider,
            content: Mutex::new(SessionContent::default()),
        }
    }

    /// Rebuild an unbound session from persisted metadata.
    fn restore(key: u64, metadata: &SessionMetadata, structures: Vec<StreamStructure>) -> Self {
        let mut content = SessionContent::default();
        content.replace(structures);
        Self {
            key,
            id: Mutex::new(Some(metadata.session_id.clone())),
            created_at_ms: metadata.created_at_ms,
            last_accessed_ms: Mutex::new(metadata.last_accessed_ms),
            schema_version: metadata.schema_version,
            provider: Mutex::new(None),
            view_depth_provider: None,
            content: Mutex::new(content),
        }
    }

    /// Process-local identity, stable before the id is assigned.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn session_id(&self) -> Option<String> {
        self.id.lock().unwrap().clone()
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn is_expired(&self, lifetime_ms: i64, now_ms: i64) -> bool {
        now_ms - self.created_at_ms >= lifetime_ms
    }

    pub fn touch(&self) {
        *self.last_accessed_ms.lock().unwrap() = Utc::now().timestamp_millis();
    }

    /// Metadata record, or `None` before the id is assigned.
    pub fn metadata(&self) -> Option<SessionMetadata> {
        Some(SessionMetadata {
            session_id: self.session_id()?,
            created_at_ms: self.created_at_ms,
            last_accessed_ms: *self.last_accessed_ms.lock().unwrap(),
            schema_version: self.schema_version,
        })
    }

    // ========================================================================
    // Provider binding
    // ========================================================================

    /// Bound provider, if it is still alive.
    pub fn provider(&self) -> Option<Arc<dyn ModelProvider>> {
        self.provider.lock().unwrap().as_ref()?.upgrade()
    }

    pub fn bind_provider(&self, provider: &Arc<dyn ModelProvider>) {
        *self.provider.lock().unwrap() = Some(Arc::downgrade(provider));
    }

    pub fn unbind_provider(&self) {
        *self.provider.lock().unwrap() = None;
    }

    /// Content id of the deepest child the UI has shown, if reported.
    pub fn view_depth(&self) -> Option<String> {
        self.view_depth_provider.as_ref()?.child_view_depth()
    }

    /// Tell the bound provider this session is gone.
    pub fn invalidate_provider(&self, ui_context: &UiContext) {
        if let Some(provider) = self.provider() {
            provider.invalidate(ui_context);
        }
    }

    pub fn raise_error(&self, error: ModelError) {
        match self.provider() {
            Some(provider) => provider.raise_error(error),
            None => debug!(session_key = self.key, "No provider bound, dropping error"),
        }
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub fn is_empty(&self) -> bool {
        let content = self.content.lock().unwrap();
        content.empty || content.structures.is_empty()
    }

    /// Mark the session as deliberately empty (no content available).
    pub fn mark_empty(&self) {
        let mut content = self.content.lock().unwrap();
        content.replace(Vec::new());
        content.empty = true;
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.content.lock().unwrap().ids.contains(content_id)
    }

    /// Live structures in render order.
    pub fn structures(&self) -> Vec<StreamStructure> {
        self.content.lock().unwrap().structures.clone()
    }

    pub fn content_ids(&self) -> Vec<String> {
        self.content
            .lock()
            .unwrap()
            .structures
            .iter()
            .map(|s| s.content_id.clone())
            .collect()
    }

    /// Assign the id, take `structures` as the session's content and hand
    /// them to the bound provider as one mutation.
    pub fn populate_model_provider(
        &self,
        session_id: &str,
        structures: Vec<StreamStructure>,
        cached_bindings: bool,
        ui_context: Option<UiContext>,
    ) {
        *self.id.lock().unwrap() = Some(session_id.to_string());
        {
            let mut content = self.content.lock().unwrap();
            content.replace(structures.clone());
            content.empty = false;
        }

        let Some(provider) = self.provider() else {
            debug!(session_id, "Provider dropped before population");
            return;
        };
        provider
            .edit()
            .add_children(structures)
            .set_session_id(session_id)
            .set_cached_bindings(cached_bindings)
            .set_ui_context(ui_context)
            .commit();
    }

    /// Apply a committed batch and return the structures that took effect.
    ///
    /// A continuation only applies to the session that requested it, and is
    /// the only way new content gets appended. Refreshes update or remove
    /// content the session already holds.
    pub fn update_session(
        &self,
        structures: &[StreamStructure],
        context: &MutationContext,
    ) -> Vec<StreamStructure> {
        let session_id = self.session_id();
        let requester = session_id.is_some()
            && context.requesting_session_id.as_deref() == session_id.as_deref();
        if context.is_continuation() && !requester {
            return Vec::new();
        }
        let append = context.is_continuation();

        let applied: Vec<StreamStructure> = {
            let mut content = self.content.lock().unwrap();
            let mut applied = Vec::new();
            let mut journal = content.structures.clone();
            for structure in structures {
                let held = content.ids.contains(&structure.content_id);
                let take = match structure.operation {
                    Operation::UpdateOrAppend => held || append,
                    Operation::Remove => held,
                    Operation::ClearAll | Operation::RequiredContent => false,
                };
                if take {
                    if structure.operation == Operation::UpdateOrAppend {
                        content.ids.insert(structure.content_id.clone());
                    } else {
                        content.ids.remove(&structure.content_id);
                    }
                    journal.push(structure.clone());
                    applied.push(structure.clone());
                }
            }
            if !applied.is_empty() {
                let live = compact_structures(&journal);
                content.replace(live);
                content.empty = false;
            }
            applied
        };

        if applied.is_empty() {
            return applied;
        }
        if let (Some(provider), Some(id)) = (self.provider(), session_id) {
            provider
                .edit()
                .add_children(applied.clone())
                .set_session_id(id)
                .set_mutation_context(context.clone())
                .commit();
        }
        applied
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("id", &self.session_id())
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

/// Creates sessions with fresh process-local keys.
pub struct SessionFactory {
    next_key: AtomicU64,
    schema_version: u32,
}

impl SessionFactory {
    pub fn new(schema_version: u32) -> Self {
        Self {
            next_key: AtomicU64::new(1),
            schema_version,
        }
    }

    pub fn get_session(
        &self,
        provider: &Arc<dyn ModelProvider>,
        view_depth_provider: Option<Arc<dyn ViewDepthProvider>>,
    ) -> Arc<Session> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        Arc::new(Session::new(
            key,
            self.schema_version,
            Some(provider),
            view_depth_provider,
        ))
    }

    /// Unbound session for persisted metadata, keyed from the same counter
    /// as new sessions.
    pub fn restore_session(
        &self,
        metadata: &SessionMetadata,
        structures: Vec<StreamStructure>,
    ) -> Arc<Session> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        Arc::new(Session::restore(key, metadata, structures))
    }
}
