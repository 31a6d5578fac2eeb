use std::sync::Arc;

use tracing::{debug, info};

use super::{Session, SessionCache};
use crate::cache::ContentCache;
use crate::error::StoreResult;
use crate::model::{Model, MutationContext, PayloadWithId, StreamStructure, HEAD_SESSION_ID};
use crate::store::Store;

/// Structures one session took from a committed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDiff {
    pub session_id: String,
    pub applied: Vec<StreamStructure>,
}

/// Result of committing a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationOutcome {
    /// The batch started with `ClearAll` and head was emptied first.
    pub head_cleared: bool,
    /// Structures appended to head.
    pub head_structures: usize,
    pub updated_sessions: Vec<SessionDiff>,
}

/// Applies a response batch to the store, head and attached sessions.
pub struct SessionManagerMutation<'a> {
    store: &'a dyn Store,
    session_cache: &'a SessionCache,
    content_cache: &'a ContentCache,
}

impl<'a> SessionManagerMutation<'a> {
    pub fn new(
        store: &'a dyn Store,
        session_cache: &'a SessionCache,
        content_cache: &'a ContentCache,
    ) -> Self {
        Self {
            store,
            session_cache,
            content_cache,
        }
    }

    /// Commit `model`. The first store failure aborts the commit.
    pub async fn commit(
        &self,
        model: &Model,
        context: &MutationContext,
    ) -> StoreResult<MutationOutcome> {
        let mut outcome = MutationOutcome::default();
        let mut operations = model.operations.as_slice();

        if model.clears_head() {
            debug!("Batch clears head");
            self.session_cache.head().reset();
            self.store.clear_head().await?;
            self.content_cache.reset();
            outcome.head_cleared = true;
            operations = &operations[1..];
        }

        let payloads: Vec<PayloadWithId> = operations
            .iter()
            .filter_map(|op| {
                op.payload.clone().map(|payload| PayloadWithId {
                    content_id: op.structure.content_id.clone(),
                    payload,
                })
            })
            .collect();
        if !payloads.is_empty() {
            self.store.commit_content(&payloads).await?;
            self.content_cache.put_all(&payloads);
        }

        let structures: Vec<StreamStructure> =
            operations.iter().map(|op| op.structure.clone()).collect();
        if !structures.is_empty() {
            self.session_cache.head().update(&structures);
            self.store
                .commit_session(HEAD_SESSION_ID, &structures)
                .await?;
            outcome.head_structures = structures.len();
        }

        let targets: Vec<Arc<Session>> = if context.is_continuation() {
            context
                .requesting_session_id
                .as_deref()
                .and_then(|id| self.session_cache.get_attached(id))
                .into_iter()
                .collect()
        } else {
            self.session_cache.attached_sessions()
        };

        for session in targets {
            let Some(session_id) = session.session_id() else {
                continue;
            };
            let applied = session.update_session(&structures, context);
            if applied.is_empty() {
                continue;
            }
            self.store.commit_session(&session_id, &applied).await?;
            outcome.updated_sessions.push(SessionDiff {
                session_id,
                applied,
            });
        }

        info!(
            head_cleared = outcome.head_cleared,
            payloads = payloads.len(),
            structures = outcome.head_structures,
            sessions = outcome.updated_sessions.len(),
            continuation = context.is_continuation(),
            "Mutation committed"
        );
        Ok(outcome)
    }
}
