use std::sync::Weak;

use tracing::debug;

use super::Inner;
use crate::error::RequestResult;
use crate::model::{Model, MutationContext};
use crate::task_queue::{TaskId, TaskType};

/// Pending result of one refresh or continuation request.
///
/// Registered in the manager's outstanding set when created. `accept`
/// consumes the tracker, so a result is delivered at most once; if the
/// tracker was removed from the set in the meantime (clear all), the
/// result is dropped when its commit task runs.
pub struct SessionMutationTracker {
    id: u64,
    context: MutationContext,
    manager: Weak<Inner>,
}

impl SessionMutationTracker {
    pub(super) fn new(id: u64, context: MutationContext, manager: Weak<Inner>) -> Self {
        Self {
            id,
            context,
            manager,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &MutationContext {
        &self.context
    }

    /// Still registered as outstanding.
    pub fn is_outstanding(&self) -> bool {
        self.manager.upgrade().is_some_and(|inner| {
            inner
                .outstanding_mutations
                .lock()
                .unwrap()
                .contains(&self.id)
        })
    }

    /// Hand the request result to the manager.
    ///
    /// Refresh results are committed as a head reset, which releases tasks
    /// held behind the request; continuations are committed as user-facing
    /// work.
    pub fn accept(self, result: RequestResult<Model>) {
        let Some(inner) = self.manager.upgrade() else {
            debug!(mutation = self.id, "Session manager dropped, discarding result");
            return;
        };

        let task_type = if self.context.is_continuation() {
            TaskType::UserFacing
        } else {
            TaskType::HeadReset
        };
        let task_id = if result.is_ok() {
            TaskId::SessionMutation
        } else {
            TaskId::RequestFailure
        };

        let queue = inner.task_queue.clone();
        let Self { id, context, .. } = self;
        queue.execute(task_id, task_type, async move {
            inner.commit_result(id, context, result).await;
        });
    }
}
