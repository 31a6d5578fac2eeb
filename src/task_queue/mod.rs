//! Sequential task queue backing the session manager.
//!
//! A single worker runs one task at a time, so state touched only from
//! queued tasks needs no further coordination. Tasks are classified by
//! [`TaskType`]:
//!
//! - `Immediate` tasks run ahead of everything else, even before the
//!   queue is initialized.
//! - `HeadInvalidate` marks the start of a refresh. Until a matching
//!   `HeadReset` has run, further invalidations and all `UserFacing` and
//!   `Background` tasks are held.
//! - `HeadReset` commits a refresh and releases held tasks.
//! - `UserFacing` and `Background` tasks share one FIFO.
//!
//! A task may carry a timeout task: if the task has not started when the
//! timeout elapses, the timeout task runs in its place. Exactly one of the
//! two ever executes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Boxed unit of work.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Scheduling class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Immediate,
    HeadInvalidate,
    HeadReset,
    UserFacing,
    Background,
}

/// Name of a task, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    Initialize,
    PopulateNewSession,
    GetExistingSession,
    TriggerRefresh,
    HandleToken,
    SessionMutation,
    RequestFailure,
    ResetNoCardsError,
    ClearAll,
    GetContent,
    Custom(&'static str),
}

impl TaskId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskId::Initialize => "initialize",
            TaskId::PopulateNewSession => "populate_new_session",
            TaskId::GetExistingSession => "get_existing_session",
            TaskId::TriggerRefresh => "trigger_refresh",
            TaskId::HandleToken => "handle_token",
            TaskId::SessionMutation => "session_mutation",
            TaskId::RequestFailure => "request_failure",
            TaskId::ResetNoCardsError => "reset_no_cards_error",
            TaskId::ClearAll => "clear_all",
            TaskId::GetContent => "get_content",
            TaskId::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct QueuedTask {
    id: TaskId,
    task_type: TaskType,
    body: TaskFuture,
    /// Shared with the timeout timer; whoever sets it first runs.
    claim: Option<Arc<AtomicBool>>,
    enqueued_at: Instant,
    initialization: bool,
}

#[derive(Default)]
struct QueueState {
    initialized: bool,
    initialization_queued: bool,
    making_request: bool,
    shutdown: bool,
    running: Option<TaskId>,
    immediate: VecDeque<QueuedTask>,
    resets: VecDeque<QueuedTask>,
    invalidates: VecDeque<QueuedTask>,
    regular: VecDeque<QueuedTask>,
    executed: u64,
    timed_out: u64,
    /// Most recent submissions, oldest first.
    submissions: VecDeque<(TaskId, TaskType)>,
}

const SUBMISSION_HISTORY: usize = 64;

impl QueueState {
    fn next(&mut self) -> Option<QueuedTask> {
        if let Some(task) = self.immediate.pop_front() {
            return Some(task);
        }
        if !self.initialized {
            return None;
        }
        if let Some(task) = self.resets.pop_front() {
            return Some(task);
        }
        if self.making_request {
            return None;
        }
        if let Some(task) = self.invalidates.pop_front() {
            return Some(task);
        }
        self.regular.pop_front()
    }

    fn has_runnable(&self) -> bool {
        if !self.immediate.is_empty() {
            return true;
        }
        if !self.initialized {
            return false;
        }
        if !self.resets.is_empty() {
            return true;
        }
        !self.making_request && (!self.invalidates.is_empty() || !self.regular.is_empty())
    }

    fn held(&self) -> usize {
        let blocked_regular = if !self.initialized || self.making_request {
            self.regular.len() + self.invalidates.len()
        } else {
            0
        };
        let blocked_resets = if self.initialized { 0 } else { self.resets.len() };
        blocked_regular + blocked_resets
    }

    fn push(&mut self, task: QueuedTask) {
        if self.submissions.len() == SUBMISSION_HISTORY {
            self.submissions.pop_front();
        }
        self.submissions.push_back((task.id, task.task_type));
        match task.task_type {
            TaskType::Immediate => self.immediate.push_back(task),
            TaskType::HeadReset => self.resets.push_back(task),
            TaskType::HeadInvalidate => self.invalidates.push_back(task),
            TaskType::UserFacing | TaskType::Background => self.regular.push_back(task),
        }
    }

    fn pending(&self) -> usize {
        self.immediate.len() + self.resets.len() + self.invalidates.len() + self.regular.len()
    }
}

struct QueueShared {
    state: Mutex<QueueState>,
    work: Notify,
    idle: Notify,
}

impl QueueShared {
    fn push(&self, task: QueuedTask) {
        {
            let mut state = self.state.lock().unwrap();
            if state.shutdown {
                warn!(task = %task.id, "Task queue shut down, dropping task");
                return;
            }
            state.push(task);
        }
        self.work.notify_one();
    }
}

/// Single-worker task queue.
///
/// Cheap to clone; clones share the same worker.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
    handle: Handle,
}

impl TaskQueue {
    /// Create the queue and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState::default()),
            work: Notify::new(),
            idle: Notify::new(),
        });
        let handle = Handle::current();
        handle.spawn(run_worker(Arc::clone(&shared)));
        Self { shared, handle }
    }

    /// Queue the initialization task. Nothing but `Immediate` tasks runs
    /// until it completes. Later calls are ignored.
    pub fn initialize<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.initialization_queued {
                debug!("Task queue initialization already queued");
                return;
            }
            state.initialization_queued = true;
        }
        self.shared.push(QueuedTask {
            id: TaskId::Initialize,
            task_type: TaskType::Immediate,
            body: Box::pin(task),
            claim: None,
            enqueued_at: Instant::now(),
            initialization: true,
        });
    }

    /// Queue a task.
    pub fn execute<F>(&self, id: TaskId, task_type: TaskType, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.push(QueuedTask {
            id,
            task_type,
            body: Box::pin(task),
            claim: None,
            enqueued_at: Instant::now(),
            initialization: false,
        });
    }

    /// Queue a task with a fallback that replaces it if it has not started
    /// within `timeout`.
    pub fn execute_with_timeout<F, T>(
        &self,
        id: TaskId,
        task_type: TaskType,
        task: F,
        timeout_task: T,
        timeout: Duration,
    ) where
        F: Future<Output = ()> + Send + 'static,
        T: Future<Output = ()> + Send + 'static,
    {
        let claim = Arc::new(AtomicBool::new(false));
        self.shared.push(QueuedTask {
            id,
            task_type,
            body: Box::pin(task),
            claim: Some(Arc::clone(&claim)),
            enqueued_at: Instant::now(),
            initialization: false,
        });

        let shared = Arc::clone(&self.shared);
        let timeout_body: TaskFuture = Box::pin(timeout_task);
        self.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if claim.swap(true, Ordering::SeqCst) {
                return;
            }
            warn!(
                task = %id,
                timeout_ms = timeout.as_millis() as u64,
                "Task did not start in time, running timeout task"
            );
            shared.state.lock().unwrap().timed_out += 1;
            shared.push(QueuedTask {
                id,
                task_type: TaskType::Immediate,
                body: timeout_body,
                claim: None,
                enqueued_at: Instant::now(),
                initialization: false,
            });
        });
    }

    /// True once the initialization task has completed.
    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().unwrap().initialized
    }

    /// True between a `HeadInvalidate` task starting and a `HeadReset` completing.
    pub fn is_making_request(&self) -> bool {
        self.shared.state.lock().unwrap().making_request
    }

    /// True when queued tasks are being held back.
    pub fn is_delayed(&self) -> bool {
        self.shared.state.lock().unwrap().held() > 0
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().pending()
    }

    /// Number of tasks that have run to completion.
    pub fn executed(&self) -> u64 {
        self.shared.state.lock().unwrap().executed
    }

    /// Number of tasks replaced by their timeout task.
    pub fn timed_out(&self) -> u64 {
        self.shared.state.lock().unwrap().timed_out
    }

    /// The last submitted tasks in submission order, oldest first.
    pub fn recent_submissions(&self) -> Vec<(TaskId, TaskType)> {
        self.shared
            .state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .copied()
            .collect()
    }

    /// Drop held and queued non-immediate tasks and leave request mode.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock().unwrap();
        let dropped = state.resets.len() + state.invalidates.len() + state.regular.len();
        state.resets.clear();
        state.invalidates.clear();
        state.regular.clear();
        state.making_request = false;
        info!(dropped, "Task queue reset");
    }

    /// Stop the worker after the current task. Pending tasks are dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            state.immediate.clear();
            state.resets.clear();
            state.invalidates.clear();
            state.regular.clear();
        }
        self.shared.work.notify_one();
        self.shared.idle.notify_waiters();
    }

    /// Resolve once no task is running and none is runnable.
    ///
    /// Held tasks and pending timeouts do not count as runnable.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            {
                let state = self.shared.state.lock().unwrap();
                if state.shutdown || (state.running.is_none() && !state.has_runnable()) {
                    return;
                }
            }
            notified.await;
        }
    }
}

async fn run_worker(shared: Arc<QueueShared>) {
    loop {
        let next = {
            let mut state = shared.state.lock().unwrap();
            if state.shutdown {
                break;
            }
            let next = state.next();
            if let Some(task) = &next {
                state.running = Some(task.id);
                if task.task_type == TaskType::HeadInvalidate {
                    state.making_request = true;
                }
            }
            next
        };

        let Some(task) = next else {
            shared.idle.notify_waiters();
            shared.work.notified().await;
            continue;
        };

        let skipped = task
            .claim
            .as_ref()
            .is_some_and(|claim| claim.swap(true, Ordering::SeqCst));

        if skipped {
            debug!(task = %task.id, "Task already replaced by its timeout task");
        } else {
            debug!(
                task = %task.id,
                task_type = ?task.task_type,
                wait_ms = task.enqueued_at.elapsed().as_millis() as u64,
                "Executing task"
            );
            if let Err(e) = tokio::spawn(task.body).await {
                error!(task = %task.id, error = %e, "Task panicked");
            }
        }

        let mut state = shared.state.lock().unwrap();
        state.running = None;
        if !skipped {
            state.executed += 1;
        }
        if task.initialization {
            state.initialized = true;
            info!("Task queue initialized");
        }
        if task.task_type == TaskType::HeadReset {
            state.making_request = false;
        }
    }
    debug!("Task queue worker stopped");
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
