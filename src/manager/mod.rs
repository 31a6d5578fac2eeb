//! Feed session manager.
//!
//! Coordinates session creation requested by the UI with the request
//! scheduling policy, store I/O and network refreshes. All store and
//! network work runs on the [`TaskQueue`]; the only state touched from
//! both the caller and the queue is the list of sessions under
//! construction and the set of outstanding mutations.

mod tracker;


pub use tracker::SessionMutationTracker;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::cache::{ContentCache, SharedStateCache};
use crate::config::SessionConfig;
use crate::error::{FeedError, FeedResult, RequestError, RequestResult};
use crate::model::{
    ConsistencyToken, ErrorType, Model, ModelError, ModelProvider, MutationContext,
    PayloadWithId, RequestReason, StreamPayload, StreamSharedState, StreamStructure,
    StreamToken, UiContext, ViewDepthProvider,
};
use crate::request::{ActionUploadRequestManager, FeedRequestManager};
use crate::scheduler::{SchedulerApi, SessionState};
use crate::session::{Session, SessionCache, SessionFactory, SessionManagerMutation};
use crate::store::{compact_structures, Store, StoreListener};
use crate::task_queue::{TaskId, TaskQueue, TaskType};

/// Host lifecycle events the manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Initialize,
    ClearAll,
    ClearAllWithRefresh,
}

/// Lifecycle of a manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Initializing,
    Ready,
    ShutDown,
}

/// Entry point for UI-facing session operations.
///
/// Must be created inside a Tokio runtime. Dropping the manager shuts
/// down its task queue.
pub struct FeedSessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    store: Arc<dyn Store>,
    scheduler: Arc<dyn SchedulerApi>,
    request_manager: Arc<dyn FeedRequestManager>,
    action_upload: Arc<dyn ActionUploadRequestManager>,
    task_queue: TaskQueue,
    session_cache: SessionCache,
    content_cache: ContentCache,
    shared_state_cache: SharedStateCache,
    session_factory: SessionFactory,
    /// Created but not yet attached; disjoint from the attached map.
    under_construction: Mutex<Vec<Arc<Session>>>,
    outstanding_mutations: Mutex<HashSet<u64>>,
    next_mutation_id: AtomicU64,
    no_cards_error: Mutex<Option<ModelError>>,
    initialized: AtomicBool,
    state: Mutex<ManagerState>,
}

/// Resets the manager when the store gives up on persistence.
struct EphemeralModeListener {
    manager: Weak<Inner>,
}

impl StoreListener for EphemeralModeListener {
    fn on_switch_to_ephemeral_mode(&self) {
        if let Some(inner) = self.manager.upgrade() {
            warn!("Store switched to ephemeral mode, resetting session manager");
            inner.reset();
        }
    }
}

impl FeedSessionManager {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn Store>,
        scheduler: Arc<dyn SchedulerApi>,
        request_manager: Arc<dyn FeedRequestManager>,
        action_upload: Arc<dyn ActionUploadRequestManager>,
    ) -> Self {
        let inner = Arc::new(Inner {
            session_cache: SessionCache::new(Arc::clone(&store), config.lifetime_ms),
            content_cache: ContentCache::new(config.content_cache_capacity),
            shared_state_cache: SharedStateCache::new(),
            session_factory: SessionFactory::new(config.schema_version),
            task_queue: TaskQueue::new(),
            under_construction: Mutex::new(Vec::new()),
            outstanding_mutations: Mutex::new(HashSet::new()),
            next_mutation_id: AtomicU64::new(1),
            no_cards_error: Mutex::new(None),
            initialized: AtomicBool::new(false),
            state: Mutex::new(ManagerState::Created),
            config,
            store,
            scheduler,
            request_manager,
            action_upload,
        });

        inner.store.register_observer(Arc::new(EphemeralModeListener {
            manager: Arc::downgrade(&inner),
        }));

        Self { inner }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create a session bound to `provider` and schedule its population.
    ///
    /// Returns immediately; the session gets its id once population runs.
    /// The caller must keep `provider` alive, the session only holds it weakly.
    pub fn get_new_session(
        &self,
        provider: Arc<dyn ModelProvider>,
        view_depth_provider: Option<Arc<dyn ViewDepthProvider>>,
        ui_context: Option<UiContext>,
    ) -> Arc<Session> {
        self.inner.initialize();

        let session = self
            .inner
            .session_factory
            .get_session(&provider, view_depth_provider);
        self.inner
            .under_construction
            .lock()
            .unwrap()
            .push(Arc::clone(&session));

        if self.inner.session_cache.head().is_initialized() {
            self.inner.populate_session(&session, ui_context);
        } else {
            debug!(
                session_key = session.key(),
                "Head not initialized, deferring population"
            );
            let inner = Arc::clone(&self.inner);
            let deferred = Arc::clone(&session);
            self.inner.task_queue.execute(
                TaskId::PopulateNewSession,
                TaskType::UserFacing,
                async move { inner.populate_session(&deferred, ui_context) },
            );
        }
        session
    }

    /// Rebind an attached session to `provider`.
    ///
    /// Unknown or expired sessions invalidate `provider` instead.
    pub fn get_existing_session(
        &self,
        session_id: &str,
        provider: Arc<dyn ModelProvider>,
        ui_context: UiContext,
    ) {
        self.inner.initialize();
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.to_string();
        self.inner.task_queue.execute(
            TaskId::GetExistingSession,
            TaskType::Background,
            async move {
                inner
                    .get_existing_session_task(session_id, provider, ui_context)
                    .await
            },
        );
    }

    /// Queue a refresh. A targeted session's provider is invalidated once
    /// the request is issued.
    pub fn trigger_refresh(
        &self,
        session_id: Option<String>,
        reason: RequestReason,
        ui_context: Option<UiContext>,
    ) {
        self.inner.initialize();
        self.inner.trigger_refresh(session_id, reason, ui_context);
    }

    /// Request the page behind `token` for `session_id`.
    pub fn handle_token(&self, session_id: &str, token: StreamToken) {
        self.inner.initialize();
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.to_string();
        self.inner.task_queue.execute(
            TaskId::HandleToken,
            TaskType::Background,
            async move { inner.handle_token_task(session_id, token).await },
        );
    }

    /// Register a new outstanding mutation and return its tracker.
    pub fn get_update_consumer(&self, context: MutationContext) -> SessionMutationTracker {
        self.inner.get_update_consumer(context)
    }

    /// Route an error to the UI.
    pub fn model_error_observer(&self, session_id: Option<&str>, error: ModelError) {
        self.inner.model_error_observer(session_id, error);
    }

    /// Drop every outstanding mutation so their results are discarded.
    pub fn cancel_outstanding_mutations(&self) -> usize {
        self.inner.cancel_outstanding_mutations()
    }

    pub fn pending_mutations(&self) -> usize {
        self.inner.outstanding_mutations.lock().unwrap().len()
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Payloads for `content_ids`, in request order, from the content cache
    /// with the store as fallback.
    pub async fn get_content(&self, content_ids: Vec<String>) -> FeedResult<Vec<PayloadWithId>> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_queue
            .execute(TaskId::GetContent, TaskType::Immediate, async move {
                let result = inner.get_content_task(&content_ids).await;
                let _ = tx.send(result);
            });
        rx.await.map_err(|_| FeedError::ShutDown)?
    }

    pub fn get_shared_state(&self, content_id: &str) -> Option<StreamSharedState> {
        self.inner.shared_state_cache.get(content_id)
    }

    /// Head's live structures.
    pub fn head_structures(&self) -> Vec<StreamStructure> {
        self.inner.session_cache.head().structures()
    }

    pub fn attached_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.session_cache.attached_sessions()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start loading head and persisted sessions. Later calls are no-ops.
    pub fn initialize(&self) {
        self.inner.initialize();
    }

    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        info!(event = ?event, "Lifecycle event");
        match event {
            LifecycleEvent::Initialize => self.inner.initialize(),
            LifecycleEvent::ClearAll => self.inner.clear_all(false),
            LifecycleEvent::ClearAllWithRefresh => self.inner.clear_all(true),
        }
    }

    /// Drop head, attached sessions and caches; invalidate sessions under
    /// construction.
    pub fn reset(&self) {
        self.inner.reset();
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.lock().unwrap()
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.inner.task_queue
    }

    /// Resolve once the task queue has nothing runnable.
    pub async fn wait_idle(&self) {
        self.inner.task_queue.wait_idle().await;
    }

    pub fn shutdown(&self) {
        *self.inner.state.lock().unwrap() = ManagerState::ShutDown;
        let cancelled = self.inner.cancel_outstanding_mutations();
        self.inner.task_queue.shutdown();
        info!(cancelled, "Feed session manager shut down");
    }
}

impl Drop for FeedSessionManager {
    fn drop(&mut self) {
        // Queued tasks hold the inner state; drop them with the manager.
        self.inner.task_queue.shutdown();
    }
}

impl Inner {
    fn initialize(self: &Arc<Self>) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if *state == ManagerState::Created {
                *state = ManagerState::Initializing;
            }
        }
        info!("Initializing feed session manager");
        let inner = Arc::clone(self);
        self.task_queue
            .initialize(async move { inner.initialize_task().await });
    }

    async fn initialize_task(&self) {
        match self.store.get_shared_states().await {
            Ok(states) => {
                let count = states.len();
                for state in states {
                    self.shared_state_cache.put(state);
                }
                debug!(count, "Loaded shared states");
            }
            Err(e) => {
                error!(error = %e, "Failed to load shared states");
                self.store.switch_to_ephemeral_mode().await;
            }
        }

        if let Err(e) = self.session_cache.initialize(&self.session_factory).await {
            error!(error = %e, "Failed to initialize session cache");
            self.store.switch_to_ephemeral_mode().await;
        }

        {
            let mut state = self.state.lock().unwrap();
            if *state == ManagerState::Initializing {
                *state = ManagerState::Ready;
            }
        }
        info!(
            head_items = self.session_cache.head().len(),
            sessions = self.session_cache.attached_len(),
            "Feed session manager initialized"
        );
    }

    // ========================================================================
    // Population
    // ========================================================================

    fn populate_session(self: &Arc<Self>, session: &Arc<Session>, ui_context: Option<UiContext>) {
        let head = self.session_cache.head();
        let state = SessionState {
            has_content: !head.is_empty(),
            content_creation_date_time_ms: head.last_refresh_ms(),
            is_request_outstanding: self.task_queue.is_making_request(),
        };
        let behavior = self.scheduler.should_session_request_data(&state);
        let make_request = behavior.should_make_request();
        let append = behavior.should_append_outstanding_request();
        let with_timeout = behavior.should_populate_with_timeout();
        info!(
            session_key = session.key(),
            behavior = %behavior,
            make_request,
            append,
            with_timeout,
            "Scheduling session population"
        );

        let reason = if state.has_content {
            RequestReason::OpenWithContent
        } else {
            RequestReason::OpenWithoutContent
        };

        // Show current content first, then refresh; otherwise refresh first
        // so population can pick up fresh content.
        if make_request && !behavior.populates_before_request() {
            self.trigger_refresh(None, reason, None);
        }
        self.schedule_population(session, ui_context, append, with_timeout);
        if make_request && behavior.populates_before_request() {
            self.trigger_refresh(None, reason, None);
        }
    }

    fn schedule_population(
        self: &Arc<Self>,
        session: &Arc<Session>,
        ui_context: Option<UiContext>,
        append: bool,
        with_timeout: bool,
    ) {
        let task_type = if append {
            TaskType::UserFacing
        } else {
            TaskType::Immediate
        };

        let task = {
            let inner = Arc::clone(self);
            let session = Arc::clone(session);
            let ui_context = ui_context.clone();
            async move { inner.populate_session_task(session, ui_context).await }
        };

        if !with_timeout {
            self.task_queue
                .execute(TaskId::PopulateNewSession, task_type, task);
            return;
        }

        let timeout_task = {
            let inner = Arc::clone(self);
            let session = Arc::clone(session);
            async move {
                info!(
                    session_key = session.key(),
                    "Population timed out, using current content"
                );
                inner.populate_session_task(session, ui_context).await
            }
        };
        self.task_queue.execute_with_timeout(
            TaskId::PopulateNewSession,
            task_type,
            task,
            timeout_task,
            Duration::from_millis(self.config.population_timeout_ms),
        );
    }

    async fn populate_session_task(&self, session: Arc<Session>, ui_context: Option<UiContext>) {
        if !self.is_under_construction(&session) {
            debug!(
                session_key = session.key(),
                "Session no longer under construction, skipping population"
            );
            return;
        }

        let no_cards = self.no_cards_error.lock().unwrap().clone();
        if let Some(error) = no_cards {
            if self.session_cache.head().is_empty() {
                info!(
                    session_key = session.key(),
                    "Head empty after no-cards error, replaying error"
                );
                self.remove_under_construction(&session);
                session.mark_empty();
                session.raise_error(error);
                return;
            }
        }

        let session_id = match self.store.create_new_session().await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to create session in store");
                self.abort_population(&session).await;
                return;
            }
        };

        let journal = match self.store.get_stream_structures(&session_id).await {
            Ok(journal) => journal,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to load session structures");
                self.abort_population(&session).await;
                return;
            }
        };

        let structures = compact_structures(&journal);
        let cached_bindings = self.cached_bindings(&structures);
        let items = structures.len();
        session.populate_model_provider(&session_id, structures, cached_bindings, ui_context);

        {
            let mut under_construction = self.under_construction.lock().unwrap();
            under_construction.retain(|s| s.key() != session.key());
            self.session_cache.put_attached(Arc::clone(&session));
        }

        if let Err(e) = self.session_cache.persist_metadata().await {
            error!(session_id = %session_id, error = %e, "Failed to persist session metadata");
            self.store.switch_to_ephemeral_mode().await;
        }

        info!(
            session_id = %session_id,
            items,
            cached_bindings,
            "Session populated"
        );
    }

    async fn abort_population(&self, session: &Arc<Session>) {
        self.store.switch_to_ephemeral_mode().await;
        self.remove_under_construction(session);
    }

    fn cached_bindings(&self, structures: &[StreamStructure]) -> bool {
        self.config.use_cached_bindings
            && structures
                .iter()
                .all(|s| self.content_cache.contains(&s.content_id))
    }

    fn is_under_construction(&self, session: &Arc<Session>) -> bool {
        self.under_construction
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.key() == session.key())
    }

    fn remove_under_construction(&self, session: &Arc<Session>) {
        self.under_construction
            .lock()
            .unwrap()
            .retain(|s| s.key() != session.key());
    }

    async fn get_existing_session_task(
        &self,
        session_id: String,
        provider: Arc<dyn ModelProvider>,
        ui_context: UiContext,
    ) {
        let Some(session) = self.session_cache.get_attached(&session_id) else {
            info!(session_id = %session_id, "Session not found, invalidating provider");
            provider.invalidate(&ui_context);
            return;
        };

        if let Some(existing) = session.provider() {
            if !same_provider(&existing, &provider) {
                debug!(session_id = %session_id, "Invalidating previously bound provider");
                existing.invalidate(&UiContext::default());
            }
        }
        session.bind_provider(&provider);
        session.touch();

        let journal = match self.store.get_stream_structures(&session_id).await {
            Ok(journal) => journal,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to load session structures");
                self.store.switch_to_ephemeral_mode().await;
                provider.invalidate(&ui_context);
                return;
            }
        };

        let structures = compact_structures(&journal);
        let cached_bindings = self.cached_bindings(&structures);
        session.populate_model_provider(
            &session_id,
            structures,
            cached_bindings,
            Some(ui_context),
        );

        if let Err(e) = self.session_cache.persist_metadata().await {
            error!(session_id = %session_id, error = %e, "Failed to persist session metadata");
            self.store.switch_to_ephemeral_mode().await;
        }
        debug!(session_id = %session_id, cached_bindings, "Existing session rebound");
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn trigger_refresh(
        self: &Arc<Self>,
        session_id: Option<String>,
        reason: RequestReason,
        ui_context: Option<UiContext>,
    ) {
        debug!(reason = %reason, session_id = ?session_id, "Queueing refresh");
        let inner = Arc::clone(self);
        self.task_queue.execute(
            TaskId::TriggerRefresh,
            TaskType::HeadInvalidate,
            async move {
                inner
                    .trigger_refresh_task(session_id, reason, ui_context)
                    .await
            },
        );
    }

    async fn trigger_refresh_task(
        self: &Arc<Self>,
        session_id: Option<String>,
        reason: RequestReason,
        ui_context: Option<UiContext>,
    ) {
        let token = self.upload_pending_actions().await;
        let tracker = self.get_update_consumer(MutationContext::for_refresh(
            session_id.clone(),
            ui_context.clone(),
        ));

        info!(reason = %reason, mutation = tracker.id(), "Issuing refresh");
        let request_manager = Arc::clone(&self.request_manager);
        spawn_request(tracker, async move {
            request_manager.trigger_refresh(reason, &token).await
        });

        let Some(session_id) = session_id else {
            return;
        };
        match self.session_cache.get_attached(&session_id) {
            Some(session) => {
                debug!(
                    session_id = %session_id,
                    view_depth = ?session.view_depth(),
                    "Invalidating refreshed session"
                );
                session.invalidate_provider(&ui_context.unwrap_or_default());
            }
            None => debug!(session_id = %session_id, "Refreshed session not attached"),
        }
    }

    async fn handle_token_task(self: &Arc<Self>, session_id: String, token: StreamToken) {
        let consistency_token = self.upload_pending_actions().await;
        let tracker = self.get_update_consumer(MutationContext::for_continuation(
            session_id.clone(),
            token.clone(),
        ));

        info!(
            session_id = %session_id,
            token = %token.content_id,
            mutation = tracker.id(),
            "Requesting next page"
        );
        let request_manager = Arc::clone(&self.request_manager);
        spawn_request(tracker, async move {
            request_manager.load_more(&token, &consistency_token).await
        });
    }

    /// Upload pending actions and return the token to send with the next
    /// request. Upload failures keep the stored token.
    async fn upload_pending_actions(&self) -> ConsistencyToken {
        let token = match self.store.get_consistency_token().await {
            Ok(token) => token.unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "Failed to read consistency token");
                self.store.switch_to_ephemeral_mode().await;
                ConsistencyToken::default()
            }
        };

        let actions = match self.store.get_all_uploadable_actions().await {
            Ok(actions) => actions,
            Err(e) => {
                error!(error = %e, "Failed to read uploadable actions");
                self.store.switch_to_ephemeral_mode().await;
                Vec::new()
            }
        };
        if actions.is_empty() {
            return token;
        }

        let count = actions.len();
        match self
            .action_upload
            .upload_actions(actions.clone(), token.clone())
            .await
        {
            Ok(new_token) => {
                if let Err(e) = self.store.set_consistency_token(&new_token).await {
                    error!(error = %e, "Failed to store consistency token");
                    self.store.switch_to_ephemeral_mode().await;
                } else if let Err(e) = self.store.remove_uploadable_actions(&actions).await {
                    error!(error = %e, "Failed to remove uploaded actions");
                    self.store.switch_to_ephemeral_mode().await;
                }
                info!(actions = count, "Uploaded pending actions");
                new_token
            }
            Err(e) => {
                warn!(actions = count, error = %e, "Action upload failed, keeping previous token");
                token
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn get_update_consumer(self: &Arc<Self>, context: MutationContext) -> SessionMutationTracker {
        let id = self.next_mutation_id.fetch_add(1, Ordering::Relaxed);
        self.outstanding_mutations.lock().unwrap().insert(id);
        SessionMutationTracker::new(id, context, Arc::downgrade(self))
    }

    fn cancel_outstanding_mutations(&self) -> usize {
        let mut outstanding = self.outstanding_mutations.lock().unwrap();
        let cancelled = outstanding.len();
        outstanding.clear();
        cancelled
    }

    /// Runs on the queue for every tracker that received a result.
    async fn commit_result(
        self: &Arc<Self>,
        mutation_id: u64,
        context: MutationContext,
        result: Result<Model, RequestError>,
    ) {
        if !self.outstanding_mutations.lock().unwrap().remove(&mutation_id) {
            info!(mutation = mutation_id, "Mutation cancelled, dropping result");
            return;
        }
        match result {
            Ok(model) => self.apply_model(model, context).await,
            Err(e) => self.handle_request_error(e, context),
        }
    }

    async fn apply_model(self: &Arc<Self>, model: Model, context: MutationContext) {
        for state in model.shared_states() {
            self.shared_state_cache.put(state.clone());
        }

        let mutation =
            SessionManagerMutation::new(&*self.store, &self.session_cache, &self.content_cache);
        match mutation.commit(&model, &context).await {
            Ok(outcome) => debug!(
                head_cleared = outcome.head_cleared,
                sessions = outcome.updated_sessions.len(),
                "Applied mutation"
            ),
            Err(e) => {
                error!(error = %e, "Failed to commit mutation");
                self.store.switch_to_ephemeral_mode().await;
                return;
            }
        }

        if context.is_continuation() {
            return;
        }

        let now = Utc::now().timestamp_millis();
        self.session_cache.head().set_last_refresh_ms(now);
        self.scheduler.on_receive_new_content(now);
        if self.session_cache.head().is_empty() {
            info!("Refresh left head empty");
            self.model_error_observer(None, ModelError::no_cards());
        }

        match self.session_cache.evict_expired().await {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, "Evicted expired sessions"),
            Err(e) => {
                error!(error = %e, "Failed to evict expired sessions");
                self.store.switch_to_ephemeral_mode().await;
            }
        }
    }

    fn handle_request_error(self: &Arc<Self>, error: RequestError, context: MutationContext) {
        warn!(
            error = %error,
            continuation = context.is_continuation(),
            "Feed request failed"
        );
        match (context.continuation_token, context.requesting_session_id) {
            (Some(token), Some(session_id)) => {
                self.model_error_observer(Some(&session_id), ModelError::pagination(token));
            }
            _ => {
                self.scheduler.on_request_error(error.code());
                self.model_error_observer(None, ModelError::no_cards());
            }
        }
    }

    fn model_error_observer(self: &Arc<Self>, session_id: Option<&str>, error: ModelError) {
        match (session_id, error.error_type) {
            (None, ErrorType::NoCards) => {
                info!("Recording no-cards error");
                *self.no_cards_error.lock().unwrap() = Some(error);
                // Queued so populations already waiting still observe it.
                let inner = Arc::clone(self);
                self.task_queue.execute(
                    TaskId::ResetNoCardsError,
                    TaskType::UserFacing,
                    async move {
                        debug!("Clearing no-cards error");
                        *inner.no_cards_error.lock().unwrap() = None;
                    },
                );
            }
            (Some(session_id), ErrorType::Pagination) => {
                match self.session_cache.get_attached(session_id) {
                    Some(session) => session.raise_error(error),
                    None => warn!(session_id, "Pagination error for unknown session"),
                }
            }
            (session_id, error_type) => {
                warn!(
                    session_id = ?session_id,
                    error_type = ?error_type,
                    "Unhandled model error, ignoring"
                );
            }
        }
    }

    // ========================================================================
    // Content
    // ========================================================================

    async fn get_content_task(&self, content_ids: &[String]) -> FeedResult<Vec<PayloadWithId>> {
        let mut found: HashMap<String, StreamPayload> = HashMap::new();
        let mut misses = Vec::new();
        for id in content_ids {
            match self.content_cache.get(id) {
                Some(payload) => {
                    found.insert(id.clone(), payload);
                }
                None => misses.push(id.clone()),
            }
        }

        if !misses.is_empty() {
            match self.store.get_payloads(&misses).await {
                Ok(payloads) => {
                    self.content_cache.put_all(&payloads);
                    for p in payloads {
                        found.insert(p.content_id, p.payload);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to read payloads");
                    self.store.switch_to_ephemeral_mode().await;
                    return Err(e.into());
                }
            }
        }

        let result: Vec<PayloadWithId> = content_ids
            .iter()
            .filter_map(|id| {
                found.get(id).map(|payload| PayloadWithId {
                    content_id: id.clone(),
                    payload: payload.clone(),
                })
            })
            .collect();

        let requested = content_ids.len();
        let missing = requested - result.len();
        if missing > 0 {
            let ratio = missing as f64 / requested as f64;
            if ratio < self.config.content_miss_threshold {
                warn!(missing, requested, "Some requested content is missing");
            } else {
                error!(missing, requested, "Too much requested content is missing");
                self.store.switch_to_ephemeral_mode().await;
                return Err(FeedError::ContentMissing { missing, requested });
            }
        }

        debug!(requested, cache_misses = misses.len(), "Content fetched");
        Ok(result)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn clear_all(self: &Arc<Self>, refresh: bool) {
        let cancelled = self.cancel_outstanding_mutations();
        info!(cancelled, refresh, "Clearing all content");

        let inner = Arc::clone(self);
        self.task_queue
            .execute(TaskId::ClearAll, TaskType::Immediate, async move {
                inner.task_queue.reset();
                inner.reset();
                if let Err(e) = inner.store.clear_all().await {
                    error!(error = %e, "Failed to clear store");
                    inner.store.switch_to_ephemeral_mode().await;
                }
                // Queued after the reset so it is not dropped by it.
                if refresh {
                    inner.trigger_refresh(None, RequestReason::ClearAll, None);
                }
            });
    }

    fn reset(&self) {
        self.session_cache.reset();
        let under_construction: Vec<Arc<Session>> =
            std::mem::take(&mut *self.under_construction.lock().unwrap());
        for session in &under_construction {
            session.invalidate_provider(&UiContext::default());
        }
        self.content_cache.reset();
        self.shared_state_cache.reset();
        info!(
            invalidated = under_construction.len(),
            "Session manager reset"
        );
    }
}

/// Whether two handles point at the same provider.
fn same_provider(a: &Arc<dyn ModelProvider>, b: &Arc<dyn ModelProvider>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Run a network request off the queue and deliver its result to the
/// tracker. A panicking request is delivered as a failure so the commit
/// that releases held tasks is still queued.
fn spawn_request<F>(tracker: SessionMutationTracker, request: F)
where
    F: Future<Output = RequestResult<Model>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = match tokio::spawn(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(mutation = tracker.id(), error = %e, "Request task failed");
                Err(RequestError::TaskFailed {
                    message: e.to_string(),
                })
            }
        };
        tracker.accept(result);
    });
}
