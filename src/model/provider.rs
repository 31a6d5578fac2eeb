use super::{ModelError, MutationContext, StreamStructure, UiContext};

/// UI-facing sink bound to a session.
///
/// Implementations live on the UI side; every method must be cheap and
/// non-blocking since the session manager calls them from its task queue.
pub trait ModelProvider: Send + Sync {
    /// Session currently bound to this provider, if any.
    fn session_id(&self) -> Option<String>;

    /// The bound session no longer exists or is stale; the UI should re-request.
    fn invalidate(&self, ui_context: &UiContext);

    /// Surface an error to the UI.
    fn raise_error(&self, error: ModelError);

    /// Apply a committed mutation.
    fn apply(&self, mutation: ModelMutation);
}

impl<'p> dyn ModelProvider + 'p {
    /// Start building a mutation for this provider.
    pub fn edit(&self) -> ModelMutationBuilder<'_> {
        ModelMutationBuilder {
            provider: self,
            mutation: ModelMutation::default(),
        }
    }
}

/// Reports how deep the user scrolled into the session's content.
pub trait ViewDepthProvider: Send + Sync {
    /// Content id of the deepest child the user has seen.
    fn child_view_depth(&self) -> Option<String>;
}

/// A batch of changes delivered to a model provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMutation {
    pub structures: Vec<StreamStructure>,
    pub session_id: Option<String>,
    pub mutation_context: Option<MutationContext>,
    pub ui_context: Option<UiContext>,
    /// Every payload referenced by `structures` is already in memory.
    pub cached_bindings: bool,
}

/// Builder returned by `ModelProvider::edit`.
pub struct ModelMutationBuilder<'a> {
    provider: &'a dyn ModelProvider,
    mutation: ModelMutation,
}

impl<'a> ModelMutationBuilder<'a> {
    pub fn add_child(mut self, structure: StreamStructure) -> Self {
        self.mutation.structures.push(structure);
        self
    }

    pub fn add_children(mut self, structures: impl IntoIterator<Item = StreamStructure>) -> Self {
        self.mutation.structures.extend(structures);
        self
    }

    pub fn set_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.mutation.session_id = Some(session_id.into());
        self
    }

    pub fn set_mutation_context(mut self, context: MutationContext) -> Self {
        self.mutation.mutation_context = Some(context);
        self
    }

    pub fn set_ui_context(mut self, ui_context: Option<UiContext>) -> Self {
        self.mutation.ui_context = ui_context;
        self
    }

    pub fn set_cached_bindings(mut self, cached: bool) -> Self {
        self.mutation.cached_bindings = cached;
        self
    }

    /// Deliver the mutation to the provider.
    pub fn commit(self) {
        self.provider.apply(self.mutation);
    }
}
