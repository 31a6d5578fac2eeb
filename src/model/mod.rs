//! Feed content model.
//!
//! These are the values that flow between the store, the network
//! request managers, the sessions and the UI-facing model providers.

mod provider;


pub use provider::{ModelMutation, ModelMutationBuilder, ModelProvider, ViewDepthProvider};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Session id of the canonical head session.
pub const HEAD_SESSION_ID: &str = "$HEAD";

/// Structural operation applied to a session's content list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Drop everything the session holds.
    ClearAll,
    /// Update the content if present, otherwise append it.
    UpdateOrAppend,
    /// Remove the content.
    Remove,
    /// Content that must be present in the store but is not rendered.
    RequiredContent,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::ClearAll => write!(f, "clear_all"),
            Operation::UpdateOrAppend => write!(f, "update_or_append"),
            Operation::Remove => write!(f, "remove"),
            Operation::RequiredContent => write!(f, "required_content"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clear_all" => Ok(Operation::ClearAll),
            "update_or_append" => Ok(Operation::UpdateOrAppend),
            "remove" => Ok(Operation::Remove),
            "required_content" => Ok(Operation::RequiredContent),
            _ => Err(format!("Unknown operation: {}", s)),
        }
    }
}

/// One structural change to the content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStructure {
    /// What to do with the content.
    pub operation: Operation,
    /// Content the operation applies to (empty for `ClearAll`).
    pub content_id: String,
    /// Parent in the content tree, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_content_id: Option<String>,
}

impl StreamStructure {
    /// A `ClearAll` structure.
    pub fn clear_all() -> Self {
        Self {
            operation: Operation::ClearAll,
            content_id: String::new(),
            parent_content_id: None,
        }
    }

    /// An `UpdateOrAppend` structure under an optional parent.
    pub fn update_or_append(content_id: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            operation: Operation::UpdateOrAppend,
            content_id: content_id.into(),
            parent_content_id: parent.map(str::to_string),
        }
    }

    /// A `Remove` structure.
    pub fn remove(content_id: impl Into<String>) -> Self {
        Self {
            operation: Operation::Remove,
            content_id: content_id.into(),
            parent_content_id: None,
        }
    }

    /// A `RequiredContent` structure.
    pub fn required_content(content_id: impl Into<String>) -> Self {
        Self {
            operation: Operation::RequiredContent,
            content_id: content_id.into(),
            parent_content_id: None,
        }
    }
}

/// A renderable feed feature (card, cluster, stream root).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFeature {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Opaque rendering payload.
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Pagination continuation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamToken {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub next_page_token: String,
}

/// A rendering template shared across features.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub body: String,
}

/// The inner record of a shared state; this is what gets interned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedStateItem {
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub stylesheets: BTreeMap<String, String>,
}

/// Shared rendering state keyed by its content id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSharedState {
    pub content_id: String,
    pub shared_state_item: Arc<SharedStateItem>,
}

impl StreamSharedState {
    pub fn new(content_id: impl Into<String>, item: SharedStateItem) -> Self {
        Self {
            content_id: content_id.into(),
            shared_state_item: Arc::new(item),
        }
    }
}

/// Any payload the store can hold for a content id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    Feature(StreamFeature),
    Token(StreamToken),
    SharedState(StreamSharedState),
}

/// A payload together with the id it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadWithId {
    pub content_id: String,
    pub payload: StreamPayload,
}

/// A structure and the payload it introduces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDataOperation {
    pub structure: StreamStructure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StreamPayload>,
}

impl StreamDataOperation {
    pub fn new(structure: StreamStructure, payload: Option<StreamPayload>) -> Self {
        Self { structure, payload }
    }
}

/// A batch of content operations delivered by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub operations: Vec<StreamDataOperation>,
    #[serde(default)]
    pub schema_version: u32,
}

impl Model {
    pub fn new(operations: Vec<StreamDataOperation>) -> Self {
        Self {
            operations,
            schema_version: 0,
        }
    }

    /// True when the batch starts by clearing everything.
    pub fn clears_head(&self) -> bool {
        self.operations
            .first()
            .is_some_and(|op| op.structure.operation == Operation::ClearAll)
    }

    /// Shared states carried by this batch.
    pub fn shared_states(&self) -> impl Iterator<Item = &StreamSharedState> {
        self.operations.iter().filter_map(|op| match &op.payload {
            Some(StreamPayload::SharedState(state)) => Some(state),
            _ => None,
        })
    }
}

/// Opaque UI context handed back to the UI with invalidations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl UiContext {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
        }
    }
}

/// Why a mutation happened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationContext {
    /// Set when the mutation answers a pagination request.
    pub continuation_token: Option<StreamToken>,
    /// Session that issued the request, if any.
    pub requesting_session_id: Option<String>,
    pub ui_context: Option<UiContext>,
}

impl MutationContext {
    pub fn for_refresh(session_id: Option<String>, ui_context: Option<UiContext>) -> Self {
        Self {
            continuation_token: None,
            requesting_session_id: session_id,
            ui_context,
        }
    }

    pub fn for_continuation(session_id: impl Into<String>, token: StreamToken) -> Self {
        Self {
            continuation_token: Some(token),
            requesting_session_id: Some(session_id.into()),
            ui_context: None,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.continuation_token.is_some()
    }
}

/// Server acknowledgement of uploaded client actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyToken(pub String);

/// A client action waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUploadableAction {
    pub feature_content_id: String,
    pub action_type: String,
    pub timestamp_ms: i64,
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestReason {
    HostRequested,
    ManualRefresh,
    OpenWithContent,
    OpenWithoutContent,
    ClearAll,
}

impl RequestReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestReason::HostRequested => "host_requested",
            RequestReason::ManualRefresh => "manual_refresh",
            RequestReason::OpenWithContent => "open_with_content",
            RequestReason::OpenWithoutContent => "open_without_content",
            RequestReason::ClearAll => "clear_all",
        }
    }
}

impl std::fmt::Display for RequestReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category of an error surfaced to a model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The server returned no content at all.
    NoCards,
    /// A continuation request failed.
    Pagination,
    Unknown,
}

/// Error signal delivered to the UI through a model provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelError {
    pub error_type: ErrorType,
    pub continuation_token: Option<StreamToken>,
}

impl ModelError {
    pub fn no_cards() -> Self {
        Self {
            error_type: ErrorType::NoCards,
            continuation_token: None,
        }
    }

    pub fn pagination(token: StreamToken) -> Self {
        Self {
            error_type: ErrorType::Pagination,
            continuation_token: Some(token),
        }
    }
}

/// Persisted record of an attached session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub created_at_ms: i64,
    pub last_accessed_ms: i64,
    pub schema_version: u32,
}
