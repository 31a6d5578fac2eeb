use serde::{Deserialize, Serialize};

use crate::model::{ConsistencyToken, RequestReason, StreamToken, StreamUploadableAction};

/// Body of a refresh request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub reason: RequestReason,
    #[serde(rename = "consistencyToken", skip_serializing_if = "Option::is_none")]
    pub consistency_token: Option<String>,
}

/// Body of a load-more request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMoreRequest {
    #[serde(rename = "nextPageToken")]
    pub next_page_token: String,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "consistencyToken", skip_serializing_if = "Option::is_none")]
    pub consistency_token: Option<String>,
}

/// Body of an action upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadActionsRequest {
    pub actions: Vec<StreamUploadableAction>,
    #[serde(rename = "consistencyToken", skip_serializing_if = "Option::is_none")]
    pub consistency_token: Option<String>,
}

/// Response to an action upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadActionsResponse {
    #[serde(rename = "consistencyToken")]
    pub consistency_token: String,
}

/// Empty tokens are not sent.
fn token_field(token: &ConsistencyToken) -> Option<String> {
    if token.0.is_empty() {
        None
    } else {
        Some(token.0.clone())
    }
}

impl RefreshRequest {
    pub fn new(reason: RequestReason, token: &ConsistencyToken) -> Self {
        Self {
            reason,
            consistency_token: token_field(token),
        }
    }
}

impl LoadMoreRequest {
    pub fn new(stream_token: &StreamToken, token: &ConsistencyToken) -> Self {
        Self {
            next_page_token: stream_token.next_page_token.clone(),
            parent_id: stream_token.parent_id.clone(),
            consistency_token: token_field(token),
        }
    }
}

impl UploadActionsRequest {
    pub fn new(actions: Vec<StreamUploadableAction>, token: &ConsistencyToken) -> Self {
        Self {
            actions,
            consistency_token: token_field(token),
        }
    }
}

impl From<UploadActionsResponse> for ConsistencyToken {
    fn from(response: UploadActionsResponse) -> Self {
        ConsistencyToken(response.consistency_token)
    }
}
