//! Network request managers.
//!
//! The session manager never talks HTTP directly; it goes through the
//! [`FeedRequestManager`] and [`ActionUploadRequestManager`] seams.
//! [`HttpFeedClient`] implements both against a JSON feed endpoint.

mod client;
mod types;


pub use client::HttpFeedClient;
pub use types::{LoadMoreRequest, RefreshRequest, UploadActionsRequest, UploadActionsResponse};

use async_trait::async_trait;

use crate::error::RequestResult;
use crate::model::{ConsistencyToken, Model, RequestReason, StreamToken, StreamUploadableAction};

/// Issues feed content requests.
#[async_trait]
pub trait FeedRequestManager: Send + Sync {
    /// Fetch a fresh head.
    async fn trigger_refresh(
        &self,
        reason: RequestReason,
        token: &ConsistencyToken,
    ) -> RequestResult<Model>;

    /// Fetch the page following `stream_token`.
    async fn load_more(
        &self,
        stream_token: &StreamToken,
        token: &ConsistencyToken,
    ) -> RequestResult<Model>;
}

/// Uploads pending client actions.
#[async_trait]
pub trait ActionUploadRequestManager: Send + Sync {
    /// Upload `actions` and return the server's new consistency token.
    ///
    /// With no actions the current token is returned unchanged.
    async fn upload_actions(
        &self,
        actions: Vec<StreamUploadableAction>,
        token: ConsistencyToken,
    ) -> RequestResult<ConsistencyToken>;
}
