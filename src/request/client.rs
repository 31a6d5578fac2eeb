use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{LoadMoreRequest, RefreshRequest, UploadActionsRequest, UploadActionsResponse};
use super::{ActionUploadRequestManager, FeedRequestManager};
use crate::config::RequestConfig;
use crate::error::{RequestError, RequestResult};
use crate::model::{ConsistencyToken, Model, RequestReason, StreamToken, StreamUploadableAction};

/// JSON/HTTP client for the feed endpoint
#[derive(Clone)]
pub struct HttpFeedClient {
    client: Client,
    base_url: String,
    request_config: RequestConfig,
}

impl HttpFeedClient {
    /// Create a new feed client
    pub fn new(request_config: RequestConfig) -> RequestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(RequestError::Http)?;

        Ok(Self {
            client,
            base_url: request_config.base_url.trim_end_matches('/').to_string(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `path`, retrying with exponential backoff.
    async fn post_with_retry<B, R>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> RequestResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = backoff_delay(self.request_config.retry_delay_ms, retries);
                warn!(
                    operation,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying feed request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, body).await {
                Ok(response) => {
                    info!(
                        operation,
                        latency_ms = start.elapsed().as_millis(),
                        "Feed request succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        operation,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Feed request failed"
                    );
                    // Client errors will not succeed on retry.
                    if matches!(&e, RequestError::Api { status, .. } if (400..500).contains(status))
                    {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(RequestError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request<B, R>(&self, url: &str, body: &B) -> RequestResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(url, "Sending feed request");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RequestError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    RequestError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(RequestError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| RequestError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

#[async_trait]
impl FeedRequestManager for HttpFeedClient {
    async fn trigger_refresh(
        &self,
        reason: RequestReason,
        token: &ConsistencyToken,
    ) -> RequestResult<Model> {
        let body = RefreshRequest::new(reason, token);
        let model: Model = self
            .post_with_retry("trigger_refresh", "/v1/feed/refresh", &body)
            .await?;
        debug!(
            reason = %reason,
            operations = model.operations.len(),
            "Refresh response received"
        );
        Ok(model)
    }

    async fn load_more(
        &self,
        stream_token: &StreamToken,
        token: &ConsistencyToken,
    ) -> RequestResult<Model> {
        let body = LoadMoreRequest::new(stream_token, token);
        self.post_with_retry("load_more", "/v1/feed/load_more", &body)
            .await
    }
}

#[async_trait]
impl ActionUploadRequestManager for HttpFeedClient {
    async fn upload_actions(
        &self,
        actions: Vec<StreamUploadableAction>,
        token: ConsistencyToken,
    ) -> RequestResult<ConsistencyToken> {
        if actions.is_empty() {
            return Ok(token);
        }

        let count = actions.len();
        let body = UploadActionsRequest::new(actions, &token);
        let response: UploadActionsResponse = self
            .post_with_retry("upload_actions", "/v1/actions/upload", &body)
            .await?;
        info!(actions = count, "Uploaded actions");
        Ok(response.into())
    }
}

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `retry` (1-based), doubling from `base_ms`.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(1000, 64), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u64::MAX, 2), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(0, 200), Duration::ZERO);
    }

    fn config(base_url: &str) -> RequestConfig {
        RequestConfig {
            base_url: base_url.to_string(),
            timeout_ms: 1000,
            max_retries: 0,
            retry_delay_ms: 1,
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpFeedClient::new(config("http://localhost:8080/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_upload_without_actions_skips_network() {
        // Nothing listens on this port; an attempted request would fail.
        let client = HttpFeedClient::new(config("http://127.0.0.1:9")).unwrap();
        let token = ConsistencyToken("ct".to_string());
        let result = client.upload_actions(Vec::new(), token.clone()).await;
        assert_eq!(result.unwrap(), token);
    }
}
