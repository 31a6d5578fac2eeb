//! CLI commands for inspecting and refreshing the local feed.
//!
//! Each command drives a [`FeedSessionManager`] the same way a host UI
//! would and renders the result as text.

use std::time::Duration;

use clap::Subcommand;

use crate::manager::FeedSessionManager;
use crate::model::{RequestReason, StreamPayload};

/// Feed CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum FeedCommands {
    /// Fetch fresh content from the feed server into head
    Refresh {
        /// Wait at most this long for the response
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,
    },

    /// Show head's live content
    Show {
        /// Maximum number of items to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List attached sessions
    Sessions,

    /// Print stored payloads as JSON
    Content {
        /// Content ids to look up
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete all local content
    Clear,
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a feed CLI command.
pub async fn execute_command(command: FeedCommands, manager: &FeedSessionManager) -> CliResult {
    manager.initialize();
    manager.wait_idle().await;

    match command {
        FeedCommands::Refresh { timeout_ms } => execute_refresh(manager, timeout_ms).await,
        FeedCommands::Show { limit } => execute_show(manager, limit),
        FeedCommands::Sessions => execute_sessions(manager),
        FeedCommands::Content { ids } => execute_content(manager, ids).await,
        FeedCommands::Clear => execute_clear(manager).await,
    }
}

/// Wait until every outstanding request has been committed.
pub async fn wait_for_mutations(manager: &FeedSessionManager, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            if manager.pending_mutations() == 0 {
                manager.wait_idle().await;
                if manager.pending_mutations() == 0 {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

async fn execute_refresh(manager: &FeedSessionManager, timeout_ms: u64) -> CliResult {
    let before = manager.head_structures().len();
    manager.trigger_refresh(None, RequestReason::HostRequested, None);
    // Let the refresh task register its request before waiting on it.
    manager.wait_idle().await;

    if !wait_for_mutations(manager, Duration::from_millis(timeout_ms)).await {
        return CliResult::error(format!("Refresh did not complete within {}ms", timeout_ms));
    }

    let after = manager.head_structures().len();
    if after == 0 {
        return CliResult::error("Refresh returned no content");
    }
    CliResult::success(format!(
        "Head refreshed: {} items (was {})",
        after, before
    ))
}

fn execute_show(manager: &FeedSessionManager, limit: usize) -> CliResult {
    let structures = manager.head_structures();
    if structures.is_empty() {
        return CliResult::success("Head is empty");
    }

    let mut output = format!("Head: {} items\n", structures.len());
    for structure in structures.iter().take(limit) {
        match &structure.parent_content_id {
            Some(parent) => {
                output.push_str(&format!("  {} (parent: {})\n", structure.content_id, parent))
            }
            None => output.push_str(&format!("  {}\n", structure.content_id)),
        }
    }
    if structures.len() > limit {
        output.push_str(&format!("  ... {} more\n", structures.len() - limit));
    }
    CliResult::success(output)
}

fn execute_sessions(manager: &FeedSessionManager) -> CliResult {
    let sessions = manager.attached_sessions();
    if sessions.is_empty() {
        return CliResult::success("No attached sessions");
    }

    let mut output = format!("Attached sessions: {}\n", sessions.len());
    for session in sessions {
        let Some(metadata) = session.metadata() else {
            continue;
        };
        let created = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(metadata.created_at_ms)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        output.push_str(&format!(
            "  {} created {} items {}\n",
            metadata.session_id,
            created,
            session.structures().len()
        ));
    }
    CliResult::success(output)
}

async fn execute_content(manager: &FeedSessionManager, ids: Vec<String>) -> CliResult {
    let requested = ids.len();
    let payloads = match manager.get_content(ids).await {
        Ok(payloads) => payloads,
        Err(e) => return CliResult::error(format!("Failed to read content: {}", e)),
    };

    let mut output = format!("Found {} of {} items\n", payloads.len(), requested);
    for p in payloads {
        let kind = match &p.payload {
            StreamPayload::Feature(_) => "feature",
            StreamPayload::Token(_) => "token",
            StreamPayload::SharedState(_) => "shared_state",
        };
        let body = serde_json::to_string_pretty(&p.payload)
            .unwrap_or_else(|e| format!("<unserializable: {}>", e));
        output.push_str(&format!("{} [{}]\n{}\n", p.content_id, kind, body));
    }
    CliResult::success(output)
}

async fn execute_clear(manager: &FeedSessionManager) -> CliResult {
    manager.on_lifecycle_event(crate::manager::LifecycleEvent::ClearAll);
    manager.wait_idle().await;
    CliResult::success("Cleared all local content")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::config::{SchedulerConfig, SessionConfig};
    use crate::error::RequestResult;
    use crate::model::{
        ConsistencyToken, Model, StreamDataOperation, StreamFeature, StreamStructure,
        StreamToken, StreamUploadableAction,
    };
    use crate::request::{ActionUploadRequestManager, FeedRequestManager};
    use crate::scheduler::TimeBasedScheduler;
    use crate::store::MemoryStore;

    /// Serves the same page of features for every refresh.
    struct StaticFeed {
        ids: Vec<&'static str>,
    }

    #[async_trait]
    impl FeedRequestManager for StaticFeed {
        async fn trigger_refresh(
            &self,
            _reason: RequestReason,
            _token: &ConsistencyToken,
        ) -> RequestResult<Model> {
            let operations = self
                .ids
                .iter()
                .map(|id| {
                    StreamDataOperation::new(
                        StreamStructure::update_or_append(*id, None),
                        Some(StreamPayload::Feature(StreamFeature {
                            content_id: id.to_string(),
                            parent_id: None,
                            content: serde_json::json!({ "title": id }),
                        })),
                    )
                })
                .collect();
            Ok(Model::new(operations))
        }

        async fn load_more(
            &self,
            _stream_token: &StreamToken,
            _token: &ConsistencyToken,
        ) -> RequestResult<Model> {
            Ok(Model::default())
        }
    }

    struct NoUploads;

    #[async_trait]
    impl ActionUploadRequestManager for NoUploads {
        async fn upload_actions(
            &self,
            _actions: Vec<StreamUploadableAction>,
            token: ConsistencyToken,
        ) -> RequestResult<ConsistencyToken> {
            Ok(token)
        }
    }

    fn manager_with(ids: Vec<&'static str>) -> FeedSessionManager {
        FeedSessionManager::new(
            SessionConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(TimeBasedScheduler::new(&SchedulerConfig::default())),
            Arc::new(StaticFeed { ids }),
            Arc::new(NoUploads),
        )
    }

    async fn refreshed(ids: Vec<&'static str>) -> FeedSessionManager {
        let manager = manager_with(ids);
        let result = execute_command(FeedCommands::Refresh { timeout_ms: 5000 }, &manager).await;
        assert_eq!(result.exit_code, 0, "{}", result.message);
        manager
    }

    #[tokio::test]
    async fn test_refresh_reports_head_size() {
        let manager = manager_with(vec!["card-1", "card-2"]);
        let result = execute_command(FeedCommands::Refresh { timeout_ms: 5000 }, &manager).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.message, "Head refreshed: 2 items (was 0)");
    }

    #[tokio::test]
    async fn test_refresh_without_content_fails() {
        let manager = manager_with(Vec::new());
        let result = execute_command(FeedCommands::Refresh { timeout_ms: 5000 }, &manager).await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.message, "Refresh returned no content");
    }

    #[tokio::test]
    async fn test_show_truncates_to_limit() {
        let manager = refreshed(vec!["card-1", "card-2", "card-3"]).await;

        let result = execute_command(FeedCommands::Show { limit: 2 }, &manager).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.message.starts_with("Head: 3 items\n"));
        assert!(result.message.contains("  card-1\n"));
        assert!(result.message.contains("  card-2\n"));
        assert!(!result.message.contains("card-3"));
        assert!(result.message.contains("... 1 more"));
    }

    #[tokio::test]
    async fn test_show_and_sessions_on_empty_manager() {
        let manager = manager_with(Vec::new());

        let show = execute_command(FeedCommands::Show { limit: 5 }, &manager).await;
        assert_eq!(show.message, "Head is empty");

        let sessions = execute_command(FeedCommands::Sessions, &manager).await;
        assert_eq!(sessions.exit_code, 0);
        assert_eq!(sessions.message, "No attached sessions");
    }

    #[tokio::test]
    async fn test_content_found() {
        let manager = refreshed(vec!["card-1", "card-2"]).await;

        let result = execute_command(
            FeedCommands::Content {
                ids: vec!["card-2".to_string(), "card-1".to_string()],
            },
            &manager,
        )
        .await;

        assert_eq!(result.exit_code, 0);
        assert!(result.message.starts_with("Found 2 of 2 items\n"));
        assert!(result.message.contains("card-2 [feature]"));
    }

    #[tokio::test]
    async fn test_content_missing_from_store_is_an_error() {
        let manager = refreshed(vec!["card-1"]).await;

        let result = execute_command(
            FeedCommands::Content {
                ids: vec!["card-1".to_string(), "absent".to_string()],
            },
            &manager,
        )
        .await;

        assert_eq!(result.exit_code, 1);
        assert!(result.message.starts_with("Failed to read content"));
    }

    #[tokio::test]
    async fn test_clear_empties_head() {
        let manager = refreshed(vec!["card-1"]).await;

        let result = execute_command(FeedCommands::Clear, &manager).await;
        assert_eq!(result.exit_code, 0);
        assert!(manager.head_structures().is_empty());
    }

    #[test]
    fn test_cli_result() {
        let ok = CliResult::success("done");
        assert_eq!(ok.exit_code, 0);
        assert_eq!(ok.message, "done");

        let err = CliResult::error("failed");
        assert_eq!(err.exit_code, 1);
    }
}
