//! End-to-end tests for the feed session manager
//!
//! Drives the public API over an in-memory SQLite store and a wiremock
//! feed server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use feed_session_manager::cli::wait_for_mutations;
use feed_session_manager::config::{RequestConfig, SchedulerConfig, SessionConfig};
use feed_session_manager::model::{
    ModelError, ModelMutation, ModelProvider, StreamPayload, UiContext,
};
use feed_session_manager::request::HttpFeedClient;
use feed_session_manager::scheduler::TimeBasedScheduler;
use feed_session_manager::store::{SqliteStore, Store};
use feed_session_manager::{FeedSessionManager, LifecycleEvent, ManagerState};

#[derive(Default)]
struct TestProvider {
    applied: Mutex<Vec<ModelMutation>>,
    invalidated: Mutex<Vec<UiContext>>,
    errors: Mutex<Vec<ModelError>>,
}

impl ModelProvider for TestProvider {
    fn session_id(&self) -> Option<String> {
        self.applied
            .lock()
            .unwrap()
            .last()
            .and_then(|m| m.session_id.clone())
    }

    fn invalidate(&self, ui_context: &UiContext) {
        self.invalidated.lock().unwrap().push(ui_context.clone());
    }

    fn raise_error(&self, error: ModelError) {
        self.errors.lock().unwrap().push(error);
    }

    fn apply(&self, mutation: ModelMutation) {
        self.applied.lock().unwrap().push(mutation);
    }
}

fn feed_body() -> serde_json::Value {
    json!({
        "operations": [
            { "structure": { "operation": "clear_all", "content_id": "" } },
            {
                "structure": { "operation": "update_or_append", "content_id": "card-1" },
                "payload": { "type": "feature", "content_id": "card-1", "content": { "n": 1 } }
            },
            {
                "structure": { "operation": "update_or_append", "content_id": "card-2" },
                "payload": { "type": "feature", "content_id": "card-2", "content": { "n": 2 } }
            }
        ]
    })
}

fn create_manager(store: Arc<SqliteStore>, base_url: &str) -> FeedSessionManager {
    let client = Arc::new(
        HttpFeedClient::new(RequestConfig {
            base_url: base_url.to_string(),
            timeout_ms: 5000,
            max_retries: 0,
            retry_delay_ms: 10,
        })
        .expect("Failed to create client"),
    );
    let scheduler = Arc::new(TimeBasedScheduler::new(&SchedulerConfig::default()));
    FeedSessionManager::new(
        SessionConfig::default(),
        store,
        scheduler,
        client.clone(),
        client,
    )
}

async fn settle(manager: &FeedSessionManager) {
    assert!(
        wait_for_mutations(manager, Duration::from_secs(5)).await,
        "manager did not settle"
    );
}

#[tokio::test]
async fn test_first_session_waits_for_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/feed/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let manager = create_manager(store.clone(), &server.uri());
    let provider = Arc::new(TestProvider::default());

    let session = manager.get_new_session(provider.clone(), None, None);
    settle(&manager).await;

    assert_eq!(manager.state(), ManagerState::Ready);
    let session_id = session.session_id().expect("session populated");
    let applied = provider.applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 1);
    let ids: Vec<_> = applied[0]
        .structures
        .iter()
        .map(|s| s.content_id.clone())
        .collect();
    assert_eq!(ids, vec!["card-1".to_string(), "card-2".to_string()]);

    let metadata = store.get_session_metadata().await.unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].session_id, session_id);

    let content = manager
        .get_content(vec!["card-2".to_string(), "card-1".to_string()])
        .await
        .unwrap();
    assert_eq!(content.len(), 2);
    assert_eq!(content[0].content_id, "card-2");
    assert!(matches!(content[0].payload, StreamPayload::Feature(_)));
}

#[tokio::test]
async fn test_session_restored_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/feed/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let session_id = {
        let manager = create_manager(store.clone(), &server.uri());
        let provider = Arc::new(TestProvider::default());
        let session = manager.get_new_session(provider.clone(), None, None);
        settle(&manager).await;
        session.session_id().unwrap()
    };

    let manager = create_manager(store.clone(), &server.uri());
    let provider = Arc::new(TestProvider::default());
    manager.get_existing_session(&session_id, provider.clone(), UiContext::new("resume"));
    manager.wait_idle().await;

    let applied = provider.applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].session_id.as_deref(), Some(session_id.as_str()));
    assert_eq!(applied[0].structures.len(), 2);
    assert!(provider.invalidated.lock().unwrap().is_empty());
    assert_eq!(manager.head_structures().len(), 2);
}

#[tokio::test]
async fn test_failed_first_refresh_reports_no_cards() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/feed/refresh"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let manager = create_manager(store, &server.uri());
    let provider = Arc::new(TestProvider::default());

    let session = manager.get_new_session(provider.clone(), None, None);
    settle(&manager).await;

    assert!(session.session_id().is_none());
    assert!(session.is_empty());
    assert!(provider.applied.lock().unwrap().is_empty());
    assert_eq!(
        *provider.errors.lock().unwrap(),
        vec![ModelError::no_cards()]
    );
    assert!(manager.attached_sessions().is_empty());
}

#[tokio::test]
async fn test_clear_all_drops_local_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/feed/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let manager = create_manager(store.clone(), &server.uri());
    let provider = Arc::new(TestProvider::default());
    manager.get_new_session(provider.clone(), None, None);
    settle(&manager).await;
    assert_eq!(manager.attached_sessions().len(), 1);

    manager.on_lifecycle_event(LifecycleEvent::ClearAll);
    manager.wait_idle().await;

    assert!(manager.attached_sessions().is_empty());
    assert!(manager.head_structures().is_empty());
    assert!(store.get_session_metadata().await.unwrap().is_empty());
    assert!(store
        .get_payloads(&["card-1".to_string()])
        .await
        .unwrap()
        .is_empty());
}
