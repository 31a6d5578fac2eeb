//! Integration tests for the SQLite store
//!
//! Most tests use an in-memory SQLite database; persistence across
//! reopen uses a temporary file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;

use feed_session_manager::config::{DatabaseConfig, StoreKind};
use feed_session_manager::model::{
    ConsistencyToken, PayloadWithId, SessionMetadata, SharedStateItem, StreamFeature,
    StreamPayload, StreamSharedState, StreamStructure, StreamToken, StreamUploadableAction,
    HEAD_SESSION_ID,
};
use feed_session_manager::store::{compact_structures, SqliteStore, Store, StoreListener};

/// Create an in-memory store instance for testing
async fn create_test_store() -> SqliteStore {
    SqliteStore::new_in_memory()
        .await
        .expect("Failed to create in-memory store")
}

fn feature(id: &str) -> PayloadWithId {
    PayloadWithId {
        content_id: id.to_string(),
        payload: StreamPayload::Feature(StreamFeature {
            content_id: id.to_string(),
            parent_id: None,
            content: json!({ "title": id }),
        }),
    }
}

fn action(id: &str, timestamp_ms: i64) -> StreamUploadableAction {
    StreamUploadableAction {
        feature_content_id: id.to_string(),
        action_type: "view".to_string(),
        timestamp_ms,
    }
}

fn ids(structures: &[StreamStructure]) -> Vec<String> {
    structures.iter().map(|s| s.content_id.clone()).collect()
}

#[cfg(test)]
mod content_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_commit_and_get_payloads() {
        let store = create_test_store().await;
        store
            .commit_content(&[feature("a"), feature("b")])
            .await
            .unwrap();

        let found = store
            .get_payloads(&["b".to_string(), "missing".to_string(), "a".to_string()])
            .await
            .unwrap();

        let mut found_ids: Vec<_> = found.iter().map(|p| p.content_id.clone()).collect();
        found_ids.sort();
        assert_eq!(found_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_commit_content_replaces_existing() {
        let store = create_test_store().await;
        store.commit_content(&[feature("a")]).await.unwrap();

        let updated = PayloadWithId {
            content_id: "a".to_string(),
            payload: StreamPayload::Token(StreamToken {
                content_id: "a".to_string(),
                parent_id: None,
                next_page_token: "next".to_string(),
            }),
        };
        store.commit_content(&[updated.clone()]).await.unwrap();

        let found = store.get_payloads(&["a".to_string()]).await.unwrap();
        assert_eq!(found, vec![updated]);
    }

    #[tokio::test]
    async fn test_get_shared_states_filters_by_type() {
        let store = create_test_store().await;
        let shared = PayloadWithId {
            content_id: "ss".to_string(),
            payload: StreamPayload::SharedState(StreamSharedState::new(
                "ss",
                SharedStateItem::default(),
            )),
        };
        store
            .commit_content(&[feature("a"), shared])
            .await
            .unwrap();

        let states = store.get_shared_states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].content_id, "ss");
    }

    #[tokio::test]
    async fn test_empty_lookup() {
        let store = create_test_store().await;
        assert!(store.get_payloads(&[]).await.unwrap().is_empty());
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_new_session_copies_head_journal() {
        let store = create_test_store().await;
        store
            .commit_session(
                HEAD_SESSION_ID,
                &[
                    StreamStructure::update_or_append("a", None),
                    StreamStructure::update_or_append("b", None),
                    StreamStructure::remove("a"),
                ],
            )
            .await
            .unwrap();

        let session_id = store.create_new_session().await.unwrap();
        assert_ne!(session_id, HEAD_SESSION_ID);

        let journal = store.get_stream_structures(&session_id).await.unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(ids(&compact_structures(&journal)), vec!["b".to_string()]);

        // Later head commits do not leak into the copy.
        store
            .commit_session(HEAD_SESSION_ID, &[StreamStructure::update_or_append("c", None)])
            .await
            .unwrap();
        assert_eq!(store.get_stream_structures(&session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_journal_preserves_commit_order() {
        let store = create_test_store().await;
        for id in ["x", "y", "z"] {
            store
                .commit_session("s1", &[StreamStructure::update_or_append(id, Some("root"))])
                .await
                .unwrap();
        }

        let journal = store.get_stream_structures("s1").await.unwrap();
        assert_eq!(ids(&journal), vec!["x", "y", "z"]);
        assert_eq!(journal[0].parent_content_id.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_clear_head_keeps_other_sessions() {
        let store = create_test_store().await;
        let structures = [StreamStructure::update_or_append("a", None)];
        store.commit_session(HEAD_SESSION_ID, &structures).await.unwrap();
        store.commit_session("s1", &structures).await.unwrap();

        store.clear_head().await.unwrap();

        assert!(store
            .get_stream_structures(HEAD_SESSION_ID)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.get_stream_structures("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_metadata_replace_and_remove() {
        let store = create_test_store().await;
        let now = Utc::now().timestamp_millis();
        let metadata = |id: &str| SessionMetadata {
            session_id: id.to_string(),
            created_at_ms: now,
            last_accessed_ms: now,
            schema_version: 1,
        };

        store
            .set_session_metadata(&[metadata("s1"), metadata("s2")])
            .await
            .unwrap();
        store
            .commit_session("s1", &[StreamStructure::update_or_append("a", None)])
            .await
            .unwrap();
        assert_eq!(store.get_session_metadata().await.unwrap().len(), 2);

        store.remove_session("s1").await.unwrap();
        let remaining = store.get_session_metadata().await.unwrap();
        assert_eq!(remaining, vec![metadata("s2")]);
        assert!(store.get_stream_structures("s1").await.unwrap().is_empty());

        store.set_session_metadata(&[]).await.unwrap();
        assert!(store.get_session_metadata().await.unwrap().is_empty());
    }
}

#[cfg(test)]
mod action_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_uploadable_actions_round_trip() {
        let store = create_test_store().await;
        store
            .add_uploadable_actions(&[action("a", 1), action("b", 2)])
            .await
            .unwrap();

        let actions = store.get_all_uploadable_actions().await.unwrap();
        assert_eq!(actions.len(), 2);

        store.remove_uploadable_actions(&[action("a", 1)]).await.unwrap();
        assert_eq!(
            store.get_all_uploadable_actions().await.unwrap(),
            vec![action("b", 2)]
        );
    }

    #[tokio::test]
    async fn test_consistency_token() {
        let store = create_test_store().await;
        assert!(store.get_consistency_token().await.unwrap().is_none());

        store
            .set_consistency_token(&ConsistencyToken("t1".to_string()))
            .await
            .unwrap();
        store
            .set_consistency_token(&ConsistencyToken("t2".to_string()))
            .await
            .unwrap();

        assert_eq!(
            store.get_consistency_token().await.unwrap(),
            Some(ConsistencyToken("t2".to_string()))
        );
    }

    #[tokio::test]
    async fn test_clear_all() {
        let store = create_test_store().await;
        store.commit_content(&[feature("a")]).await.unwrap();
        store
            .commit_session(HEAD_SESSION_ID, &[StreamStructure::update_or_append("a", None)])
            .await
            .unwrap();
        store.add_uploadable_actions(&[action("a", 1)]).await.unwrap();
        store
            .set_consistency_token(&ConsistencyToken("t".to_string()))
            .await
            .unwrap();

        store.clear_all().await.unwrap();

        assert!(store.get_payloads(&["a".to_string()]).await.unwrap().is_empty());
        assert!(store
            .get_stream_structures(HEAD_SESSION_ID)
            .await
            .unwrap()
            .is_empty());
        assert!(store.get_all_uploadable_actions().await.unwrap().is_empty());
        assert!(store.get_consistency_token().await.unwrap().is_none());
    }
}

#[cfg(test)]
mod ephemeral_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct CountingListener(AtomicUsize);

    impl StoreListener for CountingListener {
        fn on_switch_to_ephemeral_mode(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_switch_notifies_once_and_wipes() {
        let store = create_test_store().await;
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        store.register_observer(listener.clone());
        store.commit_content(&[feature("a")]).await.unwrap();

        store.switch_to_ephemeral_mode().await;
        store.switch_to_ephemeral_mode().await;

        assert!(store.is_ephemeral_mode());
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert!(store.get_payloads(&["a".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ephemeral_store_keeps_working_in_memory() {
        let store = create_test_store().await;
        store.switch_to_ephemeral_mode().await;

        store.commit_content(&[feature("b")]).await.unwrap();
        store
            .commit_session(HEAD_SESSION_ID, &[StreamStructure::update_or_append("b", None)])
            .await
            .unwrap();
        let session_id = store.create_new_session().await.unwrap();

        assert_eq!(store.get_payloads(&["b".to_string()]).await.unwrap().len(), 1);
        assert_eq!(
            ids(&store.get_stream_structures(&session_id).await.unwrap()),
            vec!["b".to_string()]
        );

        // Nothing reached the database.
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            kind: StoreKind::Sqlite,
            path: dir.path().join("nested").join("feed.db"),
            max_connections: 2,
        };

        {
            let store = SqliteStore::new(&config).await.unwrap();
            store.commit_content(&[feature("a")]).await.unwrap();
            store
                .commit_session(HEAD_SESSION_ID, &[StreamStructure::update_or_append("a", None)])
                .await
                .unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::new(&config).await.unwrap();
        assert_eq!(store.get_payloads(&["a".to_string()]).await.unwrap().len(), 1);
        assert_eq!(
            ids(&store.get_stream_structures(HEAD_SESSION_ID).await.unwrap()),
            vec!["a".to_string()]
        );
    }
}
