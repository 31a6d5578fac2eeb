use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Listeners, MemoryStore, Store, StoreListener};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    ConsistencyToken, Operation, PayloadWithId, SessionMetadata, StreamPayload,
    StreamSharedState, StreamStructure, StreamUploadableAction, HEAD_SESSION_ID,
};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const CONSISTENCY_TOKEN_KEY: &str = "consistency_token";

#[derive(sqlx::FromRow)]
struct StructureRow {
    operation: String,
    content_id: String,
    parent_content_id: Option<String>,
}

impl TryFrom<StructureRow> for StreamStructure {
    type Error = StoreError;

    fn try_from(row: StructureRow) -> Result<Self, Self::Error> {
        let operation = Operation::from_str(&row.operation)
            .map_err(|message| StoreError::Query { message })?;
        Ok(StreamStructure {
            operation,
            content_id: row.content_id,
            parent_content_id: row.parent_content_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    session_id: String,
    created_at_ms: i64,
    last_accessed_ms: i64,
    schema_version: i64,
}

impl From<MetadataRow> for SessionMetadata {
    fn from(row: MetadataRow) -> Self {
        SessionMetadata {
            session_id: row.session_id,
            created_at_ms: row.created_at_ms,
            last_accessed_ms: row.last_accessed_ms,
            schema_version: row.schema_version as u32,
        }
    }
}

/// SQLite-backed store.
///
/// After `switch_to_ephemeral_mode` the tables are wiped and every call is
/// served by an embedded [`MemoryStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    ephemeral: AtomicBool,
    memory: MemoryStore,
    listeners: Listeners,
}

impl SqliteStore {
    /// Create a new SQLite store
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        Self::with_pool(pool).await
    }

    /// Create a store over a private in-memory database.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;
        // One connection: every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self {
            pool,
            ephemeral: AtomicBool::new(false),
            memory: MemoryStore::new(),
            listeners: Listeners::default(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StoreError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn wipe_tables(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "content",
            "session_structures",
            "session_metadata",
            "uploadable_actions",
            "properties",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn decode_payload(content_id: String, raw: &str) -> StoreResult<PayloadWithId> {
    Ok(PayloadWithId {
        content_id,
        payload: serde_json::from_str(raw)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_shared_states(&self) -> StoreResult<Vec<StreamSharedState>> {
        if self.is_ephemeral_mode() {
            return self.memory.get_shared_states().await;
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT content_id, payload
            FROM content
            WHERE json_extract(payload, '$.type') = 'shared_state'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut states = Vec::with_capacity(rows.len());
        for (content_id, raw) in rows {
            if let StreamPayload::SharedState(state) = decode_payload(content_id, &raw)?.payload {
                states.push(state);
            }
        }
        Ok(states)
    }

    async fn get_payloads(&self, content_ids: &[String]) -> StoreResult<Vec<PayloadWithId>> {
        if self.is_ephemeral_mode() {
            return self.memory.get_payloads(content_ids).await;
        }
        if content_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT content_id, payload FROM content WHERE content_id IN (");
        let mut separated = builder.separated(", ");
        for id in content_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, String)> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|(content_id, raw)| decode_payload(content_id, &raw))
            .collect()
    }

    async fn commit_content(&self, payloads: &[PayloadWithId]) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.commit_content(payloads).await;
        }

        let mut tx = self.pool.begin().await?;
        for p in payloads {
            let raw = serde_json::to_string(&p.payload)?;
            sqlx::query(
                r#"
                INSERT INTO content (content_id, payload)
                VALUES (?, ?)
                ON CONFLICT(content_id) DO UPDATE SET payload = excluded.payload
                "#,
            )
            .bind(&p.content_id)
            .bind(&raw)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_new_session(&self) -> StoreResult<String> {
        if self.is_ephemeral_mode() {
            return self.memory.create_new_session().await;
        }

        let session_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO session_structures (session_id, operation, content_id, parent_content_id)
            SELECT ?, operation, content_id, parent_content_id
            FROM session_structures
            WHERE session_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(&session_id)
        .bind(HEAD_SESSION_ID)
        .execute(&self.pool)
        .await?;

        Ok(session_id)
    }

    async fn get_stream_structures(&self, session_id: &str) -> StoreResult<Vec<StreamStructure>> {
        if self.is_ephemeral_mode() {
            return self.memory.get_stream_structures(session_id).await;
        }

        let rows: Vec<StructureRow> = sqlx::query_as(
            r#"
            SELECT operation, content_id, parent_content_id
            FROM session_structures
            WHERE session_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StreamStructure::try_from).collect()
    }

    async fn commit_session(
        &self,
        session_id: &str,
        structures: &[StreamStructure],
    ) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.commit_session(session_id, structures).await;
        }

        let mut tx = self.pool.begin().await?;
        for s in structures {
            sqlx::query(
                r#"
                INSERT INTO session_structures (session_id, operation, content_id, parent_content_id)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(s.operation.to_string())
            .bind(&s.content_id)
            .bind(&s.parent_content_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear_head(&self) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.clear_head().await;
        }

        sqlx::query("DELETE FROM session_structures WHERE session_id = ?")
            .bind(HEAD_SESSION_ID)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_session(&self, session_id: &str) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.remove_session(session_id).await;
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM session_structures WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM session_metadata WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_session_metadata(&self) -> StoreResult<Vec<SessionMetadata>> {
        if self.is_ephemeral_mode() {
            return self.memory.get_session_metadata().await;
        }

        let rows: Vec<MetadataRow> = sqlx::query_as(
            r#"
            SELECT session_id, created_at_ms, last_accessed_ms, schema_version
            FROM session_metadata
            ORDER BY created_at_ms ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SessionMetadata::from).collect())
    }

    async fn set_session_metadata(&self, sessions: &[SessionMetadata]) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.set_session_metadata(sessions).await;
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM session_metadata")
            .execute(&mut *tx)
            .await?;
        for m in sessions {
            sqlx::query(
                r#"
                INSERT INTO session_metadata (session_id, created_at_ms, last_accessed_ms, schema_version)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&m.session_id)
            .bind(m.created_at_ms)
            .bind(m.last_accessed_ms)
            .bind(m.schema_version as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_all_uploadable_actions(&self) -> StoreResult<Vec<StreamUploadableAction>> {
        if self.is_ephemeral_mode() {
            return self.memory.get_all_uploadable_actions().await;
        }

        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT feature_content_id, action_type, timestamp_ms
            FROM uploadable_actions
            ORDER BY timestamp_ms ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(feature_content_id, action_type, timestamp_ms)| StreamUploadableAction {
                    feature_content_id,
                    action_type,
                    timestamp_ms,
                },
            )
            .collect())
    }

    async fn add_uploadable_actions(&self, actions: &[StreamUploadableAction]) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.add_uploadable_actions(actions).await;
        }

        let mut tx = self.pool.begin().await?;
        for a in actions {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO uploadable_actions (feature_content_id, action_type, timestamp_ms)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&a.feature_content_id)
            .bind(&a.action_type)
            .bind(a.timestamp_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_uploadable_actions(
        &self,
        actions: &[StreamUploadableAction],
    ) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.remove_uploadable_actions(actions).await;
        }

        let mut tx = self.pool.begin().await?;
        for a in actions {
            sqlx::query(
                r#"
                DELETE FROM uploadable_actions
                WHERE feature_content_id = ? AND action_type = ? AND timestamp_ms = ?
                "#,
            )
            .bind(&a.feature_content_id)
            .bind(&a.action_type)
            .bind(a.timestamp_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_consistency_token(&self) -> StoreResult<Option<ConsistencyToken>> {
        if self.is_ephemeral_mode() {
            return self.memory.get_consistency_token().await;
        }

        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM properties WHERE key = ?")
            .bind(CONSISTENCY_TOKEN_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| ConsistencyToken(value)))
    }

    async fn set_consistency_token(&self, token: &ConsistencyToken) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.set_consistency_token(token).await;
        }

        sqlx::query(
            r#"
            INSERT INTO properties (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CONSISTENCY_TOKEN_KEY)
        .bind(&token.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        if self.is_ephemeral_mode() {
            return self.memory.clear_all().await;
        }
        self.wipe_tables().await
    }

    async fn switch_to_ephemeral_mode(&self) {
        if self.ephemeral.swap(true, Ordering::SeqCst) {
            warn!("Store already in ephemeral mode");
            return;
        }
        self.memory.wipe();
        if let Err(e) = self.wipe_tables().await {
            error!(error = %e, "Failed to clear persistent tables on ephemeral switch");
        }
        self.listeners.notify_ephemeral();
    }

    fn is_ephemeral_mode(&self) -> bool {
        self.ephemeral.load(Ordering::SeqCst)
    }

    fn register_observer(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.register(listener);
    }
}
