//! # Feed Session Manager
//!
//! Session-oriented content cache and mutation coordinator for a
//! paginated content feed. The UI asks for sessions; the manager decides
//! whether to hit the network, populates sessions from a local store and
//! fans server responses out to every session that holds the content.
//!
//! ## Features
//!
//! - **Session population**: new sessions are copied from head and
//!   populated before, after or instead of a refresh depending on the
//!   scheduler's decision
//! - **Task queue**: a single worker serializes store and network work,
//!   holding user-facing tasks while a refresh is in flight
//! - **Cancellable mutations**: request results are committed through
//!   trackers that a clear-all can invalidate
//! - **Shared-state interning**: identical rendering state is held once
//! - **Ephemeral fallback**: store failures switch persistence off and
//!   reset the manager
//!
//! ## Architecture
//!
//! ```text
//! UI (ModelProvider) → FeedSessionManager → TaskQueue
//!                            ↓          ↘
//!                    Store (SQLite)   Feed server (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use feed_session_manager::{Config, FeedSessionManager};
//! use feed_session_manager::request::HttpFeedClient;
//! use feed_session_manager::scheduler::TimeBasedScheduler;
//! use feed_session_manager::store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::new(&config.database).await?);
//!     let client = Arc::new(HttpFeedClient::new(config.request.clone())?);
//!     let scheduler = Arc::new(TimeBasedScheduler::new(&config.scheduler));
//!     let manager = FeedSessionManager::new(
//!         config.session.clone(),
//!         store,
//!         scheduler,
//!         client.clone(),
//!         client,
//!     );
//!     manager.initialize();
//!     Ok(())
//! }
//! ```

/// Shared-state interning and the content cache.
pub mod cache;
/// CLI subcommands.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// The session manager and its mutation trackers.
pub mod manager;
/// Feed content model and UI-facing provider traits.
pub mod model;
/// Feed server request managers and the HTTP client.
pub mod request;
/// Request scheduling policy.
pub mod scheduler;
/// Sessions, head and the session cache.
pub mod session;
/// Persistent content store.
pub mod store;
/// Sequential task queue.
pub mod task_queue;

pub use config::Config;
pub use error::{FeedError, FeedResult};
pub use manager::{FeedSessionManager, LifecycleEvent, ManagerState};
