//! In-memory caches owned by the session manager.
//!
//! Both caches are only mutated from the session manager's task queue.
//! They sit behind a mutex so they can be shared with queued tasks, but
//! the lock is never contended in practice.

mod content;
mod interner;
mod shared_state;

pub use content::ContentCache;
pub use interner::{Interner, StreamSharedStateInterner};
pub use shared_state::SharedStateCache;
