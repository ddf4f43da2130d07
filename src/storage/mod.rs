//! Persistent storage.
//!
//! The [`Store`] trait is the SQL port consumed by the ingestion
//! coordinator, the chat orchestrator, and the review pipeline. The
//! in-tree implementation is [`SqliteStore`].

pub mod schema;
pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteStore;
pub use traits::{DeadLetter, Store, StoreStats};

/// Default database filename.
pub const DEFAULT_DB_PATH: &str = "lexrag.db";

/// Store handle shared across the async orchestrators. Access is
/// serialized through the mutex; per-session and per-review ordering is
/// layered on top by their owners.
pub type SharedStore = std::sync::Arc<tokio::sync::Mutex<Box<dyn Store>>>;

/// Wraps a store for shared use.
#[must_use]
pub fn shared(store: impl Store + 'static) -> SharedStore {
    std::sync::Arc::new(tokio::sync::Mutex::new(Box::new(store)))
}
