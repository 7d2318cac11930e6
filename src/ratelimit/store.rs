//! Bucket state storage.

use async_trait::async_trait;
use thiserror::Error;

use super::bucket::BucketState;

/// Errors raised by a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store was shut down and no longer accepts operations
    #[error("store is shut down")]
    ShutDown,

    /// The backing storage could not be reached or failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trait for bucket storage backends.
///
/// Implementations must treat an entry whose `expires_at` has passed as
/// absent on `get` and `has`, whether or not it has been swept yet. Every
/// operation fails with [`StoreError::ShutDown`] once `shutdown` has run;
/// `shutdown` itself may be called any number of times.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the live state for a key.
    async fn get(&self, key: &str) -> StoreResult<Option<BucketState>>;

    /// Persist `state`, expiring it `ttl_ms` from now.
    async fn set(&self, key: &str, state: BucketState, ttl_ms: u64) -> StoreResult<()>;

    /// Remove a key. Returns whether it was present.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Whether a live entry exists for a key.
    async fn has(&self, key: &str) -> StoreResult<bool>;

    /// Number of stored entries, including expired ones not yet swept.
    async fn size(&self) -> StoreResult<usize>;

    /// Remove every entry.
    async fn clear(&self) -> StoreResult<()>;

    /// Stop background work and release all state.
    async fn shutdown(&self) -> StoreResult<()>;
}
