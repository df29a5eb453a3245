//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::PostRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Append-only post log.
#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Insert the post unless a row with the same id exists. Returns whether a
    /// row was written.
    async fn create_post(&self, post: &PostRecord) -> Result<bool, RepoError>;

    async fn find_post(&self, post_id: i64) -> Result<Option<PostRecord>, RepoError>;
}

/// Directed follow graph.
#[async_trait]
pub trait FollowersRepo: Send + Sync {
    /// Idempotent edge insert. Returns whether the edge is new.
    async fn follow(&self, follower_id: &str, followee_id: &str) -> Result<bool, RepoError>;

    /// Every follower of `user_id`, unordered and unpaginated.
    async fn list_followers(&self, user_id: &str) -> Result<Vec<String>, RepoError>;

    async fn count_followers(&self, user_id: &str) -> Result<u64, RepoError>;
}

/// Materialized per-user feeds.
#[async_trait]
pub trait FeedsRepo: Send + Sync {
    /// Insert one entry per user for `post_id`, ignoring pairs that already
    /// exist. Returns the number of rows written.
    async fn insert_feed_entries(
        &self,
        user_ids: &[String],
        post_id: i64,
        created_at: OffsetDateTime,
    ) -> Result<u64, RepoError>;

    /// Post ids for `user_id`, newest first.
    async fn list_feed(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<i64>, RepoError>;
}

/// Ledger of event ids whose side effects have been applied.
#[async_trait]
pub trait IdempotencyRepo: Send + Sync {
    async fn is_processed(&self, event_id: i64) -> Result<bool, RepoError>;

    /// Record `event_id`; recording an id twice is a no-op.
    async fn mark_processed(&self, event_id: i64) -> Result<(), RepoError>;
}

/// Liveness check of the backing store.
#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
