//! Feed cache.
//!
//! Holds the first page of each user's feed for a bounded time. Entries are
//! never authoritative: the feed store is the source of truth and a cached page
//! may be stale or missing at any moment.
//!
//! - [`FeedCache`]: the capability the read path depends on.
//! - [`MemoryFeedCache`]: in-process TTL + LRU implementation.
//! - [`CachePopulator`]: detached, single-flight-per-user population on miss.

mod config;
mod populate;
mod store;

use async_trait::async_trait;
use thiserror::Error;

pub use config::CacheConfig;
pub use populate::CachePopulator;
pub use store::MemoryFeedCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("feed cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait FeedCache: Send + Sync {
    /// Cached first page for `user_id`, or `None` when absent or expired.
    async fn get_feed(&self, user_id: &str) -> Result<Option<Vec<i64>>, CacheError>;

    /// Replace the cached first page for `user_id`.
    async fn set_feed(&self, user_id: &str, post_ids: Vec<i64>) -> Result<(), CacheError>;

    async fn invalidate(&self, user_id: &str) -> Result<(), CacheError>;
}
