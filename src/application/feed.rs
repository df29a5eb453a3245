//! Feed read path: cache-aside over the feed store.
//!
//! Only the first page (`offset == 0`) is cached, and always at
//! [`MAX_FEED_LIMIT`] entries so a hit can serve any page size. A miss reads
//! that canonical page from the store and, when it is non-empty, hands it to
//! the [`CachePopulator`] which writes it on a detached task. Cached pages
//! expire by TTL only; the write path never invalidates them.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::application::metrics::{CacheStatus, NoopMetrics, PipelineMetrics};
use crate::application::repos::{FeedsRepo, RepoError};
use crate::cache::{CachePopulator, FeedCache};
use crate::domain::error::{DomainError, require_non_blank};

pub const DEFAULT_FEED_LIMIT: i64 = 20;
pub const MAX_FEED_LIMIT: i64 = 100;

/// Page size actually served: values outside `1..=100` fall back to 20.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(limit) if (1..=MAX_FEED_LIMIT).contains(&limit) => limit,
        _ => DEFAULT_FEED_LIMIT,
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub post_ids: Vec<i64>,
    pub cache: CacheStatus,
}

#[derive(Clone)]
pub struct FeedService {
    feeds: Arc<dyn FeedsRepo>,
    cache: Arc<dyn FeedCache>,
    populator: CachePopulator,
    metrics: Arc<dyn PipelineMetrics>,
}

impl FeedService {
    pub fn new(feeds: Arc<dyn FeedsRepo>, cache: Arc<dyn FeedCache>) -> Self {
        let populator = CachePopulator::new(Arc::clone(&cache));
        Self {
            feeds,
            cache,
            populator,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Newest-first post ids for `user_id`. `limit` is clamped with
    /// [`clamp_limit`]; a negative offset is rejected.
    pub async fn get_feed(
        &self,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<FeedPage, FeedError> {
        require_non_blank("user_id", user_id)?;
        let limit = clamp_limit(limit);
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(DomainError::validation("offset", "must not be negative").into());
        }

        if offset != 0 {
            let post_ids = self.feeds.list_feed(user_id, limit, offset).await?;
            self.metrics.feed_read(CacheStatus::Bypass);
            return Ok(FeedPage {
                post_ids,
                cache: CacheStatus::Bypass,
            });
        }

        match self.cache.get_feed(user_id).await {
            Ok(Some(mut post_ids)) => {
                post_ids.truncate(limit as usize);
                self.metrics.feed_read(CacheStatus::Hit);
                return Ok(FeedPage {
                    post_ids,
                    cache: CacheStatus::Hit,
                });
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = "fanfeed::application::feed",
                    user_id,
                    error = %err,
                    "feed cache read failed; falling back to store"
                );
            }
        }

        let mut post_ids = self.feeds.list_feed(user_id, MAX_FEED_LIMIT, 0).await?;
        if !post_ids.is_empty() {
            self.populator.spawn(user_id.to_string(), post_ids.clone());
        }
        post_ids.truncate(limit as usize);
        self.metrics.feed_read(CacheStatus::Miss);
        Ok(FeedPage {
            post_ids,
            cache: CacheStatus::Miss,
        })
    }

    /// Drop the cached first page of `user_id`.
    pub async fn invalidate(&self, user_id: &str) -> Result<(), crate::cache::CacheError> {
        self.cache.invalidate(user_id).await
    }
}
