//! In-process feed cache with per-entry expiry and LRU eviction.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;

use crate::util::lock::{rw_read, rw_write};

use super::config::CacheConfig;
use super::{CacheError, FeedCache};

const SOURCE: &str = "cache::store";

struct CachedPage {
    post_ids: Vec<i64>,
    expires_at: Instant,
}

pub struct MemoryFeedCache {
    ttl: Duration,
    pages: RwLock<LruCache<String, CachedPage>>,
}

impl MemoryFeedCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            pages: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeedCache for MemoryFeedCache {
    async fn get_feed(&self, user_id: &str) -> Result<Option<Vec<i64>>, CacheError> {
        let mut pages = rw_write(&self.pages, SOURCE, "get_feed");
        match pages.get(user_id) {
            Some(page) if page.expires_at > Instant::now() => {
                return Ok(Some(page.post_ids.clone()));
            }
            Some(_) => {}
            None => return Ok(None),
        }
        pages.pop(user_id);
        Ok(None)
    }

    async fn set_feed(&self, user_id: &str, post_ids: Vec<i64>) -> Result<(), CacheError> {
        let page = CachedPage {
            post_ids,
            expires_at: Instant::now() + self.ttl,
        };
        rw_write(&self.pages, SOURCE, "set_feed").put(user_id.to_string(), page);
        Ok(())
    }

    async fn invalidate(&self, user_id: &str) -> Result<(), CacheError> {
        rw_write(&self.pages, SOURCE, "invalidate").pop(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> MemoryFeedCache {
        MemoryFeedCache::new(&CacheConfig {
            ttl: Duration::from_secs(300),
            capacity,
        })
    }

    #[tokio::test]
    async fn returns_stored_page() {
        let cache = cache(8);
        cache.set_feed("alice", vec![3, 2, 1]).await.expect("set");

        assert_eq!(
            cache.get_feed("alice").await.expect("get"),
            Some(vec![3, 2, 1])
        );
        assert_eq!(cache.get_feed("bob").await.expect("get"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = cache(8);
        cache.set_feed("alice", vec![1]).await.expect("set");

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get_feed("alice").await.expect("get").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get_feed("alice").await.expect("get").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = cache(2);
        cache.set_feed("a", vec![1]).await.expect("set");
        cache.set_feed("b", vec![2]).await.expect("set");
        cache.get_feed("a").await.expect("touch");
        cache.set_feed("c", vec![3]).await.expect("set");

        assert!(cache.get_feed("a").await.expect("get").is_some());
        assert!(cache.get_feed("b").await.expect("get").is_none());
        assert!(cache.get_feed("c").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = cache(8);
        cache.set_feed("alice", vec![1]).await.expect("set");
        cache.invalidate("alice").await.expect("invalidate");

        assert!(cache.get_feed("alice").await.expect("get").is_none());
    }
}
