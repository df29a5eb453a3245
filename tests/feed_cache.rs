use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fanfeed::application::feed::{FeedError, FeedService};
use fanfeed::application::metrics::CacheStatus;
use fanfeed::application::repos::{FeedsRepo, RepoError};
use fanfeed::cache::{CacheConfig, FeedCache, MemoryFeedCache};
use fanfeed::infra::memory::MemoryRepositories;
use time::OffsetDateTime;

/// Feed store that counts reads.
struct CountingFeeds {
    inner: MemoryRepositories,
    reads: AtomicUsize,
}

impl CountingFeeds {
    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedsRepo for CountingFeeds {
    async fn insert_feed_entries(
        &self,
        user_ids: &[String],
        post_id: i64,
        created_at: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        self.inner
            .insert_feed_entries(user_ids, post_id, created_at)
            .await
    }

    async fn list_feed(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<i64>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_feed(user_id, limit, offset).await
    }
}

async fn seeded(posts: i64) -> Arc<CountingFeeds> {
    let feeds = Arc::new(CountingFeeds {
        inner: MemoryRepositories::new(),
        reads: AtomicUsize::new(0),
    });
    let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("timestamp");
    let reader = vec!["reader".to_string()];
    for post_id in 1..=posts {
        feeds
            .insert_feed_entries(&reader, post_id, base + time::Duration::seconds(post_id))
            .await
            .expect("insert");
    }
    feeds
}

fn service(feeds: &Arc<CountingFeeds>) -> (FeedService, Arc<MemoryFeedCache>) {
    let cache = Arc::new(MemoryFeedCache::new(&CacheConfig::default()));
    (FeedService::new(feeds.clone(), cache.clone()), cache)
}

async fn wait_until_cached(cache: &MemoryFeedCache, user_id: &str) -> Vec<i64> {
    for _ in 0..200 {
        if let Some(post_ids) = cache.get_feed(user_id).await.expect("cache read") {
            return post_ids;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache was never populated for {user_id}");
}

#[tokio::test]
async fn out_of_range_limits_fall_back_to_twenty_newest_first() {
    let feeds = seeded(30).await;
    let (service, _) = service(&feeds);
    let expected: Vec<i64> = (11..=30).rev().collect();

    for limit in [Some(0), Some(500), Some(-3), None] {
        let page = service
            .get_feed("reader", limit, Some(1))
            .await
            .expect("feed");
        let shifted: Vec<i64> = (10..=29).rev().collect();
        assert_eq!(page.post_ids, shifted, "limit {limit:?}");
        assert_eq!(page.cache, CacheStatus::Bypass);
    }

    let page = service.get_feed("reader", Some(0), None).await.expect("feed");
    assert_eq!(page.post_ids, expected);

    let page = service.get_feed("reader", Some(100), Some(25)).await.expect("feed");
    assert_eq!(page.post_ids, vec![5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn first_page_miss_populates_cache_then_hits() {
    let feeds = seeded(5).await;
    let (service, cache) = service(&feeds);

    let first = service.get_feed("reader", None, None).await.expect("feed");
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.post_ids, vec![5, 4, 3, 2, 1]);
    assert_eq!(feeds.reads(), 1);

    assert_eq!(wait_until_cached(&cache, "reader").await, vec![5, 4, 3, 2, 1]);

    let second = service.get_feed("reader", Some(3), None).await.expect("feed");
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(second.post_ids, vec![5, 4, 3]);
    assert_eq!(feeds.reads(), 1, "hit must not touch the store");
}

#[tokio::test]
async fn small_first_read_does_not_shrink_later_pages() {
    let feeds = seeded(30).await;
    let (service, cache) = service(&feeds);

    let small = service.get_feed("reader", Some(2), None).await.expect("feed");
    assert_eq!(small.cache, CacheStatus::Miss);
    assert_eq!(small.post_ids, vec![30, 29]);

    let cached = wait_until_cached(&cache, "reader").await;
    assert_eq!(cached, (1..=30).rev().collect::<Vec<i64>>());

    let default_page = service.get_feed("reader", None, None).await.expect("feed");
    assert_eq!(default_page.cache, CacheStatus::Hit);
    assert_eq!(default_page.post_ids, (11..=30).rev().collect::<Vec<i64>>());

    let wide = service.get_feed("reader", Some(100), None).await.expect("feed");
    assert_eq!(wide.cache, CacheStatus::Hit);
    assert_eq!(wide.post_ids.len(), 30);
    assert_eq!(feeds.reads(), 1);
}

#[tokio::test]
async fn cached_page_is_served_until_invalidated() {
    let feeds = seeded(2).await;
    let (service, cache) = service(&feeds);

    service.get_feed("reader", None, None).await.expect("feed");
    wait_until_cached(&cache, "reader").await;

    feeds
        .insert_feed_entries(
            &["reader".to_string()],
            3,
            OffsetDateTime::from_unix_timestamp(1_800_000_000).expect("timestamp"),
        )
        .await
        .expect("insert");

    let stale = service.get_feed("reader", None, None).await.expect("feed");
    assert_eq!(stale.post_ids, vec![2, 1]);

    service.invalidate("reader").await.expect("invalidate");
    let fresh = service.get_feed("reader", None, None).await.expect("feed");
    assert_eq!(fresh.cache, CacheStatus::Miss);
    assert_eq!(fresh.post_ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn empty_feed_is_not_cached() {
    let feeds = seeded(0).await;
    let (service, cache) = service(&feeds);

    let page = service.get_feed("nobody", None, None).await.expect("feed");
    assert!(page.post_ids.is_empty());
    assert_eq!(page.cache, CacheStatus::Miss);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.is_empty());
}

#[tokio::test]
async fn negative_offset_and_blank_user_are_rejected() {
    let feeds = seeded(1).await;
    let (service, _) = service(&feeds);

    assert!(matches!(
        service.get_feed("reader", None, Some(-1)).await,
        Err(FeedError::Domain(_))
    ));
    assert!(matches!(
        service.get_feed("  ", None, None).await,
        Err(FeedError::Domain(_))
    ));
    assert_eq!(feeds.reads(), 0);
}
