//! In-process implementations of every store trait.
//!
//! Uniqueness rules mirror the Postgres schema: one post per id, one edge per
//! `(follower, followee)`, one feed entry per `(user, post)`, one ledger row
//! per event id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{
    FeedsRepo, FollowersRepo, HealthRepo, IdempotencyRepo, PostsRepo, RepoError,
};
use crate::domain::entities::{FollowEdgeRecord, PostRecord};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";

#[derive(Clone, Default)]
pub struct MemoryRepositories {
    inner: Arc<Stores>,
}

#[derive(Default)]
struct Stores {
    posts: RwLock<HashMap<i64, PostRecord>>,
    /// Followee id to its incoming edges keyed by follower id.
    followers: RwLock<HashMap<String, BTreeMap<String, FollowEdgeRecord>>>,
    feeds: RwLock<HashMap<String, FeedPage>>,
    processed: RwLock<HashMap<i64, OffsetDateTime>>,
}

#[derive(Default)]
struct FeedPage {
    members: HashSet<i64>,
    /// Sorted newest first by `(created_at, post_id)`.
    entries: Vec<(OffsetDateTime, i64)>,
}

impl FeedPage {
    fn insert(&mut self, post_id: i64, created_at: OffsetDateTime) -> bool {
        if !self.members.insert(post_id) {
            return false;
        }
        let key = (created_at, post_id);
        let index = self.entries.partition_point(|entry| *entry > key);
        self.entries.insert(index, key);
        true
    }
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_count(&self) -> usize {
        rw_read(&self.inner.posts, SOURCE, "post_count").len()
    }

    pub fn feed_entry_count(&self) -> usize {
        rw_read(&self.inner.feeds, SOURCE, "feed_entry_count")
            .values()
            .map(|page| page.entries.len())
            .sum()
    }

    pub fn processed_count(&self) -> usize {
        rw_read(&self.inner.processed, SOURCE, "processed_count").len()
    }
}

#[async_trait]
impl PostsRepo for MemoryRepositories {
    async fn create_post(&self, post: &PostRecord) -> Result<bool, RepoError> {
        let mut posts = rw_write(&self.inner.posts, SOURCE, "create_post");
        if posts.contains_key(&post.post_id) {
            return Ok(false);
        }
        posts.insert(post.post_id, post.clone());
        Ok(true)
    }

    async fn find_post(&self, post_id: i64) -> Result<Option<PostRecord>, RepoError> {
        Ok(rw_read(&self.inner.posts, SOURCE, "find_post")
            .get(&post_id)
            .cloned())
    }
}

#[async_trait]
impl FollowersRepo for MemoryRepositories {
    async fn follow(&self, follower_id: &str, followee_id: &str) -> Result<bool, RepoError> {
        let mut followers = rw_write(&self.inner.followers, SOURCE, "follow");
        let edges = followers.entry(followee_id.to_string()).or_default();
        if edges.contains_key(follower_id) {
            return Ok(false);
        }
        edges.insert(
            follower_id.to_string(),
            FollowEdgeRecord {
                follower_id: follower_id.to_string(),
                followee_id: followee_id.to_string(),
                created_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(true)
    }

    async fn list_followers(&self, user_id: &str) -> Result<Vec<String>, RepoError> {
        Ok(rw_read(&self.inner.followers, SOURCE, "list_followers")
            .get(user_id)
            .map(|edges| edges.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_followers(&self, user_id: &str) -> Result<u64, RepoError> {
        Ok(rw_read(&self.inner.followers, SOURCE, "count_followers")
            .get(user_id)
            .map(|edges| edges.len() as u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl FeedsRepo for MemoryRepositories {
    async fn insert_feed_entries(
        &self,
        user_ids: &[String],
        post_id: i64,
        created_at: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        let mut feeds = rw_write(&self.inner.feeds, SOURCE, "insert_feed_entries");
        let mut written = 0;
        for user_id in user_ids {
            if feeds
                .entry(user_id.clone())
                .or_default()
                .insert(post_id, created_at)
            {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn list_feed(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<i64>, RepoError> {
        if limit < 0 || offset < 0 {
            return Err(RepoError::InvalidInput {
                message: format!("limit {limit} and offset {offset} must not be negative"),
            });
        }
        Ok(rw_read(&self.inner.feeds, SOURCE, "list_feed")
            .get(user_id)
            .map(|page| {
                page.entries
                    .iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .map(|(_, post_id)| *post_id)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl IdempotencyRepo for MemoryRepositories {
    async fn is_processed(&self, event_id: i64) -> Result<bool, RepoError> {
        Ok(rw_read(&self.inner.processed, SOURCE, "is_processed").contains_key(&event_id))
    }

    async fn mark_processed(&self, event_id: i64) -> Result<(), RepoError> {
        rw_write(&self.inner.processed, SOURCE, "mark_processed")
            .entry(event_id)
            .or_insert_with(OffsetDateTime::now_utc);
        Ok(())
    }
}

#[async_trait]
impl HealthRepo for MemoryRepositories {
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}
