//! Fan-out engine: turns a `POST_CREATED` event into a post row and one feed
//! entry per follower.
//!
//! Every write here is idempotent (insert-or-ignore on a unique key), so a
//! redelivered event converges on the same rows whether or not the ledger
//! recorded it. The ledger only spares the repeated work.

use std::sync::Arc;

use async_trait::async_trait;
use fanfeed_api_types::Event;
use tracing::{debug, info, warn};

use crate::application::metrics::{NoopMetrics, PipelineMetrics};
use crate::application::repos::{FeedsRepo, FollowersRepo, IdempotencyRepo, PostsRepo};
use crate::broker::{HandlerError, Message, MessageHandler};
use crate::domain::error::DomainError;
use crate::domain::events::{EventKind, decode_event, post_from_created_event};

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Authors with at least this many followers are not fanned out.
    pub celebrity_threshold: u64,
    /// Followers written per feed insert statement.
    pub insert_chunk_size: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            celebrity_threshold: 10_000,
            insert_chunk_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// The ledger already holds the event id.
    AlreadyProcessed,
    /// Event type without side effects here.
    Ignored { kind: String },
    /// Post stored; the author is above the celebrity threshold.
    SkippedCelebrity { followers: u64 },
    /// Post stored and written into follower feeds.
    FannedOut { followers: usize, rows_written: u64 },
}

#[derive(Clone)]
pub struct FanoutHandler {
    posts: Arc<dyn PostsRepo>,
    followers: Arc<dyn FollowersRepo>,
    feeds: Arc<dyn FeedsRepo>,
    ledger: Arc<dyn IdempotencyRepo>,
    metrics: Arc<dyn PipelineMetrics>,
    config: FanoutConfig,
}

impl From<DomainError> for HandlerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::MalformedEvent { reason } => HandlerError::Decode(reason),
            other => HandlerError::Invalid(other.to_string()),
        }
    }
}

impl FanoutHandler {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        followers: Arc<dyn FollowersRepo>,
        feeds: Arc<dyn FeedsRepo>,
        ledger: Arc<dyn IdempotencyRepo>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            posts,
            followers,
            feeds,
            ledger,
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Process one serialized event.
    pub async fn handle_event_bytes(&self, bytes: &[u8]) -> Result<FanoutOutcome, HandlerError> {
        let event = decode_event(bytes)?;

        if self
            .ledger
            .is_processed(event.event_id)
            .await
            .map_err(|err| HandlerError::store("idempotency check", err))?
        {
            debug!(
                target = "fanfeed::application::fanout",
                event_id = event.event_id,
                "event already processed"
            );
            return Ok(FanoutOutcome::AlreadyProcessed);
        }

        let outcome = match EventKind::parse(&event.event_type) {
            EventKind::PostCreated => self.handle_post_created(&event).await?,
            EventKind::PostDeleted => {
                info!(
                    target = "fanfeed::application::fanout",
                    event_id = event.event_id,
                    post_id = ?event.payload.post_id,
                    "post deletion has no feed side effects"
                );
                FanoutOutcome::Ignored {
                    kind: event.event_type.clone(),
                }
            }
            EventKind::Unknown(kind) => {
                warn!(
                    target = "fanfeed::application::fanout",
                    event_id = event.event_id,
                    event_type = %kind,
                    "unknown event type"
                );
                FanoutOutcome::Ignored { kind }
            }
        };

        self.ledger
            .mark_processed(event.event_id)
            .await
            .map_err(|err| HandlerError::store("mark processed", err))?;
        Ok(outcome)
    }

    async fn handle_post_created(&self, event: &Event) -> Result<FanoutOutcome, HandlerError> {
        let post = post_from_created_event(event)?;

        let inserted = self
            .posts
            .create_post(&post)
            .await
            .map_err(|err| HandlerError::store("create post", err))?;
        if !inserted {
            debug!(
                target = "fanfeed::application::fanout",
                event_id = event.event_id,
                post_id = post.post_id,
                "post already stored"
            );
        }

        let follower_count = self
            .followers
            .count_followers(&post.author_id)
            .await
            .map_err(|err| HandlerError::store("count followers", err))?;
        if follower_count >= self.config.celebrity_threshold {
            info!(
                target = "fanfeed::application::fanout",
                event_id = event.event_id,
                post_id = post.post_id,
                author_id = %post.author_id,
                followers = follower_count,
                "author above celebrity threshold; skipping fan-out"
            );
            return Ok(FanoutOutcome::SkippedCelebrity {
                followers: follower_count,
            });
        }

        let followers = self
            .followers
            .list_followers(&post.author_id)
            .await
            .map_err(|err| HandlerError::store("list followers", err))?;

        let mut rows_written = 0;
        for chunk in followers.chunks(self.config.insert_chunk_size.max(1)) {
            rows_written += self
                .feeds
                .insert_feed_entries(chunk, post.post_id, post.created_at)
                .await
                .map_err(|err| HandlerError::store("insert feed entries", err))?;
        }
        self.metrics.fanout_written(rows_written);

        info!(
            target = "fanfeed::application::fanout",
            event_id = event.event_id,
            post_id = post.post_id,
            author_id = %post.author_id,
            followers = followers.len(),
            rows_written,
            "fan-out complete"
        );
        Ok(FanoutOutcome::FannedOut {
            followers: followers.len(),
            rows_written,
        })
    }
}

#[async_trait]
impl MessageHandler for FanoutHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.handle_event_bytes(&message.value).await.map(|_| ())
    }

    fn label(&self, message: &Message) -> &'static str {
        decode_event(&message.value)
            .map(|event| EventKind::parse(&event.event_type).as_label())
            .unwrap_or("MALFORMED")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryRepositories;

    fn handler(repos: &MemoryRepositories, threshold: u64) -> FanoutHandler {
        let repos = Arc::new(repos.clone());
        FanoutHandler::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            repos,
            FanoutConfig {
                celebrity_threshold: threshold,
                insert_chunk_size: 2,
            },
        )
    }

    async fn follow_all(repos: &MemoryRepositories, author: &str, count: usize) {
        for index in 0..count {
            repos
                .follow(&format!("follower-{index}"), author)
                .await
                .expect("follow");
        }
    }

    fn created(event_id: i64, post_id: i64) -> Vec<u8> {
        Event::post_created(event_id, post_id, "alice", "hello", 1_767_225_600)
            .to_bytes()
            .expect("encode")
    }

    #[tokio::test]
    async fn fans_out_to_every_follower_in_chunks() {
        let repos = MemoryRepositories::new();
        follow_all(&repos, "alice", 5).await;

        let outcome = handler(&repos, 10)
            .handle_event_bytes(&created(1, 100))
            .await
            .expect("handled");

        assert_eq!(
            outcome,
            FanoutOutcome::FannedOut {
                followers: 5,
                rows_written: 5
            }
        );
        for index in 0..5 {
            let feed = repos
                .list_feed(&format!("follower-{index}"), 10, 0)
                .await
                .expect("feed");
            assert_eq!(feed, vec![100]);
        }
        assert!(repos.is_processed(1).await.expect("ledger"));
    }

    #[tokio::test]
    async fn duplicate_event_short_circuits() {
        let repos = MemoryRepositories::new();
        follow_all(&repos, "alice", 2).await;
        let handler = handler(&repos, 10);

        handler
            .handle_event_bytes(&created(1, 100))
            .await
            .expect("first");
        let second = handler
            .handle_event_bytes(&created(1, 100))
            .await
            .expect("second");

        assert_eq!(second, FanoutOutcome::AlreadyProcessed);
        assert_eq!(repos.feed_entry_count(), 2);
        assert_eq!(repos.post_count(), 1);
    }

    #[tokio::test]
    async fn skips_fan_out_at_threshold() {
        let repos = MemoryRepositories::new();
        follow_all(&repos, "alice", 3).await;

        let outcome = handler(&repos, 3)
            .handle_event_bytes(&created(1, 100))
            .await
            .expect("handled");

        assert_eq!(outcome, FanoutOutcome::SkippedCelebrity { followers: 3 });
        assert_eq!(repos.feed_entry_count(), 0);
        assert_eq!(repos.post_count(), 1);
        assert!(repos.is_processed(1).await.expect("ledger"));
    }

    #[tokio::test]
    async fn unknown_type_is_recorded_as_processed() {
        let repos = MemoryRepositories::new();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "event_id": 9,
            "type": "USER_BLOCKED",
            "actor_id": "alice",
            "timestamp": 0
        }))
        .expect("encode");

        let outcome = handler(&repos, 10)
            .handle_event_bytes(&bytes)
            .await
            .expect("handled");

        assert_eq!(
            outcome,
            FanoutOutcome::Ignored {
                kind: "USER_BLOCKED".into()
            }
        );
        assert!(repos.is_processed(9).await.expect("ledger"));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_failure() {
        let repos = MemoryRepositories::new();
        let err = handler(&repos, 10)
            .handle_event_bytes(b"not json")
            .await
            .expect_err("must fail");

        assert!(matches!(err, HandlerError::Decode(_)));
    }
}
