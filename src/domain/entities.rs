//! Records mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;

/// A post, created once by the fan-out engine and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub post_id: i64,
    pub author_id: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// Directed edge: `follower_id` follows `followee_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowEdgeRecord {
    pub follower_id: String,
    pub followee_id: String,
    pub created_at: OffsetDateTime,
}

/// Materialized reference to a post inside one user's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntryRecord {
    pub user_id: String,
    pub post_id: i64,
    pub created_at: OffsetDateTime,
}

/// Presence means the event's side effects were applied at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedEventRecord {
    pub event_id: i64,
    pub processed_at: OffsetDateTime,
}
