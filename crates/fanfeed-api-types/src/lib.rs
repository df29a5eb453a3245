//! Wire types shared by the fanfeed server, its broker payloads, and clients.
//!
//! The [`Event`] envelope is the JSON value carried by every broker message on
//! the post-events topic; the remaining types are HTTP request/response bodies.

use serde::{Deserialize, Serialize};

/// Wire value of [`Event::event_type`] for a newly created post.
pub const EVENT_TYPE_POST_CREATED: &str = "POST_CREATED";
/// Wire value of [`Event::event_type`] for a deleted post.
pub const EVENT_TYPE_POST_DELETED: &str = "POST_DELETED";

/// Broker event envelope. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor_id: String,
    #[serde(default)]
    pub payload: EventPayload,
    /// Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Event {
    pub fn post_created(
        event_id: i64,
        post_id: i64,
        author_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            event_id,
            event_type: EVENT_TYPE_POST_CREATED.to_string(),
            actor_id: author_id.into(),
            payload: EventPayload {
                post_id: Some(post_id),
                content: Some(content.into()),
            },
            timestamp,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostRequest {
    pub author_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub post_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRequest {
    pub follower_id: String,
    pub followee_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowResponse {
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedResponse {
    pub user_id: String,
    pub post_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
