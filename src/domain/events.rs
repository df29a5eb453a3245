//! Classification and validation of broker events.

use fanfeed_api_types::{EVENT_TYPE_POST_CREATED, EVENT_TYPE_POST_DELETED, Event};
use time::OffsetDateTime;

use super::entities::PostRecord;
use super::error::DomainError;

/// Handler dispatch key derived from the wire `type` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PostCreated,
    PostDeleted,
    Unknown(String),
}

impl EventKind {
    pub fn parse(value: &str) -> Self {
        match value {
            EVENT_TYPE_POST_CREATED => Self::PostCreated,
            EVENT_TYPE_POST_DELETED => Self::PostDeleted,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Low-cardinality label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::PostCreated => EVENT_TYPE_POST_CREATED,
            Self::PostDeleted => EVENT_TYPE_POST_DELETED,
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Decode a broker payload into an event envelope.
pub fn decode_event(bytes: &[u8]) -> Result<Event, DomainError> {
    Event::from_slice(bytes).map_err(|err| DomainError::malformed_event(err.to_string()))
}

/// Build the post a `POST_CREATED` event describes.
pub fn post_from_created_event(event: &Event) -> Result<PostRecord, DomainError> {
    let post_id = event
        .payload
        .post_id
        .ok_or_else(|| DomainError::malformed_event("POST_CREATED without payload.post_id"))?;
    if event.actor_id.trim().is_empty() {
        return Err(DomainError::malformed_event("POST_CREATED without actor_id"));
    }
    let created_at = OffsetDateTime::from_unix_timestamp(event.timestamp).map_err(|err| {
        DomainError::malformed_event(format!("timestamp {} out of range: {err}", event.timestamp))
    })?;

    Ok(PostRecord {
        post_id,
        author_id: event.actor_id.clone(),
        content: event.payload.content.clone().unwrap_or_default(),
        created_at,
    })
}
