//! Post creation: assigns ids and publishes the event. Fan-out happens later,
//! in the consumer.

use std::sync::Arc;

use fanfeed_api_types::Event;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::broker::{BrokerError, Producer};
use crate::domain::error::{DomainError, require_non_blank};
use crate::ids::SnowflakeGenerator;

#[derive(Debug, Error)]
pub enum CreatePostError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("failed to publish post event: {0}")]
    Publish(#[from] BrokerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedPost {
    pub event_id: i64,
    pub post_id: i64,
}

#[derive(Clone)]
pub struct PostService {
    ids: Arc<SnowflakeGenerator>,
    producer: Producer,
}

impl PostService {
    pub fn new(ids: Arc<SnowflakeGenerator>, producer: Producer) -> Self {
        Self { ids, producer }
    }

    /// Publish a `POST_CREATED` event and return once the broker accepted it.
    pub async fn create_post(
        &self,
        author_id: &str,
        content: &str,
    ) -> Result<AcceptedPost, CreatePostError> {
        require_non_blank("author_id", author_id)?;
        require_non_blank("content", content)?;

        let event_id = self.ids.generate();
        let post_id = self.ids.generate();
        let event = Event::post_created(
            event_id,
            post_id,
            author_id,
            content,
            OffsetDateTime::now_utc().unix_timestamp(),
        );
        self.producer.publish_event(&event).await?;

        info!(
            target = "fanfeed::application::posts",
            event_id,
            post_id,
            author_id,
            "post accepted"
        );
        Ok(AcceptedPost { event_id, post_id })
    }
}
