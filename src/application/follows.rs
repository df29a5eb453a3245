use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::application::repos::{FollowersRepo, RepoError};
use crate::domain::error::{DomainError, require_non_blank};

#[derive(Debug, Error)]
pub enum FollowError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct FollowService {
    followers: Arc<dyn FollowersRepo>,
}

impl FollowService {
    pub fn new(followers: Arc<dyn FollowersRepo>) -> Self {
        Self { followers }
    }

    /// Record that `follower_id` follows `followee_id`. Repeating it is a
    /// no-op. Self-follows are accepted.
    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> Result<(), FollowError> {
        require_non_blank("follower_id", follower_id)?;
        require_non_blank("followee_id", followee_id)?;

        let created = self.followers.follow(follower_id, followee_id).await?;
        debug!(
            target = "fanfeed::application::follows",
            follower_id,
            followee_id,
            created,
            "follow recorded"
        );
        Ok(())
    }

    pub async fn follower_count(&self, user_id: &str) -> Result<u64, FollowError> {
        Ok(self.followers.count_followers(user_id).await?)
    }
}
