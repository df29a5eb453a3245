use async_trait::async_trait;
use sqlx::{query, query_scalar};

use crate::application::repos::{FollowersRepo, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl FollowersRepo for PostgresRepositories {
    async fn follow(&self, follower_id: &str, followee_id: &str) -> Result<bool, RepoError> {
        let result = query(
            r#"
            INSERT INTO followers (follower_id, followee_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (follower_id, followee_id) DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_followers(&self, user_id: &str) -> Result<Vec<String>, RepoError> {
        query_scalar("SELECT follower_id FROM followers WHERE followee_id = $1")
            .bind(user_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_followers(&self, user_id: &str) -> Result<u64, RepoError> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM followers WHERE followee_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }
}
