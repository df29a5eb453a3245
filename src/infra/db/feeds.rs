use async_trait::async_trait;
use sqlx::{query, query_scalar};
use time::OffsetDateTime;

use crate::application::repos::{FeedsRepo, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl FeedsRepo for PostgresRepositories {
    async fn insert_feed_entries(
        &self,
        user_ids: &[String],
        post_id: i64,
        created_at: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        // One statement per call; callers chunk large follower lists.
        let result = query(
            r#"
            INSERT INTO feeds (user_id, post_id, created_at)
            SELECT user_id, $2, $3
            FROM UNNEST($1::text[]) AS t(user_id)
            ON CONFLICT (user_id, post_id) DO NOTHING
            "#,
        )
        .bind(user_ids)
        .bind(post_id)
        .bind(created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn list_feed(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<i64>, RepoError> {
        query_scalar(
            r#"
            SELECT post_id
            FROM feeds
            WHERE user_id = $1
            ORDER BY created_at DESC, post_id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
