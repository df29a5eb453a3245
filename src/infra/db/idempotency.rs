use async_trait::async_trait;
use sqlx::{query, query_scalar};

use crate::application::repos::{IdempotencyRepo, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl IdempotencyRepo for PostgresRepositories {
    async fn is_processed(&self, event_id: i64) -> Result<bool, RepoError> {
        query_scalar("SELECT EXISTS (SELECT 1 FROM processed_events WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn mark_processed(&self, event_id: i64) -> Result<(), RepoError> {
        query(
            r#"
            INSERT INTO processed_events (event_id, processed_at)
            VALUES ($1, now())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
