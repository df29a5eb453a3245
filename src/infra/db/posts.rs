use async_trait::async_trait;
use sqlx::{FromRow, query, query_as};
use time::OffsetDateTime;

use crate::application::repos::{PostsRepo, RepoError};
use crate::domain::entities::PostRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(FromRow)]
struct PostRow {
    post_id: i64,
    author_id: String,
    content: String,
    created_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            post_id: row.post_id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn create_post(&self, post: &PostRecord) -> Result<bool, RepoError> {
        let result = query(
            r#"
            INSERT INTO posts (post_id, author_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (post_id) DO NOTHING
            "#,
        )
        .bind(post.post_id)
        .bind(&post.author_id)
        .bind(&post.content)
        .bind(post.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_post(&self, post_id: i64) -> Result<Option<PostRecord>, RepoError> {
        let row: Option<PostRow> = query_as(
            r#"
            SELECT post_id, author_id, content, created_at
            FROM posts
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }
}
