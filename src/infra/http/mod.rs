//! HTTP boundary: post creation, feed reads, follows, health.

mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::{
    feed::FeedService, follows::FollowService, posts::PostService, repos::HealthRepo,
};

pub use middleware::log_responses;

pub const CACHE_HEADER: &str = "x-cache";

#[derive(Clone)]
pub struct HttpState {
    pub posts: PostService,
    pub feeds: FeedService,
    pub follows: FollowService,
    pub health: Arc<dyn HealthRepo>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/posts", post(handlers::create_post))
        .route("/feeds/{user_id}", get(handlers::get_feed))
        .route("/follow", post(handlers::follow))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
}
