use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use fanfeed_api_types::{
    CreatePostRequest, CreatePostResponse, FeedQuery, FeedResponse, FollowRequest,
    FollowResponse,
};
use serde_json::json;

use crate::application::error::AppError;
use crate::application::metrics::CacheStatus;

use super::{CACHE_HEADER, HttpState};

pub async fn health(State(state): State<HttpState>) -> Result<impl IntoResponse, AppError> {
    state.health.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn create_post(
    State(state): State<HttpState>,
    payload: Result<Json<CreatePostRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|err| AppError::validation(err.body_text()))?;
    let accepted = state
        .posts
        .create_post(&request.author_id, &request.content)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreatePostResponse {
            post_id: accepted.post_id,
            message: "Post created successfully".to_string(),
        }),
    ))
}

pub async fn get_feed(
    State(state): State<HttpState>,
    Path(user_id): Path<String>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|err| AppError::validation(err.body_text()))?;
    let page = state
        .feeds
        .get_feed(&user_id, query.limit, query.offset)
        .await?;

    let marker = match page.cache {
        CacheStatus::Hit => "HIT",
        CacheStatus::Miss | CacheStatus::Bypass => "MISS",
    };
    let mut response = Json(FeedResponse {
        user_id,
        post_ids: page.post_ids,
    })
    .into_response();
    response
        .headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(marker));
    Ok(response)
}

pub async fn follow(
    State(state): State<HttpState>,
    payload: Result<Json<FollowRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|err| AppError::validation(err.body_text()))?;
    state
        .follows
        .follow(&request.follower_id, &request.followee_id)
        .await?;

    Ok(Json(FollowResponse {
        message: "followed successfully".to_string(),
    }))
}
