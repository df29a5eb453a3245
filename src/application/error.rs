use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fanfeed_api_types::{ErrorBody, ErrorMessage};
use thiserror::Error;

use crate::{
    application::{
        feed::FeedError, follows::FollowError, posts::CreatePostError, repos::RepoError,
    },
    broker::BrokerError,
    domain::error::DomainError,
    infra::error::InfraError,
};

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const PUBLISH: &str = "publish_failed";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL: &str = "internal_error";
}

/// Diagnostic detail attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Publish(#[from] BrokerError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<FeedError> for AppError {
    fn from(error: FeedError) -> Self {
        match error {
            FeedError::Domain(err) => Self::Domain(err),
            FeedError::Repo(err) => Self::Repo(err),
        }
    }
}

impl From<CreatePostError> for AppError {
    fn from(error: CreatePostError) -> Self {
        match error {
            CreatePostError::Domain(err) => Self::Domain(err),
            CreatePostError::Publish(err) => Self::Publish(err),
        }
    }
}

impl From<FollowError> for AppError {
    fn from(error: FollowError) -> Self {
        match error {
            FollowError::Domain(err) => Self::Domain(err),
            FollowError::Repo(err) => Self::Repo(err),
        }
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Repo(RepoError::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Repo(RepoError::Timeout) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Repo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Publish(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(InfraError::Database { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Domain(_)
            | AppError::Validation(_)
            | AppError::Repo(RepoError::InvalidInput { .. }) => codes::BAD_REQUEST,
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => codes::NOT_FOUND,
            AppError::Repo(RepoError::Timeout) => codes::DB_TIMEOUT,
            AppError::Repo(_) => codes::REPO,
            AppError::Publish(_) => codes::PUBLISH,
            AppError::Infra(InfraError::Database { .. }) => codes::UNAVAILABLE,
            AppError::Infra(_) | AppError::Unexpected(_) => codes::INTERNAL,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(_) | AppError::Validation(_) => "Request could not be processed",
            AppError::Repo(RepoError::InvalidInput { .. }) => "Request could not be processed",
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => "Resource not found",
            AppError::Repo(RepoError::Timeout) => "Service temporarily unavailable",
            AppError::Repo(_) => "Storage failure",
            AppError::Publish(_) => "Failed to publish event",
            AppError::Infra(InfraError::Database { .. }) => "Service temporarily unavailable",
            AppError::Infra(_) | AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }

    /// Client-safe detail: validation problems are echoed, internals are not.
    fn hint(&self) -> Option<String> {
        match self {
            AppError::Domain(err) => Some(err.to_string()),
            AppError::Validation(message) => Some(message.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorMessage {
                code: self.code().to_string(),
                message: self.presentation_message().to_string(),
                hint: self.hint(),
            },
        };
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}
