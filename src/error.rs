use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;
use crate::service::ForumError;
use crate::validation::FieldErrors;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("validation")] Validation(FieldErrors),
    #[error("integrity: {0}")] Integrity(String),
    #[error("not found")] NotFound,
    #[error("unauthorized")] Unauthorized,
    #[error("forbidden")] Forbidden,
    #[error("conflict")] Conflict,
    #[error("too many requests")] TooManyRequests,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        ForumError::from(e).into()
    }
}

impl From<ForumError> for ApiError {
    fn from(e: ForumError) -> Self {
        match e {
            ForumError::Validation(fields) => ApiError::Validation(fields),
            ForumError::Integrity(msg) => ApiError::Integrity(msg),
            ForumError::NotFound => ApiError::NotFound,
            ForumError::Unauthenticated | ForumError::InvalidCredentials => ApiError::Unauthorized,
            ForumError::Forbidden => ApiError::Forbidden,
            ForumError::Conflict => ApiError::Conflict,
            ForumError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Integrity(_) | ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let fields = match self {
            ApiError::Validation(f) => Some(f.clone()),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string(), fields })
    }
}
