use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

/// The error taxonomy for the whole service (spec §7). Every fallible path
/// the HTTP surface can observe ends up as one of these variants; anything
/// that doesn't fit is `Internal`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("no usable seed tracks were found")]
    NoSeeds,

    #[error("every suggestion was already known: {0}")]
    AllFiltered(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("already running")]
    AlreadyRunning,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<deadpool::managed::PoolError<sqlx::Error>> for AppError {
    fn from(e: deadpool::managed::PoolError<sqlx::Error>) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<deadpool::managed::BuildError<sqlx::Error>> for AppError {
    fn from(e: deadpool::managed::BuildError<sqlx::Error>) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::UpstreamError(e.to_string())
    }
}

impl From<reqwest_middleware::Error> for AppError {
    fn from(e: reqwest_middleware::Error) -> Self {
        AppError::UpstreamError(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<handlebars::RenderError> for AppError {
    fn from(e: handlebars::RenderError) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<handlebars::TemplateError> for AppError {
    fn from(e: handlebars::TemplateError) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    status: &'static str,
    timestamp: chrono::DateTime<Utc>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            AppError::LlmError(_) => StatusCode::BAD_GATEWAY,
            AppError::NoSeeds | AppError::AllFiltered(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Cancelled => StatusCode::from_u16(499).unwrap(),
            AppError::AlreadyRunning => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(error = %self, %status, "request failed");
        let body = ErrorBody {
            error: self.to_string(),
            status: "error",
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
