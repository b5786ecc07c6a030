//! Error taxonomy
//! Mission: give every failure a stable machine code and a provider-agnostic name

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Provider-agnostic error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("market not supported for this ticker")]
    MarketUnsupported,

    #[error("transient source error: {0}")]
    SourceTransient(String),

    #[error("all sources exhausted")]
    SourceExhausted,

    #[error("source circuit open")]
    CircuitOpen,

    #[error("llm rate limited")]
    LlmRateLimited,

    #[error("llm returned an unparseable response: {0}")]
    LlmInvalidResponse(String),

    #[error("report parse error: {0}")]
    Parse(String),

    #[error("duplicate submission, existing task {0}")]
    Duplicate(String),

    #[error("cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Stable machine code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::MarketUnsupported => "market_unsupported",
            AppError::SourceTransient(_) => "source_transient",
            AppError::SourceExhausted => "source_exhausted",
            AppError::CircuitOpen => "circuit_open",
            AppError::LlmRateLimited => "llm_rate_limited",
            AppError::LlmInvalidResponse(_) => "llm_invalid_response",
            AppError::Parse(_) => "parse_error",
            AppError::Duplicate(_) => "duplicate_submission",
            AppError::Cancelled => "cancelled",
            AppError::Persistence(_) => "persistence_error",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MarketUnsupported => StatusCode::BAD_REQUEST,
            AppError::SourceTransient(_) => StatusCode::BAD_GATEWAY,
            AppError::SourceExhausted => StatusCode::BAD_GATEWAY,
            AppError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            AppError::LlmRateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::LlmInvalidResponse(_) => StatusCode::BAD_GATEWAY,
            AppError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody {
            error: "request_failed",
            message: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::SourceTransient(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Parse(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
