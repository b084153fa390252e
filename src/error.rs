//! Error taxonomy and its HTTP-facing projection.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Internal error taxonomy. Every fallible core operation returns this;
/// the HTTP layer projects it onto [`ApiError`] at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream refused oversized grid request after {depth} splits")]
    UpstreamTooBig { depth: u32 },

    #[error("upstream request failed: HTTP {status} - {body_snippet}")]
    UpstreamFatal { status: u16, body_snippet: String },

    #[error("store busy: {0}")]
    StoreBusy(String),

    #[error("a build is already in progress")]
    BuildBusy,

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            Self::UpstreamTooBig { .. } => "UPSTREAM_TOO_BIG",
            Self::UpstreamFatal { .. } => "UPSTREAM_FATAL",
            Self::StoreBusy(_) => "STORE_BUSY",
            Self::BuildBusy => "BUILD_BUSY",
            Self::MissingInput(_) => "MISSING_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTooBig { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamFatal { .. } => StatusCode::BAD_GATEWAY,
            Self::StoreBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BuildBusy => StatusCode::CONFLICT,
            Self::MissingInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: &'static str,
}

pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self {
            status: err.status(),
            body: ApiErrorBody {
                error: err.to_string(),
                code: err.code(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
