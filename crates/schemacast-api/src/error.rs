use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use schemacast_core::error::CoreError;
use schemacast_engine::EngineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`EngineError`] for engine failures and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// An error from the propagation engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(engine) => match engine {
                EngineError::VersionNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "VERSION_NOT_FOUND",
                    format!("Version {id} not found"),
                ),
                EngineError::JobNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "JOB_NOT_FOUND",
                    format!("Job {id} not found"),
                ),
                EngineError::NoTargets(pattern) => (
                    StatusCode::BAD_REQUEST,
                    "NO_TARGETS",
                    format!("No databases match pattern '{pattern}'"),
                ),
                EngineError::Core(CoreError::Validation(msg)) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                EngineError::Core(CoreError::ChecksumMismatch { .. }) => (
                    StatusCode::CONFLICT,
                    "CHECKSUM_MISMATCH",
                    engine.to_string(),
                ),
                EngineError::InvalidMetadata { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INVALID_METADATA",
                    engine.to_string(),
                ),
                EngineError::Database(err) => {
                    tracing::error!(error = %err, "Database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
                other => {
                    tracing::error!(error = %other, "Engine error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
