use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tarifa_common::TarifaError;

/// Error type for HTTP handlers.
///
/// Wraps [`TarifaError`] and renders every failure as `{error, code}`, plus
/// `violations` for bulk validation and rule set errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] TarifaError),

    /// Lookup found no routable entry
    #[error("no rate for {0}")]
    NoRate(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, violations) = match &self {
            ApiError::Engine(err) => {
                let status = match err {
                    TarifaError::Validation(_) | TarifaError::Configuration(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    TarifaError::Dependency(_)
                    | TarifaError::Precondition(_)
                    | TarifaError::Concurrency(_) => StatusCode::CONFLICT,
                    TarifaError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let violations = match err {
                    TarifaError::Validation(v) => Some(json!(v.violations)),
                    TarifaError::Configuration(c) => Some(json!(c.problems)),
                    _ => None,
                };
                (status, err.code(), violations)
            }
            ApiError::NoRate(_) => (StatusCode::NOT_FOUND, "NO_RATE", None),
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(violations) = violations {
            body["violations"] = violations;
        }

        (status, axum::Json(body)).into_response()
    }
}
