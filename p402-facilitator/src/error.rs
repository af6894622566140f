//! Error responses of the facilitator HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use p402::facilitator::FacilitatorError;

/// A request the server could not answer with a payment result.
///
/// Payment-domain failures are not errors here: they are `200` responses
/// with `valid: false` or `success: false`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The body is not valid JSON for the endpoint.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
    /// The facilitator could not do its job, e.g. the node is unreachable.
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Facilitator(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::InvalidBody(_) => self.to_string(),
            Self::Facilitator(e) => {
                tracing::error!(error = %e, "Facilitator failure");
                match e {
                    FacilitatorError::Rpc(_) => "the chain node is unavailable".to_owned(),
                    FacilitatorError::Transport(_) | FacilitatorError::Internal(_) => {
                        "the facilitator is unavailable".to_owned()
                    }
                }
            }
        };
        let body = serde_json::json!({ "error": p402::proto::sanitize_error_message(&message) });
        (self.status(), axum::Json(body)).into_response()
    }
}
