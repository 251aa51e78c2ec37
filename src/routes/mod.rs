mod health_check;
mod subscribers;
mod tracking;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::mailing::MailingError;

pub use health_check::*;
pub use subscribers::*;
pub use tracking::*;

impl IntoResponse for MailingError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Template(_) | Self::Transport(_) | Self::Scheduling(_) => {
                tracing::error!(error.cause_chain = ?self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
