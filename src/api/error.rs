//! JSON error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error};

use crate::error::{AppError, AppErrorKind};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self.kind {
            AppErrorKind::Database(_) | AppErrorKind::Internal(_) => {
                "An internal error occurred".to_string()
            }
            kind => kind.to_string(),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), code = self.error_code(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), code = self.error_code(), error = %self, "Request rejected");
        }

        let mut body = json!({
            "success": false,
            "error": self.error_code(),
            "message": message,
        });
        if let AppErrorKind::Validation(fields) = &self.kind {
            body["details"] = json!(fields);
        }

        (status, Json(body)).into_response()
    }
}
