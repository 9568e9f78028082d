use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sdn_core::SdnError;
use serde_json::json;
use tracing::error;

/// HTTP-facing error wrapper. Auth failures collapse to one opaque body so
/// the surface cannot distinguish wrong password from unknown account.
#[derive(Debug)]
pub struct ApiError(pub SdnError);

impl From<SdnError> for ApiError {
    fn from(e: SdnError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            SdnError::AuthFailed => (StatusCode::UNAUTHORIZED, "authentication_failed"),
            SdnError::PermissionDenied => (StatusCode::FORBIDDEN, "forbidden"),
            SdnError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            SdnError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            SdnError::SetupAlreadyComplete => (StatusCode::BAD_REQUEST, "setup_already_complete"),
            SdnError::SetupNotStarted => (StatusCode::BAD_REQUEST, "setup_not_started"),
            SdnError::InvalidRequest(_) | SdnError::InvalidSchemaName => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            other => {
                error!(error = %other, "internal error on admin surface");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };
        (status, Json(json!({ "error": code }))).into_response()
    }
}
