use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sharecsi_core::{CsiError, Status, StatusKind};

/// Verb failure carried back over HTTP
///
/// The body is always the `(kind, message)` status pair; the HTTP code is a
/// coarse hint for clients that do not read it.
#[derive(Debug)]
pub struct ApiError(pub CsiError);

/// Result type for handlers
pub type Result<T> = std::result::Result<T, ApiError>;

/// HTTP status used for each status kind
pub fn http_status(kind: StatusKind) -> StatusCode {
    match kind {
        StatusKind::Ok => StatusCode::OK,
        StatusKind::InvalidArgument => StatusCode::BAD_REQUEST,
        StatusKind::NotFound => StatusCode::NOT_FOUND,
        StatusKind::AlreadyExists | StatusKind::Aborted | StatusKind::VolumeInUse => {
            StatusCode::CONFLICT
        }
        StatusKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        StatusKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        StatusKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = Status::from(&self.0);
        (http_status(status.kind), Json(status)).into_response()
    }
}

impl From<CsiError> for ApiError {
    fn from(err: CsiError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CsiError::invalid_argument(format!(
            "malformed request body: {}",
            rejection.body_text()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(http_status(StatusKind::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(StatusKind::VolumeInUse), StatusCode::CONFLICT);
        assert_eq!(
            http_status(StatusKind::DeadlineExceeded),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_error_response_carries_kind() {
        let response = ApiError::from(CsiError::not_found("share pvc-1")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
