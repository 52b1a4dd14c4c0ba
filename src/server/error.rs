use crate::media::MediaError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

pub const INVALID_URL: &str = "Invalid YouTube URL";
pub const INFO_FAILED: &str = "Failed to fetch video information";
pub const INVALID_PARAMETERS: &str = "Invalid parameters";
pub const FORMAT_NOT_FOUND: &str = "Requested format not found";
pub const DOWNLOAD_FAILED: &str = "Error during download process";

/// Client-facing error, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Maps a pipeline failure onto a status, logging the details and keeping
    /// `generic` as the only thing the client sees for server-side failures.
    pub fn from_media(err: MediaError, invalid: &str, generic: &str) -> Self {
        match err {
            MediaError::InvalidSource(_) => Self::bad_request(invalid),
            MediaError::VariantNotFound(_) => Self::not_found(FORMAT_NOT_FOUND),
            MediaError::UpstreamFailure(_)
            | MediaError::StreamUnavailable(_)
            | MediaError::RemuxFailure(_) => {
                error!("{}: {}", generic, err);
                Self::internal(generic)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[tokio::test]
    async fn test_api_error_serializes_json() {
        let response = ApiError::not_found("missing").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "missing");
    }

    #[test]
    fn test_from_media() {
        let err = ApiError::from_media(
            MediaError::InvalidSource("x".into()),
            INVALID_URL,
            INFO_FAILED,
        );
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, INVALID_URL);

        let err = ApiError::from_media(
            MediaError::RemuxFailure("ffmpeg exited with 1".into()),
            INVALID_PARAMETERS,
            DOWNLOAD_FAILED,
        );
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, DOWNLOAD_FAILED);

        let err = ApiError::from_media(
            MediaError::VariantNotFound("1".into()),
            INVALID_PARAMETERS,
            DOWNLOAD_FAILED,
        );
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, FORMAT_NOT_FOUND);
    }
}
