//! 统一的错误类型：渲染通用错误页，不向客户端泄露内部细节。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use std::io::ErrorKind;
use tracing::error;

use crate::storage::StorageError;
use crate::views;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound,
    PayloadTooLarge,
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &str {
        match self {
            AppError::BadRequest(msg) => msg,
            AppError::NotFound => "The requested page or file does not exist.",
            AppError::PayloadTooLarge => "The uploaded file is too large.",
            AppError::RangeNotSatisfiable(_) => "Requested range not satisfiable.",
            AppError::Internal(_) => "Something went wrong. Please try again later.",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Internal(detail) = &self {
            error!(error = %detail, "request failed");
        }

        let mut headers = HeaderMap::new();
        if let AppError::RangeNotSatisfiable(size) = &self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            headers.insert(header::CONTENT_RANGE, value);
        }

        let message = self.public_message();
        match views::render_error(status, message) {
            Ok(page) => (status, headers, page).into_response(),
            Err(_) => (status, headers, Html(message.to_string())).into_response(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName => AppError::BadRequest("invalid file name".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => AppError::NotFound,
                _ => AppError::Internal(err.to_string()),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        AppError::Internal(format!("database error: {error}"))
    }
}

impl From<minijinja::Error> for AppError {
    fn from(error: minijinja::Error) -> Self {
        AppError::Internal(format!("template error: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn internal_error_hides_details() {
        let response = AppError::Internal("disk on fire at /var/secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let body = String::from_utf8_lossy(&body);
        assert!(!body.contains("/var/secret"));
        assert!(body.contains("Something went wrong"));
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let err = StorageError::Io(std::io::Error::from(ErrorKind::NotFound));
        assert!(matches!(AppError::from(err), AppError::NotFound));
    }

    #[test]
    fn range_error_carries_content_range() {
        let response = AppError::RangeNotSatisfiable(42).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */42"
        );
    }
}
