//! Uniform error body written by every rejecting stage.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ERROR_MISSING_TOKEN: &str = "Authentication required. Please provide a valid JWT token.";
pub const ERROR_INVALID_TOKEN_FORMAT: &str = "Invalid token format. Token must be a valid JWT.";
pub const ERROR_MISSING_ORIGIN_HEADERS: &str = "Missing required origin headers: Atradius-Origin-Service, Atradius-Origin-Application, Atradius-Origin-User";
pub const ERROR_ACCESS_DENIED: &str =
    "Access denied. You don't have the required permissions to access this resource.";
pub const ERROR_AUTHENTICATION_REQUIRED: &str =
    "Authentication required. Please provide valid credentials.";

/// `{ timestamp, status, error, message, path }`, serialized the same way
/// regardless of which stage produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, path)
    }

    pub fn unauthorized(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, path)
    }

    pub fn forbidden(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, path)
    }

    pub fn internal(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, path)
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            Json(self),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_follows_status() {
        assert_eq!(ErrorBody::bad_request("m", "/p").error, "Bad Request");
        assert_eq!(ErrorBody::unauthorized("m", "/p").error, "Unauthorized");
        assert_eq!(ErrorBody::forbidden("m", "/p").error, "Forbidden");
        assert_eq!(
            ErrorBody::internal("m", "/p").error,
            "Internal Server Error"
        );
    }

    #[test]
    fn serializes_fixed_shape() {
        let body = ErrorBody::unauthorized(ERROR_MISSING_TOKEN, "/api/orders");
        let json = serde_json::to_value(&body).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["error", "message", "path", "status", "timestamp"]);
        assert_eq!(obj["status"], 401);
        assert_eq!(obj["path"], "/api/orders");
        let ts = obj["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
    }

    #[test]
    fn response_carries_status_and_json_content_type() {
        let resp = ErrorBody::bad_request(ERROR_MISSING_ORIGIN_HEADERS, "/api").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
    }
}
