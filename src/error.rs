// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::providers::ProviderError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingConfig(_) => Self::service_unavailable(err.to_string()),
            ProviderError::Rejected { status, body } => {
                let message = provider_message(&body);
                match StatusCode::from_u16(status) {
                    Ok(code) if code.is_client_error() => Self::new(code, message),
                    _ => Self::bad_gateway(message),
                }
            }
            ProviderError::Request(_) | ProviderError::InvalidResponse(_) => {
                warn!(error = %err, "Token endpoint unavailable");
                Self::bad_gateway(err.to_string())
            }
        }
    }
}

// Prefer the provider's human-readable description, then its error code.
fn provider_message(body: &Value) -> String {
    body.get("error_description")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("token request rejected")
        .to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::json;

    #[test]
    fn constructors_set_status_and_message() {
        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.message, "bad");

        let down = ApiError::service_unavailable("down");
        assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);

        let gw = ApiError::bad_gateway("upstream");
        assert_eq!(gw.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn provider_rejections_keep_client_status() {
        let err: ApiError = ProviderError::Rejected {
            status: 400,
            body: json!({"error": "invalid_grant", "error_description": "Bad Request"}),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Bad Request");

        let err: ApiError = ProviderError::Rejected {
            status: 503,
            body: json!({"error": "backend_error"}),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.message, "backend_error");
    }

    #[test]
    fn missing_config_is_unavailable() {
        let err: ApiError = ProviderError::MissingConfig("GOOGLE_CLIENT_ID").into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }
}
