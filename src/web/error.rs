use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::services::email_service::EmailError;
use crate::services::PaymentError;
use crate::utils::extract_clean_error;

const SERVER_ERROR: &str = "Server error, please try again later";

/// Error response rendered as `{success: false, error}`
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

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound(msg) => ApiError::not_found(msg),
            PaymentError::Validation(msg) | PaymentError::InvalidState(msg) => ApiError::bad_request(msg),
            e @ PaymentError::NoWallet(_) => ApiError::bad_request(e.to_string()),
            PaymentError::Email(e) => {
                error!("Email error: {}", e);
                match e {
                    EmailError::NotConfigured => ApiError::internal("Email is not configured"),
                    _ => ApiError::internal("Failed to send email"),
                }
            }
            PaymentError::Rates(e) => {
                error!("Exchange rate error: {}", e);
                ApiError::internal("Exchange rates unavailable")
            }
            PaymentError::Database(e) => {
                error!("Database error: {}", extract_clean_error(&e.to_string()));
                ApiError::internal(SERVER_ERROR)
            }
            other => {
                error!("Request failed: {}", other);
                ApiError::internal(SERVER_ERROR)
            }
        }
    }
}

/// Extractor rejections are 400s, except an oversized body keeps its 413
fn rejection(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError {
            status,
            message: "Request body too large".to_string(),
        }
    } else {
        ApiError::bad_request(message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        rejection(err.status(), format!("Invalid JSON body: {}", err.body_text()))
    }
}

impl From<FormRejection> for ApiError {
    fn from(err: FormRejection) -> Self {
        rejection(err.status(), format!("Invalid form data: {}", err.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(err: QueryRejection) -> Self {
        rejection(err.status(), format!("Invalid query: {}", err.body_text()))
    }
}
