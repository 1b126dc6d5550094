use arbiter_contracts::{ErrorBody, ErrorResponse};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// Request-scoped failure carrying one of the stable error codes. Denied or
/// gated events are not errors; they return plans with a reason code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn schema_invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "request.schema_invalid",
            message: message.into(),
            details: None,
        }
    }

    pub fn payload_mismatch(existing_hash: &str, incoming_hash: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict.payload_mismatch",
            message: "idempotency key is reused with a different payload".to_string(),
            details: Some(json!({
                "existing_hash": existing_hash,
                "incoming_hash": incoming_hash,
            })),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict.invalid_transition",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn provider_not_allowed(provider: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "policy.provider_not_allowed",
            message: format!("provider `{provider}` is not allowed by governance policy"),
            details: None,
        }
    }

    pub fn action_type_not_allowed(action_type: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "policy.action_type_not_allowed",
            message: format!("action type `{action_type}` is outside the governed universe"),
            details: None,
        }
    }

    pub fn audit_write_failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal.audit_write_failed",
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: message.into(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_mismatch_carries_both_hashes() {
        let err = ApiError::payload_mismatch("aaa", "bbb");
        assert_eq!(err.status, StatusCode::CONFLICT);
        let details = err.details.unwrap();
        assert_eq!(details["existing_hash"], "aaa");
        assert_eq!(details["incoming_hash"], "bbb");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::schema_invalid("x").code, "request.schema_invalid");
        assert_eq!(
            ApiError::invalid_transition("x").code,
            "conflict.invalid_transition"
        );
        assert_eq!(ApiError::not_found("x").code, "not_found");
        assert_eq!(
            ApiError::audit_write_failed("x").code,
            "internal.audit_write_failed"
        );
    }
}
