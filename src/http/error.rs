use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::engine::SchedulingError;
use crate::model::{ParseDayError, SlotError};

/// Error body `{"error": ..., "rule": ...}` with the matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    rule: &'static str,
    message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            rule: "validation",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn rule(&self) -> &'static str {
        self.rule
    }
}

impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        let rule = err.rule();
        if err.is_internal() {
            tracing::error!("internal error: {err}");
            return Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                rule,
                message: "internal server error".into(),
            };
        }
        let status = match err {
            SchedulingError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            rule,
            message: err.to_string(),
        }
    }
}

impl From<SlotError> for ApiError {
    fn from(err: SlotError) -> Self {
        SchedulingError::from(err).into()
    }
}

impl From<ParseDayError> for ApiError {
    fn from(err: ParseDayError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "rule": self.rule,
        }));
        (self.status, body).into_response()
    }
}
