
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::dag::{CompileError, ExecError};

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecError),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Compile(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_detail = match self {
            AppError::Compile(err) => {
                let offending = err.offending_id().to_string();
                let detail = ErrorDetail::new("COMPILE_ERROR", err.to_string());
                if offending.is_empty() {
                    detail
                } else {
                    detail.with_details(format!("offending id: {}", offending))
                }
            }
            AppError::Execution(err) => ErrorDetail::new("EXECUTION_ERROR", err.to_string())
                .with_details(format!("node: {}", err.node_id())),
            AppError::Timeout(msg) => {
                let enhanced_msg = format!(
                    "{} Consider raising PIPELINE_TIMEOUT_SECS or reducing the scan data size.",
                    msg
                );
                ErrorDetail::new("TIMEOUT", enhanced_msg)
            }
            AppError::Validation(msg) => ErrorDetail::new("VALIDATION_ERROR", msg),
            AppError::NotFound(msg) => ErrorDetail::new("NOT_FOUND", msg),
            AppError::Internal(msg) => ErrorDetail::new("INTERNAL_ERROR", msg),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let compile = AppError::from(CompileError::Cycle {
            node_id: "combine_g".to_string(),
        });
        assert_eq!(compile.into_response().status(), StatusCode::BAD_REQUEST);

        let exec = AppError::from(ExecError::MissingScanData {
            node_id: "a".to_string(),
        });
        assert_eq!(exec.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let timeout = AppError::Timeout("Pipeline exceeded 1s".to_string());
        assert_eq!(timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);

        let missing = AppError::NotFound("Scan not found".to_string());
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_anyhow_maps_to_internal() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AppError::Internal(ref msg) if msg == "boom"));
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(detail.details.is_none());
    }
}
