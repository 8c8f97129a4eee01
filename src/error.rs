use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::forest::ForestError;
use crate::layout::SchemaMismatch;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model encoding error: {0}")]
    ModelEncoding(#[from] bincode::Error),

    #[error("Dataset error: {0}")]
    Dataset(#[from] csv::Error),

    #[error("Public suffix list error: {0}")]
    SuffixList(String),

    #[error("model not loaded")]
    ModelUnavailable,

    #[error("metrics exporter not installed")]
    MetricsUnavailable,

    #[error("{0}")]
    SchemaMismatch(#[from] SchemaMismatch),

    #[error("Training error: {0}")]
    Training(#[from] ForestError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::ModelUnavailable | AppError::MetricsUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            _ => {
                tracing::error!("Internal server error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub fn validation_error(msg: &str) -> AppError {
    AppError::InvalidInput(msg.to_string())
}

pub fn internal_error(msg: &str) -> AppError {
    AppError::Internal(msg.to_string())
}
