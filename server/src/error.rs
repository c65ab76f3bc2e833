use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Envelope every endpoint answers with; failures travel in `code`, not the HTTP status
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub code: u16,
    pub msg: String,
}

impl ApiResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: 200,
            msg: msg.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Rejected path or malformed request; deliberately says nothing about which
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("file not found")]
    NotFound,

    #[error("delete failed")]
    DeleteFailed(#[source] std::io::Error),

    #[error("upload failed")]
    UploadFailed(String),

    #[error("internal error")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> u16 {
        match self {
            AppError::NotFound => 404,
            _ => 500,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::DeleteFailed(e) => warn!("delete failed: {e}"),
            AppError::UploadFailed(reason) => warn!("upload failed: {reason}"),
            AppError::Internal(reason) => warn!("internal error: {reason}"),
            AppError::InvalidParameter | AppError::NotFound => {}
        }

        Json(ApiResponse {
            code: self.code(),
            msg: self.to_string(),
        })
        .into_response()
    }
}
