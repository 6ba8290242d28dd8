// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.
//!
//! Every error renders as `{"error": <code>, "detail": <message>}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowgate_core::Error;
use flowgate_core::git_store::GitStoreError;
use serde_json::json;
use tracing::error;

use crate::billing::SignatureError;

/// Error returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Service error.
    #[error(transparent)]
    Core(#[from] Error),

    /// Malformed request outside the services' validation.
    #[error("{0}")]
    BadRequest(String),

    /// Webhook signature rejected.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl ApiError {
    /// HTTP status and error code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Signature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
            Self::Core(e) => {
                let status = match e {
                    Error::NotFound { .. } => StatusCode::NOT_FOUND,
                    Error::Validation(_) => StatusCode::BAD_REQUEST,
                    Error::Conflict(_) => StatusCode::CONFLICT,
                    Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    Error::Provider(p) if p.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                    Error::Provider(_) => StatusCode::BAD_GATEWAY,
                    Error::GitStore(GitStoreError::Unreachable(_)) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    Error::GitStore(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.error_code())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, code, "Request failed");
        }
        let body = Json(json!({
            "error": code,
            "detail": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;
