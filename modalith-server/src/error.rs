// Copyright 2025 Modalith (https://github.com/modalith)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! API error type and the typed error envelope.
//!
//! With typed errors enabled (the default) failures surface as
//! `{"error": {"code", "message", "details"}}`; disabled, the legacy
//! `{"detail": ...}` body is kept for older clients.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modalith_core::{ErrorKind, ModalithError};
use modalith_query::QueryError;
use modalith_store::StoreError;
use serde_json::{json, Value};

static TYPED_ERRORS: AtomicBool = AtomicBool::new(true);

/// Set once at startup from `SEARCH_TYPED_ERRORS_ENABLED`.
pub fn set_typed_errors(enabled: bool) {
    TYPED_ERRORS.store(enabled, Ordering::Relaxed);
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Vec<Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "Forbidden")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let kind = err.kind();
        let message = match kind {
            // Internal messages never leak to clients.
            ErrorKind::Internal => "Internal error".to_string(),
            _ => err.to_string(),
        };
        Self::new(kind, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => Self::validation(message),
            StoreError::NotFound(message) => Self::new(ErrorKind::NotFound, message),
            other => {
                tracing::error!(error = %other, "control-plane store failure");
                Self::internal("Internal error")
            }
        }
    }
}

impl From<ModalithError> for ApiError {
    fn from(err: ModalithError) -> Self {
        Self::new(err.kind, err.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = if TYPED_ERRORS.load(Ordering::Relaxed) {
            json!({
                "error": {
                    "code": self.kind.code(),
                    "message": self.message,
                    "details": self.details,
                }
            })
        } else {
            json!({ "detail": self.message })
        };
        (status, Json(body)).into_response()
    }
}
