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

//! Error kinds shared across the platform.
//!
//! These are kinds, not concrete error types: each crate carries its own
//! `thiserror` enum and maps into a kind at the service boundary, where the
//! kind determines the HTTP status and the typed error code.

use serde::{Deserialize, Serialize};

/// Classification of a failure, stable across crate boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnsupportedMode,
    Unauthorized,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    Throttled,
    SnapshotNotReady,
    SnapshotShifted,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Typed error code emitted in the error envelope.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::UnsupportedMode => "UNSUPPORTED_MODE",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "TASK_NOT_FOUND",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::Throttled => "THROTTLED",
            ErrorKind::SnapshotNotReady => "SNAPSHOT_NOT_READY",
            ErrorKind::SnapshotShifted => "VALIDATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the kind surfaces as.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::UnsupportedMode => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::Throttled => 429,
            ErrorKind::SnapshotNotReady => 503,
            ErrorKind::SnapshotShifted => 409,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }
}

/// A kind plus a human-readable message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ModalithError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ModalithError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}
