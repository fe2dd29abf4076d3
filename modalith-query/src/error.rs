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

use modalith_core::ErrorKind;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("Snapshot not ready")]
    SnapshotNotReady,
    #[error("Snapshot changed since the page token was issued: {0}")]
    SnapshotShifted(String),
    #[error("{0}")]
    Timeout(String),
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot decode failed: {0}")]
    Decode(String),
    #[error("{0}")]
    Internal(String),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Validation(_) => ErrorKind::Validation,
            QueryError::UnsupportedMode(_) => ErrorKind::UnsupportedMode,
            QueryError::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            QueryError::SnapshotNotReady => ErrorKind::SnapshotNotReady,
            QueryError::SnapshotShifted(_) => ErrorKind::SnapshotShifted,
            QueryError::Timeout(_) => ErrorKind::Timeout,
            QueryError::Io(_) | QueryError::Decode(_) | QueryError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}
