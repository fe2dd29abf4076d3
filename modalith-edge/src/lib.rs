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

//! Modalith Edge
//!
//! Durable upload spool for the edge gateway plus the pure batch-sizing and
//! admission policies. The filesystem is the synchronization point: every
//! state transition is a write-to-temp plus rename on the same filesystem.

pub mod buffer;
pub mod policies;

pub use buffer::{BufferItem, BufferStats, EdgeBuffer, EdgeBufferError, ReplayOutcome};
pub use policies::{AdaptiveBatchPolicy, BackpressurePolicy};
