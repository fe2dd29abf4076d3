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

//! Modalith Query
//!
//! The query core: snapshot loading and the columnar snapshot reader,
//! embedder adaptors with a process-local cache, per-modality candidate
//! generators, weighted reciprocal-rank fusion, the cross-encoder rerank
//! gate, and output shaping (redaction, grouping, cursor pagination).

pub mod candidates;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod rerank;
pub mod routing;
pub mod shape;
pub mod snapshot;

pub use config::QueryServiceConfig;
pub use embed::{EmbedderSet, HashImageEmbedder, HashTextEmbedder, ImageEmbedder, TextEmbedder};
pub use engine::{resolve_modalities, resolve_search_type, run_query, validate_query, TraceMap};
pub use error::{QueryError, Result};
pub use fusion::{fuse, FusionConfig, SourceList};
pub use rerank::{Reranker, RerankStatus, TokenOverlapReranker};
pub use shape::{build_query_response, query_fingerprint, PageToken};
pub use snapshot::{
    AudioClip, DocChunk, ImageFrame, MediaAsset, Snapshot, SnapshotDescriptor, SnapshotSlot,
    SnapshotTables, Transcript,
};
