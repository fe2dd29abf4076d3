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

//! Modalith Core
//!
//! Shared types for the retrieval platform: tenant scope, auth context,
//! query request/result records, and the control-plane entity records
//! persisted by the store backends.

pub mod auth;
pub mod entities;
pub mod error;
pub mod query;
pub mod scope;

pub use auth::{ActorType, AuthContext};
pub use error::{ErrorKind, ModalithError};
pub use query::{
    EvidenceRef, GroupedVideo, Grouping, Modality, QueryHit, QueryMode, QueryRequest,
    QueryResponse, QueryResult, ResponseMeta, SearchType, WhyEntry, MAX_TOP_K,
};
pub use scope::TenantScope;
