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

//! Modalith Store
//!
//! Control-plane persistence: one trait per store kind, a filesystem-JSON
//! backend, a document-DB backend behind a small driver seam, and a
//! dual-store façade that arbitrates reads (primary / fallback) and writes
//! (single / dual) between two backends.

pub mod config;
pub mod docdb;
pub mod dual;
pub mod error;
pub mod interfaces;
pub mod json;
pub mod registry;

pub use config::{ControlPlaneConfig, ReadMode, StoreBackend, WriteMode};
pub use docdb::{DocDbControlStore, DocumentDriver, MemoryDriver, WriteOp, MAX_BATCH_OPS};
pub use dual::DualPolicy;
pub use error::{Result, StoreError};
pub use interfaces::{
    AbacStore, ApiKeyStore, ChaosStore, ConnectorStore, DataFactoryStore, FleetStore,
    PrivacyStore, RbacStore, StoreBundle, WorkflowStore,
};
pub use json::JsonControlStore;
pub use registry::build_store_bundle;
