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

//! HTTP handlers and shared application state.

pub mod edge;
pub mod health;
pub mod ingest;
pub mod query;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use modalith_edge::{AdaptiveBatchPolicy, BackpressurePolicy, EdgeBuffer};
use modalith_query::{
    EmbedderSet, QueryServiceConfig, Reranker, SnapshotSlot, TokenOverlapReranker,
};
use modalith_store::{build_store_bundle, ControlPlaneConfig, StoreBundle};
use parking_lot::RwLock;
use tracing::warn;

use crate::auth::{AccessPolicy, Authenticator};
use crate::config::ServerConfig;
use crate::metering::UsageSink;
use crate::object_store::{FsObjectStore, ObjectStore};

/// Edge gateway runtime state: the spool plus its mutable policies.
pub struct EdgeState {
    pub buffer: EdgeBuffer,
    pub batch: RwLock<AdaptiveBatchPolicy>,
    pub backpressure: RwLock<BackpressurePolicy>,
    pub object_store: Arc<dyn ObjectStore>,
    pub max_raw_bytes: u64,
    force_buffer: AtomicBool,
}

impl EdgeState {
    pub fn force_buffer(&self) -> bool {
        self.force_buffer.load(Ordering::Relaxed)
    }

    pub fn set_force_buffer(&self, value: bool) {
        self.force_buffer.store(value, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub query_config: Arc<QueryServiceConfig>,
    pub access: Arc<AccessPolicy>,
    pub authenticator: Arc<Authenticator>,
    pub snapshot: Arc<SnapshotSlot>,
    pub embedders: Arc<EmbedderSet>,
    pub reranker: Arc<dyn Reranker>,
    pub stores: StoreBundle,
    pub edge: Arc<EdgeState>,
    pub usage: Arc<UsageSink>,
}

impl AppState {
    pub fn build(config: ServerConfig, query_config: QueryServiceConfig) -> Result<Self> {
        let object_store: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::new(config.edge.raw_root.clone()));
        Self::build_with_object_store(config, query_config, object_store)
    }

    pub fn build_with_object_store(
        config: ServerConfig,
        query_config: QueryServiceConfig,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        crate::error::set_typed_errors(query_config.search_typed_errors_enabled);

        let control_plane = ControlPlaneConfig::from_env();
        let stores = build_store_bundle(&config.graph_root, &control_plane, None)?;

        let buffer = EdgeBuffer::open(
            &config.edge.buffer_dir,
            config.edge.buffer_max_bytes,
            config.edge.buffer_ttl_seconds,
        )?;
        let edge = Arc::new(EdgeState {
            buffer,
            batch: RwLock::new(config.edge.batch),
            backpressure: RwLock::new(config.edge.backpressure),
            object_store,
            max_raw_bytes: config.edge.max_raw_bytes,
            force_buffer: AtomicBool::new(config.edge.force_buffer),
        });

        let reranker: Arc<dyn Reranker> = match query_config.rerank_backend.as_str() {
            "stub" => Arc::new(TokenOverlapReranker),
            other => {
                warn!(
                    backend = other,
                    "rerank backend not wired in this build; using the stub scorer"
                );
                Arc::new(TokenOverlapReranker)
            }
        };

        let usage = Arc::new(UsageSink::new(&config.graph_root, config.metering_enabled));
        let access = Arc::new(AccessPolicy::from(&config));
        let authenticator = Arc::new(Authenticator::from_config(&config));
        let snapshot = Arc::new(SnapshotSlot::new(config.snapshot_cache_dir.clone()));

        Ok(Self {
            config: Arc::new(config),
            query_config: Arc::new(query_config),
            access,
            authenticator,
            snapshot,
            embedders: Arc::new(EmbedderSet::deterministic()),
            reranker,
            stores,
            edge,
            usage,
        })
    }
}
