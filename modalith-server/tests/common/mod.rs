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

//! Shared fixtures for the service-level tests.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use modalith_edge::{AdaptiveBatchPolicy, BackpressurePolicy};
use modalith_query::embed::TEXT_DIMENSION;
use modalith_query::{
    DocChunk, HashTextEmbedder, MediaAsset, QueryServiceConfig, SnapshotTables, TextEmbedder,
};
use modalith_server::api::AppState;
use modalith_server::build_router;
use modalith_server::config::{EdgeGatewayConfig, ServerConfig};
use modalith_server::object_store::ObjectStore;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Server config rooted in temp directories, dev-mode auth.
pub fn test_server_config(root: &TempDir) -> ServerConfig {
    let graph_root = root.path().join("graph");
    std::fs::create_dir_all(&graph_root).unwrap();
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        env: "test".to_string(),
        version: "test".to_string(),
        commit: "deadbeef".to_string(),
        snapshot_uri: graph_root
            .join("snapshots/modalith.db")
            .display()
            .to_string(),
        healthcheck_path: graph_root.join("healthcheck.db"),
        snapshot_cache_dir: root.path().join("snapshot-cache"),
        query_api_key: None,
        api_key_salt: String::new(),
        rbac_enforce: false,
        rbac_default_role: "reader".to_string(),
        abac_enforce: false,
        abac_default_allow: true,
        metering_enabled: false,
        cors_origins: vec![],
        edge: EdgeGatewayConfig {
            buffer_dir: root.path().join("edge-buffer"),
            buffer_max_bytes: 64 * 1024 * 1024,
            buffer_ttl_seconds: 3600,
            batch: AdaptiveBatchPolicy::default(),
            backpressure: BackpressurePolicy::default(),
            raw_root: root.path().join("raw"),
            max_raw_bytes: 1024 * 1024,
            force_buffer: false,
        },
        graph_root,
    }
}

/// Snapshot with one document chunk per `(id, content)` pair, vectors from
/// the production embedder family.
pub fn doc_snapshot(docs: &[(&str, &str)]) -> SnapshotTables {
    let text = HashTextEmbedder::new("text", TEXT_DIMENSION);
    SnapshotTables {
        media_assets: docs
            .iter()
            .map(|(id, _)| MediaAsset {
                id: format!("asset-{id}"),
                uri: format!("mm://docs/{id}.pdf"),
                media_type: "application/pdf".to_string(),
                org_id: None,
                site_id: None,
                stream_id: None,
            })
            .collect(),
        doc_chunks: docs
            .iter()
            .map(|(id, content)| DocChunk {
                id: id.to_string(),
                media_asset_id: format!("asset-{id}"),
                content: content.to_string(),
                text_vector: text.encode(content),
            })
            .collect(),
        transcripts: vec![],
        image_frames: vec![],
        audio_clips: vec![],
    }
}

pub fn write_snapshot(config: &ServerConfig, tables: &SnapshotTables) {
    tables.write_to(Path::new(&config.snapshot_uri)).unwrap();
}

pub fn app_with_state(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::build(config, QueryServiceConfig::default()).unwrap();
    (build_router(state.clone()), state)
}

pub fn app_with_object_store(
    config: ServerConfig,
    object_store: Arc<dyn ObjectStore>,
) -> (Router, AppState) {
    let state = AppState::build_with_object_store(
        config,
        QueryServiceConfig::default(),
        object_store,
    )
    .unwrap();
    (build_router(state.clone()), state)
}

pub async fn send_json(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (u16, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    parse_response(response).await
}

pub async fn parse_response(response: Response<Body>) -> (u16, Value) {
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Minimal multipart encoder for the upload endpoint.
pub fn multipart_upload(
    boundary: &str,
    payload: &[u8],
    filename: &str,
    modality: &str,
    extra: &[(&str, &str)],
) -> Vec<u8> {
    fn push(body: &mut Vec<u8>, text: &str) {
        body.extend_from_slice(text.as_bytes());
    }
    let mut body = Vec::new();
    push(&mut body, &format!("--{boundary}\r\n"));
    push(
        &mut body,
        &format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"),
    );
    push(&mut body, "Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(payload);
    push(&mut body, "\r\n");
    push(&mut body, &format!("--{boundary}\r\n"));
    push(
        &mut body,
        "Content-Disposition: form-data; name=\"modality\"\r\n\r\n",
    );
    push(&mut body, modality);
    push(&mut body, "\r\n");
    for (name, value) in extra {
        push(&mut body, &format!("--{boundary}\r\n"));
        push(
            &mut body,
            &format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"),
        );
        push(&mut body, value);
        push(&mut body, "\r\n");
    }
    push(&mut body, &format!("--{boundary}--\r\n"));
    body
}
