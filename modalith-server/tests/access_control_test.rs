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

//! RBAC/ABAC enforcement across the ingest and query endpoints.

mod common;

use common::*;
use modalith_core::entities::{ApiKeyRecord, RoleBindings};
use modalith_server::auth::hash_api_key;
use modalith_store::{ApiKeyStore as _, RbacStore as _};
use serde_json::json;
use tempfile::TempDir;

fn cloud_event() -> serde_json::Value {
    json!({
        "id": "evt-1",
        "type": "media.uploaded",
        "source": "edge-gateway",
        "specversion": "1.0",
        "data": {"uri": "mm://raw/clip.wav"},
    })
}

#[tokio::test]
async fn reader_key_can_query_but_not_ingest() {
    let root = TempDir::new().unwrap();
    let mut config = test_server_config(&root);
    config.rbac_enforce = true;
    write_snapshot(&config, &doc_snapshot(&[("doc-1", "hello world")]));
    let (app, state) = app_with_state(config);

    let record = state
        .stores
        .api_keys
        .register_api_key(ApiKeyRecord::new("reader", hash_api_key("", "reader-key")))
        .unwrap();
    let mut bindings = RoleBindings::new();
    bindings.insert(record.id.clone(), vec!["reader".to_string()]);
    state.stores.rbac.save_role_bindings(&bindings).unwrap();

    let (status, body) = send_json(
        &app,
        "POST",
        "/ingest",
        Some(cloud_event()),
        &[("x-api-key", "reader-key")],
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello"})),
        &[("x-api-key", "reader-key")],
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn writer_binding_allows_ingest() {
    let root = TempDir::new().unwrap();
    let mut config = test_server_config(&root);
    config.rbac_enforce = true;
    let (app, state) = app_with_state(config);

    let record = state
        .stores
        .api_keys
        .register_api_key(ApiKeyRecord::new("writer", hash_api_key("", "writer-key")))
        .unwrap();
    let mut bindings = RoleBindings::new();
    bindings.insert(record.id.clone(), vec!["writer".to_string()]);
    state.stores.rbac.save_role_bindings(&bindings).unwrap();

    let (status, body) = send_json(
        &app,
        "POST",
        "/ingest",
        Some(cloud_event()),
        &[("x-api-key", "writer-key")],
    )
    .await;
    assert_eq!(status, 202);
    assert_eq!(body["status"], "accepted");
    assert!(body["trace_id"].as_str().is_some());
}

#[tokio::test]
async fn empty_cloud_event_data_is_rejected() {
    let root = TempDir::new().unwrap();
    let (app, _) = app_with_state(test_server_config(&root));

    let mut event = cloud_event();
    event["data"] = json!({});
    let (status, body) = send_json(&app, "POST", "/ingest", Some(event), &[]).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn invalid_api_key_is_unauthorized() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    write_snapshot(&config, &doc_snapshot(&[("doc-1", "hello")]));
    let (app, _) = app_with_state(config);

    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello"})),
        &[("x-api-key", "who-dis")],
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}
