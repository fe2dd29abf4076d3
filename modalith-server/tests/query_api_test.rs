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

//! Service-level query API tests.

mod common;

use common::*;
use modalith_server::auth::hash_api_key;
use modalith_store::ApiKeyStore as _;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn health_reports_service_identity() {
    let root = TempDir::new().unwrap();
    let (app, _) = app_with_state(test_server_config(&root));
    let (status, body) = send_json(&app, "GET", "/health", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "modalith-query");
}

#[tokio::test]
async fn vector_text_query_returns_scored_document() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    write_snapshot(&config, &doc_snapshot(&[("doc-1", "hello world")]));
    let (app, _) = app_with_state(config);

    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello", "top_k": 5})),
        &[],
    )
    .await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["modality"], "document");
    assert_eq!(results[0]["primary_evidence_id"], "doc-1");
    assert!(results[0]["score"].as_f64().unwrap() >= 0.5);
    assert_eq!(results[0]["why"][0]["source"], "vector");
    assert_eq!(body["meta"]["fusion_method"], "weighted_rrf");
    assert!(body["meta"]["snapshot_marker"].as_str().is_some());
}

fn four_doc_snapshot() -> modalith_query::SnapshotTables {
    doc_snapshot(&[
        ("doc-1", "alpha"),
        ("doc-2", "alpha beta"),
        ("doc-3", "alpha beta gamma"),
        ("doc-4", "alpha beta gamma delta"),
    ])
}

#[tokio::test]
async fn pagination_is_deterministic_and_resumable() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    write_snapshot(&config, &four_doc_snapshot());
    let (app, _) = app_with_state(config);

    let payload = json!({"query_text": "alpha", "top_k": 10, "page_limit": 2});
    let ids = |body: &serde_json::Value| -> Vec<String> {
        body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|hit| hit["primary_evidence_id"].as_str().unwrap().to_string())
            .collect()
    };

    let (status, first) = send_json(&app, "POST", "/query", Some(payload.clone()), &[]).await;
    assert_eq!(status, 200);
    assert_eq!(ids(&first), vec!["doc-1", "doc-2"]);
    let token = first["next_page_token"].as_str().unwrap().to_string();

    let (_, repeat) = send_json(&app, "POST", "/query", Some(payload.clone()), &[]).await;
    assert_eq!(ids(&repeat), ids(&first));
    assert_eq!(repeat["next_page_token"].as_str().unwrap(), token);

    let mut follow = payload.clone();
    follow["page_token"] = json!(token);
    let (status, second) = send_json(&app, "POST", "/query", Some(follow), &[]).await;
    assert_eq!(status, 200);
    assert_eq!(ids(&second), vec!["doc-3", "doc-4"]);

    // A token minted for this query is rejected under a different one.
    let (status, mismatch) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({
            "query_text": "different",
            "top_k": 10,
            "page_limit": 2,
            "page_token": token,
        })),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(mismatch["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_fields_and_modes_are_typed_errors() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    write_snapshot(&config, &doc_snapshot(&[("doc-1", "hello")]));
    let (app, _) = app_with_state(config);

    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello", "unknown_field": 1})),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello", "mode": "bogus"})),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "UNSUPPORTED_MODE");

    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello", "mode": "text", "modalities": ["image"]})),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn missing_snapshot_returns_not_ready() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    // No snapshot file written.
    let (app, _) = app_with_state(config);
    let (status, _) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": "hello"})),
        &[],
    )
    .await;
    assert_eq!(status, 503);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let root = TempDir::new().unwrap();
    let (app, _) = app_with_state(test_server_config(&root));
    use tower::ServiceExt;
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("GET")
                .uri("/health")
                .header("x-correlation-id", "corr-42")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "corr-42"
    );
}

#[tokio::test]
async fn grouping_shapes_video_results() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    // Two chunks share one asset by reusing its id prefix; build directly.
    let mut tables = four_doc_snapshot();
    for chunk in tables.doc_chunks.iter_mut().take(3) {
        chunk.media_asset_id = "asset-doc-1".to_string();
    }
    write_snapshot(&config, &tables);
    let (app, _) = app_with_state(config);

    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({
            "query_text": "alpha",
            "top_k": 20,
            "group_by": "video",
            "sort_by": "clip_count",
            "page_limit": 1,
        })),
        &[],
    )
    .await;
    assert_eq!(status, 200);
    let grouping = &body["grouping"];
    assert_eq!(grouping["total_videos"], 2);
    assert_eq!(grouping["total_moments"], 4);
    assert_eq!(grouping["videos"].as_array().unwrap().len(), 1);
    assert_eq!(grouping["videos"][0]["clip_count"], 3);
    assert!(body["next_page_token"].as_str().is_some());
}

#[tokio::test]
async fn reload_requires_admin_credential() {
    let root = TempDir::new().unwrap();
    let mut config = test_server_config(&root);
    config.query_api_key = Some("operator-secret".to_string());
    write_snapshot(&config, &doc_snapshot(&[("doc-1", "hello")]));
    let (app, state) = app_with_state(config);

    // A plain stored key is not admin.
    let record = modalith_core::entities::ApiKeyRecord::new(
        "reader-key",
        hash_api_key("", "reader-raw-key"),
    );
    state.stores.api_keys.register_api_key(record).unwrap();

    let (status, _) = send_json(
        &app,
        "POST",
        "/admin/reload-snapshot",
        None,
        &[("x-api-key", "reader-raw-key")],
    )
    .await;
    assert_eq!(status, 403);

    let (status, body) = send_json(
        &app,
        "POST",
        "/admin/reload-snapshot",
        None,
        &[("x-api-key", "operator-secret")],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let root = TempDir::new().unwrap();
    let config = test_server_config(&root);
    write_snapshot(&config, &doc_snapshot(&[("doc-1", "hello")]));
    let state = modalith_server::api::AppState::build(config, {
        let mut qc = modalith_query::QueryServiceConfig::default();
        qc.max_query_bytes = 64;
        qc
    })
    .unwrap();
    let app = modalith_server::build_router(state);

    let big_text = "x".repeat(256);
    let (status, body) = send_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query_text": big_text})),
        &[],
    )
    .await;
    assert_eq!(status, 413);
    assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
}
