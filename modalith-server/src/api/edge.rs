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

//! Edge gateway endpoints: upload with buffering fallback, buffer
//! inspection/replay/prune, and runtime config.

use std::collections::BTreeMap;

use axum::extract::{Multipart, State};
use axum::Json;
use modalith_core::ErrorKind;
use modalith_edge::{AdaptiveBatchPolicy, BackpressurePolicy, BufferItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{AppState, EdgeState};
use crate::error::ApiError;
use crate::object_store::ObjectStore as _;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub buffered: bool,
    pub bytes_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    pub modality: String,
    pub trace_id: String,
}

#[derive(Debug, Serialize)]
pub struct BufferStatusResponse {
    pub count: usize,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_age_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_age_s: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub buffer_max_bytes: u64,
    pub buffer_ttl_seconds: u64,
    pub batch_min: u32,
    pub batch_max: u32,
    pub low_watermark: u64,
    pub high_watermark: u64,
    pub batch_delay_min_ms: u64,
    pub batch_delay_max_ms: u64,
    pub backpressure_max_backlog: u64,
    pub backpressure_hard_limit: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub buffer_max_bytes: Option<u64>,
    pub buffer_ttl_seconds: Option<u64>,
    pub batch_min: Option<u32>,
    pub batch_max: Option<u32>,
    pub low_watermark: Option<u64>,
    pub high_watermark: Option<u64>,
    pub batch_delay_min_ms: Option<u64>,
    pub batch_delay_max_ms: Option<u64>,
    pub backpressure_max_backlog: Option<u64>,
    pub backpressure_hard_limit: Option<u64>,
}

struct UploadForm {
    payload: Vec<u8>,
    filename: String,
    content_type: Option<String>,
    modality: String,
    device_id: Option<String>,
    stream_id: Option<String>,
    site_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut payload: Option<Vec<u8>> = None;
    let mut filename = "payload.bin".to_string();
    let mut content_type = None;
    let mut modality = None;
    let mut device_id = None;
    let mut stream_id = None;
    let mut site_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::validation(format!("Malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if let Some(raw_name) = field.file_name() {
                    if !raw_name.is_empty() {
                        filename = raw_name.to_string();
                    }
                }
                content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::validation(format!("Unreadable upload: {err}")))?;
                payload = Some(bytes.to_vec());
            }
            "modality" => modality = field.text().await.ok(),
            "device_id" => device_id = field.text().await.ok().filter(|v| !v.is_empty()),
            "stream_id" => stream_id = field.text().await.ok().filter(|v| !v.is_empty()),
            "site_id" => site_id = field.text().await.ok().filter(|v| !v.is_empty()),
            _ => {}
        }
    }

    let payload = payload.ok_or_else(|| ApiError::validation("file field is required"))?;
    let modality = modality
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::validation("modality field is required"))?;
    Ok(UploadForm {
        payload,
        filename,
        content_type,
        modality: modality.trim().to_string(),
        device_id,
        stream_id,
        site_id,
    })
}

fn object_path(
    modality: &str,
    filename: &str,
    device_id: Option<&str>,
    stream_id: Option<&str>,
    site_id: Option<&str>,
) -> String {
    let slug = Uuid::new_v4().simple().to_string();
    let safe_name = filename.replace('/', "_");
    format!(
        "{modality}/{}/{}/{}/{}_{safe_name}",
        site_id.unwrap_or("site"),
        device_id.unwrap_or("unknown"),
        stream_id.unwrap_or("stream"),
        &slug[..8],
    )
}

fn store_payload(edge: &EdgeState, form_path: &str, payload: &[u8]) -> Result<String, String> {
    edge.object_store
        .put(form_path, payload)
        .map_err(|err| err.to_string())
}

fn buffer_metadata(form: &UploadForm) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("filename".to_string(), Value::String(form.filename.clone()));
    metadata.insert("modality".to_string(), Value::String(form.modality.clone()));
    if let Some(content_type) = &form.content_type {
        metadata.insert(
            "content_type".to_string(),
            Value::String(content_type.clone()),
        );
    }
    if let Some(device_id) = &form.device_id {
        metadata.insert("device_id".to_string(), Value::String(device_id.clone()));
    }
    if let Some(stream_id) = &form.stream_id {
        metadata.insert("stream_id".to_string(), Value::String(stream_id.clone()));
    }
    if let Some(site_id) = &form.site_id {
        metadata.insert("site_id".to_string(), Value::String(site_id.clone()));
    }
    metadata
}

/// POST /edge/upload
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let edge = &state.edge;
    let backlog = edge
        .buffer
        .stats()
        .map_err(|err| ApiError::internal(err.to_string()))?
        .count as u64;
    if !edge.backpressure.read().should_accept(backlog) {
        return Err(ApiError::new(
            ErrorKind::Throttled,
            "Gateway backpressure active",
        ));
    }

    let form = read_upload_form(multipart).await?;
    if form.payload.len() as u64 > edge.max_raw_bytes {
        return Err(ApiError::new(ErrorKind::PayloadTooLarge, "Payload too large"));
    }

    let trace_id = Uuid::new_v4().to_string();
    let dest_path = object_path(
        &form.modality,
        &form.filename,
        form.device_id.as_deref(),
        form.stream_id.as_deref(),
        form.site_id.as_deref(),
    );
    let store_result = if edge.force_buffer() {
        Err("forced buffering enabled".to_string())
    } else {
        store_payload(edge, &dest_path, &form.payload)
    };

    match store_result {
        Ok(uri) => {
            info!(
                uri = %uri,
                bytes_written = form.payload.len(),
                device_id = form.device_id.as_deref(),
                stream_id = form.stream_id.as_deref(),
                site_id = form.site_id.as_deref(),
                "edge upload stored"
            );
            Ok(Json(UploadResponse {
                status: "stored".into(),
                uri: Some(uri),
                buffered: false,
                bytes_written: form.payload.len() as u64,
                device_id: form.device_id,
                stream_id: form.stream_id,
                site_id: form.site_id,
                modality: form.modality,
                trace_id,
            }))
        }
        Err(reason) => {
            warn!(error = %reason, "edge upload buffering");
            let metadata = buffer_metadata(&form);
            edge.buffer
                .add(&form.payload, metadata)
                .map_err(|err| ApiError::internal(err.to_string()))?;
            Ok(Json(UploadResponse {
                status: "buffered".into(),
                uri: None,
                buffered: true,
                bytes_written: form.payload.len() as u64,
                device_id: form.device_id,
                stream_id: form.stream_id,
                site_id: form.site_id,
                modality: form.modality,
                trace_id,
            }))
        }
    }
}

fn replay_item(edge: &EdgeState, item: &BufferItem) -> bool {
    let payload = match item.read_bytes() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(item_id = %item.item_id, error = %err, "replay failed to read payload");
            return false;
        }
    };
    let get = |key: &str| {
        item.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let dest_path = object_path(
        get("modality").as_deref().unwrap_or("unknown"),
        get("filename").as_deref().unwrap_or("payload.bin"),
        get("device_id").as_deref(),
        get("stream_id").as_deref(),
        get("site_id").as_deref(),
    );
    match store_payload(edge, &dest_path, &payload) {
        Ok(_) => true,
        Err(err) => {
            warn!(item_id = %item.item_id, error = %err, "replay failed");
            false
        }
    }
}

/// GET /edge/buffer/status
pub async fn buffer_status(
    State(state): State<AppState>,
) -> Result<Json<BufferStatusResponse>, ApiError> {
    let stats = state
        .edge
        .buffer
        .stats()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(BufferStatusResponse {
        count: stats.count,
        total_bytes: stats.total_bytes,
        oldest_age_s: stats.oldest_age_s,
        newest_age_s: stats.newest_age_s,
    }))
}

/// POST /edge/buffer/replay
pub async fn buffer_replay(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let edge = state.edge.clone();
    let outcome = edge
        .buffer
        .replay(|item| replay_item(&edge, item))
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(serde_json::json!({
        "success": outcome.success,
        "failed": outcome.failed,
    })))
}

/// POST /edge/buffer/prune
pub async fn buffer_prune(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let buffer = &state.edge.buffer;
    let before = buffer
        .stats()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    buffer
        .prune()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let after = buffer
        .stats()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(serde_json::json!({
        "before": before.count,
        "after": after.count,
    })))
}

fn config_response(edge: &EdgeState) -> ConfigResponse {
    let batch = *edge.batch.read();
    let backpressure = *edge.backpressure.read();
    ConfigResponse {
        buffer_max_bytes: edge.buffer.max_bytes(),
        buffer_ttl_seconds: edge.buffer.ttl_seconds(),
        batch_min: batch.min_batch,
        batch_max: batch.max_batch,
        low_watermark: batch.low_watermark,
        high_watermark: batch.high_watermark,
        batch_delay_min_ms: batch.min_delay_ms,
        batch_delay_max_ms: batch.max_delay_ms,
        backpressure_max_backlog: backpressure.max_backlog,
        backpressure_hard_limit: backpressure.hard_limit,
    }
}

/// GET /edge/config
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(config_response(&state.edge))
}

/// POST /edge/config
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Json<ConfigResponse> {
    let edge = &state.edge;
    if let Some(max_bytes) = update.buffer_max_bytes {
        edge.buffer.set_max_bytes(max_bytes);
    }
    if let Some(ttl) = update.buffer_ttl_seconds {
        edge.buffer.set_ttl_seconds(ttl);
    }
    {
        let mut batch = edge.batch.write();
        *batch = AdaptiveBatchPolicy {
            min_batch: update.batch_min.unwrap_or(batch.min_batch),
            max_batch: update.batch_max.unwrap_or(batch.max_batch),
            low_watermark: update.low_watermark.unwrap_or(batch.low_watermark),
            high_watermark: update.high_watermark.unwrap_or(batch.high_watermark),
            min_delay_ms: update.batch_delay_min_ms.unwrap_or(batch.min_delay_ms),
            max_delay_ms: update.batch_delay_max_ms.unwrap_or(batch.max_delay_ms),
        };
    }
    {
        let mut backpressure = edge.backpressure.write();
        *backpressure = BackpressurePolicy {
            max_backlog: update
                .backpressure_max_backlog
                .unwrap_or(backpressure.max_backlog),
            hard_limit: update
                .backpressure_hard_limit
                .unwrap_or(backpressure.hard_limit),
        };
    }
    Json(config_response(edge))
}
