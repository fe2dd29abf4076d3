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

//! POST /ingest — CloudEvent acceptance for the ingestion side.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use modalith_core::entities::rbac::ACTION_INGEST;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::enforce_access;
use crate::error::ApiError;
use crate::metering::UsageRecord;

#[derive(Debug, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub specversion: String,
    #[serde(default)]
    pub data: Option<Value>,
}

fn data_is_empty(data: &Option<Value>) -> bool {
    match data {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Accepts a CloudEvent-shaped envelope and acknowledges with 202.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<CloudEvent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let context = state.authenticator.resolve(&headers, &state.stores).await?;
    enforce_access(ACTION_INGEST, context.as_ref(), &state.stores, &state.access)?;

    if data_is_empty(&event.data) {
        return Err(ApiError::validation("CloudEvent data must not be empty"));
    }

    let trace_id = Uuid::new_v4().to_string();
    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        event_source = %event.source,
        specversion = %event.specversion,
        trace_id = %trace_id,
        "ingest event accepted"
    );
    if state.usage.enabled() {
        state.usage.record_usage(UsageRecord {
            event_type: "ingest".to_string(),
            scope: context.as_ref().and_then(|ctx| ctx.scope.clone()),
            credential_id: context.as_ref().map(|ctx| ctx.credential_id.clone()),
            modality: event.event_type.clone(),
            units: 1,
            bytes_in: None,
            pipeline_version: state.config.version.clone(),
            schema_version: "1".to_string(),
            recorded_at: chrono::Utc::now(),
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "trace_id": trace_id,
        })),
    ))
}
