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

//! POST /query and POST /admin/reload-snapshot.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use modalith_core::entities::rbac::ACTION_QUERY;
use modalith_core::{ErrorKind, QueryRequest, QueryResponse, SearchType};
use modalith_query::shape::apply_privacy_redaction;
use modalith_query::{engine, shape, QueryError, TraceMap};
use modalith_store::PrivacyStore as _;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::health::{build_health_response, HealthResponse};
use crate::api::AppState;
use crate::auth::enforce_access;
use crate::error::ApiError;
use crate::metering::UsageRecord;
use crate::middleware::CorrelationId;

fn parse_request(body: &Bytes) -> Result<QueryRequest, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::validation(format!("Request validation failed: {err}")))
}

/// The modality label a query is metered and logged under.
fn describe_query_modality(request: &QueryRequest, search_type: SearchType) -> &'static str {
    match search_type {
        SearchType::Metadata => "metadata",
        SearchType::Keyword => "keyword",
        SearchType::Vector => {
            let has_text = request.query_text.is_some();
            let has_image = request.image_base64.is_some();
            match (has_text, has_image) {
                (true, true) => "text+image",
                (false, true) => "image",
                _ => "text",
            }
        }
    }
}

/// POST /query
pub async fn query(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<QueryResponse>, ApiError> {
    let started = Instant::now();
    let config = &state.query_config;

    if let Some(length) = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if length > config.max_query_bytes {
            return Err(ApiError::new(ErrorKind::PayloadTooLarge, "Request too large"));
        }
    }
    if body.len() > config.max_query_bytes {
        return Err(ApiError::new(ErrorKind::PayloadTooLarge, "Request too large"));
    }

    let context = state.authenticator.resolve(&headers, &state.stores).await?;
    enforce_access(ACTION_QUERY, context.as_ref(), &state.stores, &state.access)?;
    let scope = context.as_ref().and_then(|ctx| ctx.scope.clone());
    let is_admin = context.as_ref().map(|ctx| ctx.is_admin).unwrap_or(false);

    let request = parse_request(&body)?;
    let search_type = engine::resolve_search_type(&request)?;
    let modalities = engine::resolve_modalities(&request)?;
    engine::validate_query(&request, search_type, &modalities, config)?;

    // Lazy first load keeps the endpoint usable right after startup races.
    let descriptor = match state.snapshot.get() {
        Some(descriptor) => descriptor,
        None => state
            .snapshot
            .reload(&state.config.snapshot_uri)
            .map_err(|err| {
                warn!(error = %err, "snapshot load failed");
                ApiError::from(QueryError::SnapshotNotReady)
            })?,
    };

    let trace_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(
        request_id = %trace_id,
        correlation_id = %correlation.0,
        "received query"
    );

    let mut trace = TraceMap::new();
    let results = engine::run_query(
        &descriptor.snapshot,
        &state.embedders,
        state.reranker.as_ref(),
        &request,
        search_type,
        &modalities,
        scope.as_ref(),
        config,
        &mut trace,
    )?;

    let privacy_policies = state.stores.privacy.load_policies().unwrap_or_else(|err| {
        warn!(error = %err, "privacy policy load failed; skipping redaction");
        Vec::new()
    });
    let redacted = apply_privacy_redaction(results, &privacy_policies, scope.as_ref(), is_admin);

    let response = shape::build_query_response(
        redacted,
        &request,
        &descriptor.marker(),
        &trace_id,
        config,
    )?;

    let duration_ms = started.elapsed().as_millis() as u64;
    let modality = describe_query_modality(&request, search_type);
    info!(
        request_id = %trace_id,
        correlation_id = %correlation.0,
        modality,
        duration_ms,
        "query completed"
    );
    if state.usage.enabled() {
        state.usage.record_usage(UsageRecord {
            event_type: "query".to_string(),
            scope: scope.clone(),
            credential_id: context.as_ref().map(|ctx| ctx.credential_id.clone()),
            modality: modality.to_string(),
            units: 1,
            bytes_in: Some(body.len() as u64),
            pipeline_version: state.config.version.clone(),
            schema_version: "1".to_string(),
            recorded_at: chrono::Utc::now(),
        });
    }
    if config.log_query_timings || duration_ms >= config.slow_query_ms {
        let snapshot_age_s = descriptor.age_seconds();
        let timings = json!(trace);
        if duration_ms >= config.slow_query_ms {
            warn!(
                request_id = %trace_id,
                correlation_id = %correlation.0,
                modality,
                duration_ms,
                top_k = request.top_k,
                snapshot_age_s,
                snapshot_path = %descriptor.local_path.display(),
                %timings,
                "slow query"
            );
        } else {
            info!(
                request_id = %trace_id,
                correlation_id = %correlation.0,
                modality,
                duration_ms,
                top_k = request.top_k,
                snapshot_age_s,
                snapshot_path = %descriptor.local_path.display(),
                %timings,
                "query timings"
            );
        }
    }

    Ok(Json(response))
}

/// POST /admin/reload-snapshot
pub async fn reload_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HealthResponse>, ApiError> {
    let context = state.authenticator.resolve(&headers, &state.stores).await?;
    if let Some(context) = &context {
        if !context.is_admin {
            return Err(ApiError::forbidden());
        }
    }
    state
        .snapshot
        .reload(&state.config.snapshot_uri)
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(build_health_response(&state)))
}
