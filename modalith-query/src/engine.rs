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

//! Query engine orchestration.
//!
//! The per-request pipeline minus HTTP: validate, resolve the modality set
//! and search type, fan out candidate generators against the snapshot, fuse,
//! optionally rerank, and hand the ranked rows to shaping. Per-step timings
//! land in the trace map the caller logs.

use std::collections::BTreeSet;
use std::str::FromStr;

use modalith_core::{Modality, QueryMode, QueryRequest, QueryResult, SearchType, TenantScope,
    MAX_TOP_K};
use serde_json::json;

use crate::candidates;
use crate::config::QueryServiceConfig;
use crate::embed::EmbedderSet;
use crate::error::{QueryError, Result};
use crate::fusion::{fuse, FusionConfig, SourceList};
use crate::rerank::{apply_rerank, Reranker};
use crate::routing::{select_query_tier, RoutingContext};
use crate::snapshot::Snapshot;

/// Per-request timing and decision trace, emitted in structured logs.
pub type TraceMap = std::collections::BTreeMap<String, serde_json::Value>;

pub fn resolve_search_type(request: &QueryRequest) -> Result<SearchType> {
    match request.search_type.as_deref() {
        None => Ok(SearchType::Vector),
        Some(raw) => SearchType::from_str(raw)
            .map_err(|_| QueryError::Validation(format!("Unsupported search_type: {raw}"))),
    }
}

/// Resolve the modality set. `mode` and `modalities` are mutually exclusive.
pub fn resolve_modalities(request: &QueryRequest) -> Result<BTreeSet<Modality>> {
    if request.mode.is_some() && request.modalities.is_some() {
        return Err(QueryError::Validation(
            "Specify either mode or modalities, not both".into(),
        ));
    }

    if let Some(raw) = request.mode.as_deref() {
        let mode = QueryMode::from_str(raw)
            .map_err(|_| QueryError::UnsupportedMode(raw.to_string()))?;
        return Ok(mode.modalities().into_iter().collect());
    }

    match &request.modalities {
        None => Ok(Modality::ALL.into_iter().collect()),
        Some(raw_list) => {
            if raw_list.is_empty() {
                return Err(QueryError::Validation("modalities cannot be empty".into()));
            }
            let mut modalities = BTreeSet::new();
            let mut unknown = Vec::new();
            for raw in raw_list {
                match Modality::from_str(raw) {
                    Ok(modality) => {
                        modalities.insert(modality);
                    }
                    Err(_) => unknown.push(raw.clone()),
                }
            }
            if !unknown.is_empty() {
                unknown.sort();
                return Err(QueryError::Validation(format!(
                    "Unknown modalities: {}",
                    unknown.join(", ")
                )));
            }
            Ok(modalities)
        }
    }
}

/// Structural validation after modality/search-type resolution.
pub fn validate_query(
    request: &QueryRequest,
    search_type: SearchType,
    modalities: &BTreeSet<Modality>,
    config: &QueryServiceConfig,
) -> Result<()> {
    if request.top_k < 1 || request.top_k > MAX_TOP_K {
        return Err(QueryError::Validation(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }
    if request.page_limit == Some(0) {
        return Err(QueryError::Validation("page_limit must be positive".into()));
    }

    let has_text = request
        .query_text
        .as_deref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false);
    let has_image = request
        .image_base64
        .as_deref()
        .map(|raw| !raw.is_empty())
        .unwrap_or(false);

    if let Some(image) = request.image_base64.as_deref() {
        if image.len() > config.max_image_base64_bytes {
            return Err(QueryError::PayloadTooLarge("Image payload too large".into()));
        }
    }

    match search_type {
        SearchType::Vector => {
            if !has_text && !has_image {
                return Err(QueryError::Validation(
                    "query_text or image_base64 is required".into(),
                ));
            }
            if has_image && !modalities.contains(&Modality::Image) {
                return Err(QueryError::Validation(
                    "image_base64 requires image modality".into(),
                ));
            }
        }
        SearchType::Keyword => {
            if has_image {
                return Err(QueryError::Validation(
                    "image_base64 is only supported for vector search".into(),
                ));
            }
            if !has_text {
                return Err(QueryError::Validation(
                    "query_text is required for keyword search".into(),
                ));
            }
        }
        SearchType::Metadata => {
            if has_text || has_image {
                return Err(QueryError::Validation(
                    "metadata search does not accept query_text or image_base64".into(),
                ));
            }
            if request
                .metadata_filters
                .as_ref()
                .map(|filters| filters.is_empty())
                .unwrap_or(true)
            {
                return Err(QueryError::Validation(
                    "metadata_filters is required for metadata search".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Fan out candidate generators, fuse, and apply the rerank gate.
#[allow(clippy::too_many_arguments)]
pub fn run_query(
    snapshot: &Snapshot,
    embedders: &EmbedderSet,
    reranker: &dyn Reranker,
    request: &QueryRequest,
    search_type: SearchType,
    modalities: &BTreeSet<Modality>,
    scope: Option<&TenantScope>,
    config: &QueryServiceConfig,
    trace: &mut TraceMap,
) -> Result<Vec<QueryResult>> {
    let query_text = request
        .query_text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let image_base64 = request.image_base64.as_deref().filter(|raw| !raw.is_empty());

    let routing = select_query_tier(
        &config.routing,
        &RoutingContext {
            has_text: query_text.is_some(),
            has_image: image_base64.is_some(),
            modalities: modalities.clone(),
        },
    );
    trace.insert("query_tier".to_string(), json!(routing.tier));
    trace.insert("query_tier_reason".to_string(), json!(routing.reason));

    let mut lists: Vec<SourceList> = Vec::new();
    match search_type {
        SearchType::Vector => {
            if let Some(text) = query_text {
                lists.extend(candidates::search_text_vector(
                    snapshot,
                    embedders,
                    text,
                    modalities,
                    request.top_k,
                    scope,
                    trace,
                ));
                let hints = candidates::modality_hints(text);
                candidates::apply_modality_hints(&mut lists, &hints);
            }
            if let Some(image) = image_base64 {
                lists.push(candidates::search_image_vector(
                    snapshot,
                    embedders,
                    image,
                    request.top_k,
                    scope,
                    trace,
                )?);
            }
        }
        SearchType::Keyword => {
            if let Some(text) = query_text {
                lists.extend(candidates::search_keyword(
                    snapshot,
                    text,
                    request.top_k,
                    scope,
                    trace,
                ));
            }
        }
        SearchType::Metadata => {
            if let Some(filters) = &request.metadata_filters {
                lists.push(candidates::search_metadata(
                    snapshot,
                    filters,
                    request.top_k,
                    scope,
                    trace,
                )?);
            }
        }
    }

    let fusion_config = FusionConfig::from(config);
    let mut fused = fuse(&lists, &fusion_config);

    if let Some(text) = query_text {
        if search_type != SearchType::Metadata {
            apply_rerank(&mut fused, text, reranker, config, trace);
        }
    }

    fused.truncate(request.top_k);
    Ok(fused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::TokenOverlapReranker;
    use crate::snapshot::fixtures::sample_tables;

    fn request(text: &str) -> QueryRequest {
        QueryRequest {
            query_text: Some(text.to_string()),
            ..QueryRequest::default()
        }
    }

    #[test]
    fn search_type_defaults_to_vector() {
        assert_eq!(
            resolve_search_type(&QueryRequest::default()).unwrap(),
            SearchType::Vector
        );
        let mut req = QueryRequest::default();
        req.search_type = Some("holographic".into());
        assert!(resolve_search_type(&req).is_err());
    }

    #[test]
    fn mode_and_modalities_are_mutually_exclusive() {
        let mut req = request("hello");
        req.mode = Some("text".into());
        req.modalities = Some(vec!["image".into()]);
        assert!(matches!(
            resolve_modalities(&req),
            Err(QueryError::Validation(_))
        ));
    }

    #[test]
    fn unknown_mode_is_unsupported_mode() {
        let mut req = request("hello");
        req.mode = Some("bogus".into());
        assert!(matches!(
            resolve_modalities(&req),
            Err(QueryError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn vision_alias_resolves_to_image() {
        let mut req = request("hello");
        req.modalities = Some(vec!["vision".into()]);
        let modalities = resolve_modalities(&req).unwrap();
        assert_eq!(modalities.len(), 1);
        assert!(modalities.contains(&Modality::Image));
    }

    #[test]
    fn default_modalities_are_all() {
        assert_eq!(resolve_modalities(&request("hello")).unwrap().len(), 4);
    }

    #[test]
    fn top_k_bounds_are_enforced() {
        let config = QueryServiceConfig::default();
        let modalities = resolve_modalities(&request("hello")).unwrap();
        let mut req = request("hello");
        req.top_k = 0;
        assert!(validate_query(&req, SearchType::Vector, &modalities, &config).is_err());
        req.top_k = 51;
        assert!(validate_query(&req, SearchType::Vector, &modalities, &config).is_err());
        req.top_k = 50;
        assert!(validate_query(&req, SearchType::Vector, &modalities, &config).is_ok());
    }

    #[test]
    fn metadata_search_rejects_payloads() {
        let config = QueryServiceConfig::default();
        let modalities = resolve_modalities(&QueryRequest::default()).unwrap();
        let mut req = request("hello");
        req.search_type = Some("metadata".into());
        assert!(validate_query(&req, SearchType::Metadata, &modalities, &config).is_err());

        let mut req = QueryRequest::default();
        req.search_type = Some("metadata".into());
        assert!(validate_query(&req, SearchType::Metadata, &modalities, &config).is_err());

        req.metadata_filters = Some(
            [("media_type".to_string(), "video/mp4".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(validate_query(&req, SearchType::Metadata, &modalities, &config).is_ok());
    }

    #[test]
    fn oversized_image_is_payload_too_large() {
        let mut config = QueryServiceConfig::default();
        config.max_image_base64_bytes = 4;
        let mut req = QueryRequest::default();
        req.image_base64 = Some("AAAAAAAA".into());
        let modalities = resolve_modalities(&req).unwrap();
        assert!(matches!(
            validate_query(&req, SearchType::Vector, &modalities, &config),
            Err(QueryError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn vector_text_query_end_to_end() {
        let snapshot = Snapshot::from_tables(sample_tables());
        let embedders = EmbedderSet::deterministic();
        let config = QueryServiceConfig::default();
        let req = request("hello");
        let modalities = resolve_modalities(&req).unwrap();
        let mut trace = TraceMap::new();
        let results = run_query(
            &snapshot,
            &embedders,
            &TokenOverlapReranker,
            &req,
            SearchType::Vector,
            &modalities,
            None,
            &config,
            &mut trace,
        )
        .unwrap();
        assert!(!results.is_empty());
        let top = &results[0];
        assert_eq!(top.modality, Modality::Document);
        assert_eq!(top.primary_evidence_id, "doc-1");
        assert!(top.score >= 0.5);
        assert_eq!(top.why[0].source, "vector");
        assert!(trace.contains_key("rerank_status"));
        assert_eq!(trace.get("query_tier").unwrap(), "cpu");
    }

    #[test]
    fn scores_stay_in_range_after_full_pipeline() {
        let snapshot = Snapshot::from_tables(sample_tables());
        let embedders = EmbedderSet::deterministic();
        let config = QueryServiceConfig::default();
        let req = request("factory floor video");
        let modalities = resolve_modalities(&req).unwrap();
        let mut trace = TraceMap::new();
        let results = run_query(
            &snapshot,
            &embedders,
            &TokenOverlapReranker,
            &req,
            SearchType::Vector,
            &modalities,
            None,
            &config,
            &mut trace,
        )
        .unwrap();
        for row in &results {
            assert!((0.0..=1.0).contains(&row.score));
        }
        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }
}
