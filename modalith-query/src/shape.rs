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

//! Output shaping: privacy redaction, video grouping, and deterministic
//! cursor pagination.

use base64::Engine as _;
use modalith_core::entities::PrivacyPolicy;
use modalith_core::{
    Grouping, GroupedVideo, QueryHit, QueryRequest, QueryResponse, QueryResult, ResponseMeta,
    TenantScope,
};
use serde::{Deserialize, Serialize};

use crate::config::QueryServiceConfig;
use crate::error::{QueryError, Result};

const REDACTED_SNIPPET: &str = "[REDACTED]";

fn policy_applies(policy: &PrivacyPolicy, scope: Option<&TenantScope>) -> bool {
    let level = |policy_level: &Option<String>, scope_level: Option<&str>| match policy_level {
        None => true,
        Some(want) => scope_level == Some(want.as_str()),
    };
    let scope_org = scope.and_then(|s| s.org_id.as_deref());
    let scope_site = scope.and_then(|s| s.site_id.as_deref());
    let scope_stream = scope.and_then(|s| s.stream_id.as_deref());
    level(&policy.org_id, scope_org)
        && level(&policy.site_id, scope_site)
        && level(&policy.stream_id, scope_stream)
}

fn redacts_field(policy: &PrivacyPolicy, field: &str) -> bool {
    match &policy.redaction_types {
        None => true,
        Some(kinds) => kinds.iter().any(|kind| kind.eq_ignore_ascii_case(field)),
    }
}

/// Remove or mask fields forbidden by the active privacy policies. Pure:
/// same-length output, order untouched. Admins bypass.
pub fn apply_privacy_redaction(
    mut results: Vec<QueryResult>,
    policies: &[PrivacyPolicy],
    scope: Option<&TenantScope>,
    is_admin: bool,
) -> Vec<QueryResult> {
    if is_admin {
        return results;
    }
    let active: Vec<&PrivacyPolicy> = policies
        .iter()
        .filter(|policy| policy.is_active() && policy_applies(policy, scope))
        .collect();
    if active.is_empty() {
        return results;
    }
    for row in results.iter_mut() {
        for policy in &active {
            if !policy.covers_modality(row.modality.as_str()) {
                continue;
            }
            if redacts_field(policy, "snippet") && row.snippet.is_some() {
                row.snippet = Some(REDACTED_SNIPPET.to_string());
            }
            if redacts_field(policy, "thumbnail") {
                row.thumbnail_uri = None;
            }
            if redacts_field(policy, "uri") {
                row.uri = format!("redacted://{}", row.media_asset_id);
            }
        }
    }
    results
}

/// Opaque page cursor: query fingerprint, offset, snapshot marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub query_fingerprint: String,
    pub offset: usize,
    pub snapshot_marker: String,
}

impl PageToken {
    pub fn encode(&self) -> String {
        let raw = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| QueryError::Validation("Invalid page_token".into()))?;
        serde_json::from_slice(&raw)
            .map_err(|_| QueryError::Validation("Invalid page_token".into()))
    }
}

/// Stable fingerprint of the request, excluding the cursor itself.
pub fn query_fingerprint(request: &QueryRequest) -> String {
    let mut canonical = request.clone();
    canonical.page_token = None;
    let raw = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(&blake3::hash(&raw).as_bytes()[..16])
}

fn resolve_offset(
    request: &QueryRequest,
    fingerprint: &str,
    snapshot_marker: &str,
) -> Result<usize> {
    let Some(token) = request.page_token.as_deref() else {
        return Ok(0);
    };
    let token = PageToken::decode(token)?;
    if token.query_fingerprint != fingerprint {
        return Err(QueryError::Validation(
            "page_token does not match this query".into(),
        ));
    }
    if token.snapshot_marker != snapshot_marker {
        return Err(QueryError::SnapshotShifted(format!(
            "token snapshot {} is no longer current",
            token.snapshot_marker
        )));
    }
    Ok(token.offset)
}

fn strip_why(hits: &mut [QueryHit]) {
    for hit in hits {
        hit.why.clear();
    }
}

/// Shape the fused, redacted list into the response envelope: grouping when
/// requested, then the deterministic cursor page.
pub fn build_query_response(
    results: Vec<QueryResult>,
    request: &QueryRequest,
    snapshot_marker: &str,
    trace_id: &str,
    config: &QueryServiceConfig,
) -> Result<QueryResponse> {
    if let Some(group_by) = request.group_by.as_deref() {
        if group_by != "video" {
            return Err(QueryError::Validation(format!(
                "Unsupported group_by: {group_by}"
            )));
        }
    }

    let fingerprint = query_fingerprint(request);
    let paginating = config.search_pagination_enabled && request.page_limit.is_some();
    let offset = if paginating {
        resolve_offset(request, &fingerprint, snapshot_marker)?
    } else {
        0
    };
    let limit = request.page_limit.unwrap_or(usize::MAX);

    let mut hits: Vec<QueryHit> = results.into_iter().map(QueryHit::from).collect();
    if !config.search_why_enabled {
        strip_why(&mut hits);
    }

    let meta = ResponseMeta {
        fusion_method: "weighted_rrf".to_string(),
        weight_version: config.query_fusion_weight_version.clone(),
        snapshot_marker: snapshot_marker.to_string(),
        trace_id: trace_id.to_string(),
    };

    let grouping_requested =
        request.group_by.as_deref() == Some("video") && config.search_group_by_enabled;
    if grouping_requested {
        let total_moments = hits.len();
        let mut groups: Vec<GroupedVideo> = Vec::new();
        for hit in hits {
            match groups
                .iter_mut()
                .find(|group| group.asset_id == hit.media_asset_id)
            {
                Some(group) => {
                    group.clip_count += 1;
                    group.moments.push(hit);
                }
                None => groups.push(GroupedVideo {
                    asset_id: hit.media_asset_id.clone(),
                    clip_count: 1,
                    moments: vec![hit],
                }),
            }
        }
        for group in groups.iter_mut() {
            group
                .moments
                .sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        if request.sort_by.as_deref() == Some("clip_count") {
            groups.sort_by(|a, b| {
                b.clip_count
                    .cmp(&a.clip_count)
                    .then_with(|| a.asset_id.cmp(&b.asset_id))
            });
        } else {
            groups.sort_by(|a, b| {
                let score_a = a.moments.first().map(|m| m.score).unwrap_or(0.0);
                let score_b = b.moments.first().map(|m| m.score).unwrap_or(0.0);
                score_b
                    .total_cmp(&score_a)
                    .then_with(|| a.asset_id.cmp(&b.asset_id))
            });
        }

        let total_videos = groups.len();
        let (page, next_offset) = page_slice(groups, offset, limit, paginating);
        let next_page_token = next_offset.map(|offset| {
            PageToken {
                query_fingerprint: fingerprint.clone(),
                offset,
                snapshot_marker: snapshot_marker.to_string(),
            }
            .encode()
        });
        let flat: Vec<QueryHit> = page
            .iter()
            .flat_map(|group| group.moments.iter().cloned())
            .collect();
        return Ok(QueryResponse {
            results: flat,
            next_page_token,
            grouping: Some(Grouping {
                total_videos,
                total_moments,
                videos: page,
            }),
            meta,
        });
    }

    let (page, next_offset) = page_slice(hits, offset, limit, paginating);
    let next_page_token = next_offset.map(|offset| {
        PageToken {
            query_fingerprint: fingerprint,
            offset,
            snapshot_marker: snapshot_marker.to_string(),
        }
        .encode()
    });
    Ok(QueryResponse {
        results: page,
        next_page_token,
        grouping: None,
        meta,
    })
}

fn page_slice<T>(
    items: Vec<T>,
    offset: usize,
    limit: usize,
    paginating: bool,
) -> (Vec<T>, Option<usize>) {
    if !paginating {
        return (items, None);
    }
    let total = items.len();
    let page: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    let next = offset.saturating_add(page.len());
    let next_offset = (next < total && !page.is_empty()).then_some(next);
    (page, next_offset)
}
