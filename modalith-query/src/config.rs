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

//! Query-service configuration, loaded once from the environment at startup.
//! Unknown environment keys are ignored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::routing::RoutingConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryServiceConfig {
    pub max_query_bytes: usize,
    pub max_image_base64_bytes: usize,
    pub slow_query_ms: u64,
    pub log_query_timings: bool,
    pub query_warmup: bool,
    pub query_warmup_text: String,
    pub query_warmup_steps: BTreeSet<String>,
    pub rerank_enabled: bool,
    pub rerank_model_name: String,
    pub rerank_backend: String,
    pub rerank_top_n: usize,
    pub rerank_min_candidates: usize,
    pub rerank_max_total_chars: usize,
    pub rerank_skip_min_score: f32,
    pub rerank_skip_score_gap: f32,
    pub rerank_timeout_s: f64,
    pub query_fusion_rrf_k: f32,
    pub query_fusion_weights: BTreeMap<String, f32>,
    pub query_fusion_weight_version: String,
    pub search_group_by_enabled: bool,
    pub search_pagination_enabled: bool,
    pub search_why_enabled: bool,
    pub search_typed_errors_enabled: bool,
    pub routing: RoutingConfig,
}

impl Default for QueryServiceConfig {
    fn default() -> Self {
        Self {
            max_query_bytes: 4_000_000,
            max_image_base64_bytes: 2_000_000,
            slow_query_ms: 2000,
            log_query_timings: false,
            query_warmup: true,
            query_warmup_text: "modalith warmup".to_string(),
            query_warmup_steps: ["text", "image_text", "audio_text", "image"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            rerank_enabled: true,
            rerank_model_name: "stub:token-overlap".to_string(),
            rerank_backend: "stub".to_string(),
            rerank_top_n: 100,
            rerank_min_candidates: 2,
            rerank_max_total_chars: 20_000,
            rerank_skip_min_score: 0.70,
            rerank_skip_score_gap: 0.20,
            rerank_timeout_s: 2.0,
            query_fusion_rrf_k: 60.0,
            query_fusion_weights: BTreeMap::new(),
            query_fusion_weight_version: "default".to_string(),
            search_group_by_enabled: true,
            search_pagination_enabled: true,
            search_why_enabled: true,
            search_typed_errors_enabled: true,
            routing: RoutingConfig::default(),
        }
    }
}

fn env_usize(name: &str, default: usize, minimum: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
        .max(minimum)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f32(name: &str, default: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64, minimum: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
        .max(minimum)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => raw.trim() == "1",
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// `source=weight` csv, e.g. `document=1.0,image=0.8`.
fn parse_fusion_weights(raw: &str) -> BTreeMap<String, f32> {
    let mut weights = BTreeMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if let Ok(weight) = value.trim().parse::<f32>() {
            weights.insert(key.trim().to_ascii_lowercase(), weight);
        }
    }
    weights
}

impl QueryServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let warmup_steps = env_string("QUERY_WARMUP_STEPS", "text,image_text,audio_text,image")
            .split(',')
            .map(|step| step.trim().to_ascii_lowercase())
            .filter(|step| !step.is_empty())
            .collect();
        Self {
            max_query_bytes: env_usize("MAX_QUERY_BYTES", defaults.max_query_bytes, 1),
            max_image_base64_bytes: env_usize(
                "MAX_IMAGE_BASE64_BYTES",
                defaults.max_image_base64_bytes,
                1,
            ),
            slow_query_ms: env_u64("SLOW_QUERY_MS", defaults.slow_query_ms),
            log_query_timings: env_flag("LOG_QUERY_TIMINGS", defaults.log_query_timings),
            query_warmup: env_flag("QUERY_WARMUP", defaults.query_warmup),
            query_warmup_text: env_string("QUERY_WARMUP_TEXT", &defaults.query_warmup_text),
            query_warmup_steps: warmup_steps,
            rerank_enabled: env_flag("RERANK_ENABLED", defaults.rerank_enabled),
            rerank_model_name: env_string("RERANK_MODEL_NAME", &defaults.rerank_model_name),
            rerank_backend: env_string("RERANK_BACKEND", &defaults.rerank_backend)
                .to_ascii_lowercase(),
            rerank_top_n: env_usize("RERANK_TOP_N", defaults.rerank_top_n, 1),
            rerank_min_candidates: env_usize(
                "RERANK_MIN_CANDIDATES",
                defaults.rerank_min_candidates,
                1,
            ),
            rerank_max_total_chars: env_usize(
                "RERANK_MAX_TOTAL_CHARS",
                defaults.rerank_max_total_chars,
                1,
            ),
            rerank_skip_min_score: env_f32(
                "RERANK_SKIP_MIN_SCORE",
                defaults.rerank_skip_min_score,
            ),
            rerank_skip_score_gap: env_f32(
                "RERANK_SKIP_SCORE_GAP",
                defaults.rerank_skip_score_gap,
            ),
            rerank_timeout_s: env_f64("RERANK_TIMEOUT_S", defaults.rerank_timeout_s, 0.0),
            query_fusion_rrf_k: env_f32("QUERY_FUSION_RRF_K", defaults.query_fusion_rrf_k),
            query_fusion_weights: parse_fusion_weights(
                &std::env::var("QUERY_FUSION_WEIGHTS").unwrap_or_default(),
            ),
            query_fusion_weight_version: env_string(
                "QUERY_FUSION_WEIGHT_VERSION",
                &defaults.query_fusion_weight_version,
            ),
            search_group_by_enabled: env_flag(
                "SEARCH_GROUP_BY_ENABLED",
                defaults.search_group_by_enabled,
            ),
            search_pagination_enabled: env_flag(
                "SEARCH_PAGINATION_ENABLED",
                defaults.search_pagination_enabled,
            ),
            search_why_enabled: env_flag("SEARCH_WHY_ENABLED", defaults.search_why_enabled),
            search_typed_errors_enabled: env_flag(
                "SEARCH_TYPED_ERRORS_ENABLED",
                defaults.search_typed_errors_enabled,
            ),
            routing: RoutingConfig::from_env(),
        }
    }
}
