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

//! Cross-encoder rerank gate.
//!
//! The gate rescoring the top text-bearing candidates runs under guardrails:
//! it can be disabled outright, skipped below a candidate floor, skipped when
//! the fused top result is already confidently ahead, truncated to a
//! character budget, and abandoned on timeout (keeping the fused order).

use std::time::Instant;

use modalith_core::{QueryResult, WhyEntry};
use serde_json::json;
use tracing::debug;

use crate::config::QueryServiceConfig;
use crate::engine::TraceMap;

pub trait Reranker: Send + Sync {
    fn model_name(&self) -> &str;
    fn backend(&self) -> &str;
    /// One score per document, same order. Raw outputs may be logits.
    fn score(&self, query: &str, documents: &[String]) -> Vec<f32>;
}

/// Deterministic token-overlap F1 scorer, the stub backend.
pub struct TokenOverlapReranker;

fn tokens(text: &str) -> std::collections::BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

fn overlap_f1(query: &str, document: &str) -> f32 {
    let q = tokens(query);
    let d = tokens(document);
    if q.is_empty() || d.is_empty() {
        return 0.0;
    }
    let overlap = q.intersection(&d).count() as f32;
    let precision = overlap / d.len() as f32;
    let recall = overlap / q.len() as f32;
    if precision + recall <= 0.0 {
        return 0.0;
    }
    (2.0 * precision * recall / (precision + recall)).clamp(0.0, 1.0)
}

impl Reranker for TokenOverlapReranker {
    fn model_name(&self) -> &str {
        "stub:token-overlap"
    }

    fn backend(&self) -> &str {
        "stub"
    }

    fn score(&self, query: &str, documents: &[String]) -> Vec<f32> {
        documents.iter().map(|doc| overlap_f1(query, doc)).collect()
    }
}

/// Raw model outputs normalized into [0,1]: kept as-is when already in
/// range, squashed logistically for logit-shaped outputs, and pinned to 0.5
/// when the batch is constant.
pub fn normalize_rerank_scores(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let minimum = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let maximum = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if minimum >= 0.0 && maximum <= 1.0 {
        return scores.to_vec();
    }
    if (maximum - minimum).abs() < f32::EPSILON {
        return vec![0.5; scores.len()];
    }
    scores
        .iter()
        .map(|&value| 1.0 / (1.0 + (-value).exp()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankStatus {
    Applied,
    Disabled,
    SkippedFewCandidates,
    SkippedConfidentTopResult,
    Timeout,
}

impl RerankStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RerankStatus::Applied => "applied",
            RerankStatus::Disabled => "disabled",
            RerankStatus::SkippedFewCandidates => "skipped_few_candidates",
            RerankStatus::SkippedConfidentTopResult => "skipped_confident_top_result",
            RerankStatus::Timeout => "timeout",
        }
    }
}

/// Rescore the fused list in place. Returns the gate decision, which is also
/// recorded in the trace as `rerank_status`.
pub fn apply_rerank(
    results: &mut Vec<QueryResult>,
    query_text: &str,
    reranker: &dyn Reranker,
    config: &QueryServiceConfig,
    trace: &mut TraceMap,
) -> RerankStatus {
    let status = rerank_inner(results, query_text, reranker, config, trace);
    trace.insert("rerank_status".to_string(), json!(status.as_str()));
    status
}

fn rerank_inner(
    results: &mut Vec<QueryResult>,
    query_text: &str,
    reranker: &dyn Reranker,
    config: &QueryServiceConfig,
    trace: &mut TraceMap,
) -> RerankStatus {
    if !config.rerank_enabled {
        return RerankStatus::Disabled;
    }

    // Indices of rescorable candidates: text-bearing, with a snippet, within
    // the top-N window.
    let candidate_idx: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, row)| row.modality.is_text_bearing() && row.snippet.is_some())
        .map(|(idx, _)| idx)
        .take(config.rerank_top_n)
        .collect();

    if candidate_idx.len() < config.rerank_min_candidates {
        return RerankStatus::SkippedFewCandidates;
    }

    if results.len() >= 2 {
        let top = results[0].score;
        let runner_up = results[1].score;
        if top >= config.rerank_skip_min_score
            && top - runner_up >= config.rerank_skip_score_gap
        {
            return RerankStatus::SkippedConfidentTopResult;
        }
    }

    // Character budget: snippets are truncated so the cumulative count stays
    // under the cap; candidates past the budget keep their fused score.
    let mut budget = config.rerank_max_total_chars;
    let mut scored_idx = Vec::new();
    let mut documents = Vec::new();
    for &idx in &candidate_idx {
        if budget == 0 {
            break;
        }
        let snippet = results[idx].snippet.as_deref().unwrap_or("");
        let truncated: String = snippet.chars().take(budget).collect();
        budget -= truncated.chars().count();
        scored_idx.push(idx);
        documents.push(truncated);
    }

    let started = Instant::now();
    let raw_scores = reranker.score(query_text, &documents);
    let elapsed = started.elapsed().as_secs_f64();
    trace.insert("rerank_ms".to_string(), json!(elapsed * 1000.0));
    if elapsed > config.rerank_timeout_s {
        debug!(
            rerank_elapsed_s = elapsed,
            rerank_timeout_s = config.rerank_timeout_s,
            "rerank abandoned on timeout; keeping fused order"
        );
        return RerankStatus::Timeout;
    }
    if raw_scores.len() != documents.len() {
        debug!(
            expected = documents.len(),
            got = raw_scores.len(),
            "reranker returned a short batch; keeping fused order"
        );
        return RerankStatus::Timeout;
    }

    let normalized = normalize_rerank_scores(&raw_scores);
    for (&idx, (&raw, &score)) in scored_idx
        .iter()
        .zip(raw_scores.iter().zip(normalized.iter()))
    {
        let row = &mut results[idx];
        row.score = score.clamp(0.0, 1.0);
        row.why.push(WhyEntry {
            source: "rerank".to_string(),
            modality: Some(row.modality.as_str().to_string()),
            raw_score: Some(raw),
            rank: None,
            weight: None,
            weight_version: None,
        });
    }
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.primary_evidence_id.cmp(&b.primary_evidence_id))
    });
    RerankStatus::Applied
}
