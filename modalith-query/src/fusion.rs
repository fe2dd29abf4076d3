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

//! Weighted reciprocal-rank fusion.
//!
//! Candidates are grouped by `primary_evidence_id` (falling back to the
//! `(modality, uri, start_ms)` key), each group sums `w / (k + rank)` over
//! the source lists it appears in, and the sum is normalized by the
//! theoretical maximum `Σ w / (k + 1)`. The merged row's display fields come
//! from the highest-contributing source; ties break by modality priority,
//! then lexicographic uri.

use std::collections::BTreeMap;

use modalith_core::{Modality, QueryResult, WhyEntry};

use crate::config::QueryServiceConfig;

/// One ranked candidate list entering fusion, already sorted by descending
/// score.
#[derive(Debug, Clone)]
pub struct SourceList {
    /// Source kind, e.g. `vector`, `keyword`, `metadata`.
    pub kind: String,
    pub modality: Modality,
    /// Weight-lookup label, `<kind>:<modality>`.
    pub label: String,
    pub results: Vec<QueryResult>,
}

impl SourceList {
    pub fn new(kind: &str, modality: Modality, results: Vec<QueryResult>) -> Self {
        Self {
            kind: kind.to_string(),
            modality,
            label: format!("{kind}:{modality}"),
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub k: f32,
    pub weights: BTreeMap<String, f32>,
    pub weight_version: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            weights: BTreeMap::new(),
            weight_version: "default".to_string(),
        }
    }
}

impl From<&QueryServiceConfig> for FusionConfig {
    fn from(config: &QueryServiceConfig) -> Self {
        Self {
            k: config.query_fusion_rrf_k,
            weights: config.query_fusion_weights.clone(),
            weight_version: config.query_fusion_weight_version.clone(),
        }
    }
}

impl FusionConfig {
    /// Weight lookup: exact label, then modality, then source kind, then 1.
    fn weight_for(&self, list: &SourceList) -> f32 {
        self.weights
            .get(&list.label)
            .or_else(|| self.weights.get(list.modality.as_str()))
            .or_else(|| self.weights.get(&list.kind))
            .copied()
            .unwrap_or(1.0)
    }
}

struct FusedGroup {
    representative: QueryResult,
    best_contribution: f32,
    total: f32,
    why: Vec<WhyEntry>,
    evidence_refs: Vec<modalith_core::EvidenceRef>,
}

fn prefer_representative(current: &QueryResult, candidate: &QueryResult) -> bool {
    let by_modality = candidate
        .modality
        .priority()
        .cmp(&current.modality.priority());
    match by_modality {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => candidate.uri < current.uri,
    }
}

/// Merge per-source candidate lists into one ranked list with provenance.
///
/// Commutative and associative over the input multisets; deduplication by
/// evidence key is idempotent; output length never exceeds the sum of input
/// lengths; output scores are weakly decreasing.
pub fn fuse(lists: &[SourceList], config: &FusionConfig) -> Vec<QueryResult> {
    // Sources that produced no candidates do not count toward the
    // theoretical maximum; an all-miss probe would otherwise deflate every
    // score.
    let normalizer: f32 = lists
        .iter()
        .filter(|list| !list.results.is_empty())
        .map(|list| config.weight_for(list) / (config.k + 1.0))
        .sum();

    let mut groups: BTreeMap<String, FusedGroup> = BTreeMap::new();
    for list in lists {
        let weight = config.weight_for(list);
        for (idx, row) in list.results.iter().enumerate() {
            let rank = idx + 1;
            let contribution = weight / (config.k + rank as f32);
            let why = WhyEntry {
                source: list.kind.clone(),
                modality: Some(list.modality.as_str().to_string()),
                raw_score: Some(row.score),
                rank: Some(rank),
                weight: Some(weight),
                weight_version: Some(config.weight_version.clone()),
            };
            let key = row.fusion_key();
            match groups.get_mut(&key) {
                Some(group) => {
                    group.total += contribution;
                    group.why.push(why);
                    let replace = contribution > group.best_contribution
                        || (contribution == group.best_contribution
                            && prefer_representative(&group.representative, row));
                    if replace {
                        group.best_contribution = contribution;
                        group.representative = row.clone();
                    }
                    for evidence in &row.evidence_refs {
                        if !group.evidence_refs.contains(evidence) {
                            group.evidence_refs.push(evidence.clone());
                        }
                    }
                }
                None => {
                    groups.insert(
                        key,
                        FusedGroup {
                            representative: row.clone(),
                            best_contribution: contribution,
                            total: contribution,
                            why: vec![why],
                            evidence_refs: row.evidence_refs.clone(),
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<QueryResult> = groups
        .into_values()
        .map(|group| {
            let mut row = group.representative;
            row.score = if normalizer > 0.0 {
                (group.total / normalizer).clamp(0.0, 1.0)
            } else {
                0.0
            };
            row.why = group.why;
            row.evidence_refs = group.evidence_refs;
            row
        })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.modality.priority().cmp(&b.modality.priority()))
            .then_with(|| a.primary_evidence_id.cmp(&b.primary_evidence_id))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use modalith_core::EvidenceRef;
    use proptest::prelude::*;

    fn row(modality: Modality, evidence: &str, uri: &str, score: f32) -> QueryResult {
        QueryResult {
            modality,
            uri: uri.to_string(),
            snippet: Some(format!("snippet {evidence}")),
            start_ms: None,
            end_ms: None,
            thumbnail_uri: None,
            score,
            media_asset_id: format!("asset-{evidence}"),
            media_type: None,
            primary_evidence_id: evidence.to_string(),
            evidence_refs: vec![EvidenceRef::new("doc_chunk_id", evidence)],
            why: vec![],
        }
    }

    fn doc_list(results: Vec<QueryResult>) -> SourceList {
        SourceList::new("vector", Modality::Document, results)
    }

    #[test]
    fn single_source_top_rank_normalizes_to_one() {
        let config = FusionConfig::default();
        let fused = fuse(
            &[doc_list(vec![row(Modality::Document, "doc-1", "mm://a", 0.9)])],
            &config,
        );
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0).abs() < 1e-6);
        assert_eq!(fused[0].why.len(), 1);
        assert_eq!(fused[0].why[0].source, "vector");
        assert_eq!(fused[0].why[0].rank, Some(1));
        assert_eq!(fused[0].why[0].weight_version.as_deref(), Some("default"));
    }

    #[test]
    fn fusing_a_list_with_itself_preserves_ordering_and_scores() {
        let config = FusionConfig::default();
        let rows = vec![
            row(Modality::Document, "doc-1", "mm://a", 0.9),
            row(Modality::Document, "doc-2", "mm://b", 0.8),
        ];
        let once = fuse(&[doc_list(rows.clone())], &config);
        let twice = fuse(&[doc_list(rows.clone()), doc_list(rows)], &config);
        let once_ids: Vec<_> = once.iter().map(|r| &r.primary_evidence_id).collect();
        let twice_ids: Vec<_> = twice.iter().map(|r| &r.primary_evidence_id).collect();
        assert_eq!(once_ids, twice_ids);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn zero_weight_source_changes_no_scores() {
        let mut config = FusionConfig::default();
        config.weights.insert("keyword".to_string(), 0.0);
        let base = vec![doc_list(vec![
            row(Modality::Document, "doc-1", "mm://a", 0.9),
            row(Modality::Document, "doc-2", "mm://b", 0.8),
        ])];
        let without = fuse(&base, &config);

        let mut with_zero = base.clone();
        with_zero.push(SourceList::new(
            "keyword",
            Modality::Document,
            vec![row(Modality::Document, "doc-2", "mm://b", 0.5)],
        ));
        let with = fuse(&with_zero, &config);
        for (a, b) in without.iter().zip(with.iter()) {
            assert_eq!(a.primary_evidence_id, b.primary_evidence_id);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn shared_evidence_merges_with_combined_provenance() {
        let config = FusionConfig::default();
        let fused = fuse(
            &[
                doc_list(vec![row(Modality::Document, "doc-1", "mm://a", 0.9)]),
                SourceList::new(
                    "keyword",
                    Modality::Document,
                    vec![row(Modality::Document, "doc-1", "mm://a", 0.4)],
                ),
            ],
            &config,
        );
        assert_eq!(fused.len(), 1);
        let sources: Vec<_> = fused[0].why.iter().map(|w| w.source.as_str()).collect();
        assert!(sources.contains(&"vector"));
        assert!(sources.contains(&"keyword"));
    }

    #[test]
    fn representative_tie_breaks_by_modality_priority_then_uri() {
        let config = FusionConfig::default();
        // Same rank-1 contribution from two lists; document must win over
        // audio as the representative of the merged row.
        let mut audio = row(Modality::Audio, "", "mm://z", 0.7);
        audio.primary_evidence_id = String::new();
        audio.uri = "mm://shared".into();
        audio.start_ms = Some(5);
        let mut doc = row(Modality::Document, "", "mm://shared", 0.7);
        doc.primary_evidence_id = String::new();
        doc.start_ms = Some(5);
        // Fallback keys include the modality, so force one shared key.
        let mut audio_keyed = audio.clone();
        audio_keyed.primary_evidence_id = "shared-ev".into();
        let mut doc_keyed = doc.clone();
        doc_keyed.primary_evidence_id = "shared-ev".into();

        let fused = fuse(
            &[
                SourceList::new("vector", Modality::Audio, vec![audio_keyed]),
                SourceList::new("vector", Modality::Document, vec![doc_keyed]),
            ],
            &config,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].modality, Modality::Document);
    }

    #[test]
    fn weight_version_flows_into_why() {
        let mut config = FusionConfig::default();
        config.weight_version = "v2".into();
        config.weights.insert("document".into(), 2.0);
        let fused = fuse(
            &[doc_list(vec![row(Modality::Document, "doc-1", "mm://a", 0.9)])],
            &config,
        );
        assert_eq!(fused[0].why[0].weight_version.as_deref(), Some("v2"));
        assert_eq!(fused[0].why[0].weight, Some(2.0));
    }

    proptest! {
        #[test]
        fn fused_scores_are_in_range_and_weakly_decreasing(
            scores_a in proptest::collection::vec(0.0f32..1.0, 0..8),
            scores_b in proptest::collection::vec(0.0f32..1.0, 0..8),
        ) {
            let config = FusionConfig::default();
            let list_a = doc_list(
                scores_a
                    .iter()
                    .enumerate()
                    .map(|(idx, &s)| row(Modality::Document, &format!("a-{idx}"), "mm://a", s))
                    .collect(),
            );
            let list_b = SourceList::new(
                "keyword",
                Modality::Transcript,
                scores_b
                    .iter()
                    .enumerate()
                    .map(|(idx, &s)| row(Modality::Transcript, &format!("b-{idx}"), "mm://b", s))
                    .collect(),
            );
            let input_len = list_a.results.len() + list_b.results.len();
            let fused = fuse(&[list_a, list_b], &config);
            prop_assert!(fused.len() <= input_len);
            for window in fused.windows(2) {
                prop_assert!(window[0].score >= window[1].score);
            }
            for item in &fused {
                prop_assert!((0.0..=1.0).contains(&item.score));
            }
        }
    }
}
