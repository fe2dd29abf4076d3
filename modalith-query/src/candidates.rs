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

//! Candidate generators, one per search type and modality pair.
//!
//! Every generator returns at most `top_k` rows, sorted by descending score,
//! each row a complete `QueryResult` with its `primary_evidence_id`. Rows
//! whose media asset falls outside the caller's tenant scope never leave the
//! generator.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use base64::Engine as _;
use modalith_core::{EvidenceRef, Modality, QueryResult, TenantScope, WhyEntry};
use serde_json::json;

use crate::embed::cosine_distance;
use crate::embed::EmbedderSet;
use crate::engine::TraceMap;
use crate::error::{QueryError, Result};
use crate::fusion::SourceList;
use crate::snapshot::{MediaAsset, Snapshot};

fn clamp_score(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn score_from_distance(distance: f32) -> f32 {
    clamp_score(1.0 - distance)
}

fn asset_visible(asset: &MediaAsset, scope: Option<&TenantScope>) -> bool {
    match scope {
        None => true,
        Some(scope) => scope.permits(
            asset.org_id.as_deref(),
            asset.site_id.as_deref(),
            asset.stream_id.as_deref(),
        ),
    }
}

fn vector_why(modality: Modality, score: f32) -> Vec<WhyEntry> {
    vec![WhyEntry {
        source: "vector".to_string(),
        modality: Some(modality.as_str().to_string()),
        raw_score: Some(score),
        rank: None,
        weight: None,
        weight_version: None,
    }]
}

/// Generic vector probe: score candidates by cosine distance, keep `top_k`.
fn probe<'a, T, I>(
    rows: I,
    query_vec: &[f32],
    vector_of: impl Fn(&'a T) -> &'a [f32],
    top_k: usize,
) -> Vec<(&'a T, f32)>
where
    I: Iterator<Item = &'a T>,
{
    let mut scored: Vec<(&T, f32)> = rows
        .map(|row| (row, cosine_distance(query_vec, vector_of(row))))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(top_k);
    scored
        .into_iter()
        .map(|(row, distance)| (row, score_from_distance(distance)))
        .collect()
}

fn record_probe(trace: &mut TraceMap, prefix: &str, started: Instant, rows: usize) {
    trace.insert(
        format!("{prefix}_query_ms"),
        json!(started.elapsed().as_secs_f64() * 1000.0),
    );
    trace.insert(format!("{prefix}_rows"), json!(rows));
}

fn record_embed(trace: &mut TraceMap, key: &str, started: Instant) {
    trace.insert(
        key.to_string(),
        json!(started.elapsed().as_secs_f64() * 1000.0),
    );
}

/// Text-query vector fan-out across the requested modalities.
pub fn search_text_vector(
    snapshot: &Snapshot,
    embedders: &EmbedderSet,
    query_text: &str,
    modalities: &BTreeSet<Modality>,
    top_k: usize,
    scope: Option<&TenantScope>,
    trace: &mut TraceMap,
) -> Vec<SourceList> {
    let mut lists = Vec::new();
    let need_text = modalities.contains(&Modality::Document)
        || modalities.contains(&Modality::Transcript);

    if need_text {
        let embed_start = Instant::now();
        let text_vec = embedders.text.encode(query_text);
        record_embed(trace, "text_embed_ms", embed_start);

        if modalities.contains(&Modality::Document) {
            let started = Instant::now();
            let results: Vec<QueryResult> = probe(
                snapshot.tables().doc_chunks.iter().filter(|chunk| {
                    snapshot
                        .asset(&chunk.media_asset_id)
                        .map(|asset| asset_visible(asset, scope))
                        .unwrap_or(false)
                }),
                &text_vec,
                |chunk| chunk.text_vector.as_slice(),
                top_k,
            )
            .into_iter()
            .filter_map(|(chunk, score)| {
                let asset = snapshot.asset(&chunk.media_asset_id)?;
                Some(QueryResult {
                    modality: Modality::Document,
                    uri: asset.uri.clone(),
                    snippet: Some(chunk.content.clone()),
                    start_ms: None,
                    end_ms: None,
                    thumbnail_uri: None,
                    score,
                    media_asset_id: asset.id.clone(),
                    media_type: Some(asset.media_type.clone()),
                    primary_evidence_id: chunk.id.clone(),
                    evidence_refs: vec![EvidenceRef::new("doc_chunk_id", &chunk.id)],
                    why: vector_why(Modality::Document, score),
                })
            })
            .collect();
            record_probe(trace, "doc", started, results.len());
            lists.push(SourceList::new("vector", Modality::Document, results));
        }

        if modalities.contains(&Modality::Transcript) {
            let started = Instant::now();
            let results: Vec<QueryResult> = probe(
                snapshot.tables().transcripts.iter().filter(|tr| {
                    snapshot
                        .asset(&tr.media_asset_id)
                        .map(|asset| asset_visible(asset, scope))
                        .unwrap_or(false)
                }),
                &text_vec,
                |tr| tr.text_vector.as_slice(),
                top_k,
            )
            .into_iter()
            .filter_map(|(tr, score)| {
                let asset = snapshot.asset(&tr.media_asset_id)?;
                Some(QueryResult {
                    modality: Modality::Transcript,
                    uri: asset.uri.clone(),
                    snippet: Some(tr.content.clone()),
                    start_ms: Some(tr.start_ms),
                    end_ms: Some(tr.end_ms),
                    thumbnail_uri: None,
                    score,
                    media_asset_id: asset.id.clone(),
                    media_type: Some(asset.media_type.clone()),
                    primary_evidence_id: tr.id.clone(),
                    evidence_refs: vec![EvidenceRef::new("transcript_id", &tr.id)],
                    why: vector_why(Modality::Transcript, score),
                })
            })
            .collect();
            record_probe(trace, "transcript", started, results.len());
            lists.push(SourceList::new("vector", Modality::Transcript, results));
        }
    }

    if modalities.contains(&Modality::Image) {
        let embed_start = Instant::now();
        let clip_vec = embedders.image_text.encode(query_text);
        record_embed(trace, "image_text_embed_ms", embed_start);

        let started = Instant::now();
        let results = image_probe(snapshot, &clip_vec, top_k, scope);
        record_probe(trace, "image", started, results.len());
        lists.push(SourceList::new("vector", Modality::Image, results));
    }

    if modalities.contains(&Modality::Audio) {
        let embed_start = Instant::now();
        let clap_vec = embedders.audio_text.encode(query_text);
        record_embed(trace, "audio_text_embed_ms", embed_start);

        let started = Instant::now();
        let results: Vec<QueryResult> = probe(
            snapshot.tables().audio_clips.iter().filter(|clip| {
                snapshot
                    .asset(&clip.media_asset_id)
                    .map(|asset| asset_visible(asset, scope))
                    .unwrap_or(false)
            }),
            &clap_vec,
            |clip| clip.clap_vector.as_slice(),
            top_k,
        )
        .into_iter()
        .filter_map(|(clip, score)| {
            let asset = snapshot.asset(&clip.media_asset_id)?;
            Some(QueryResult {
                modality: Modality::Audio,
                uri: asset.uri.clone(),
                snippet: None,
                start_ms: clip.start_ms,
                end_ms: clip.end_ms,
                thumbnail_uri: None,
                score,
                media_asset_id: asset.id.clone(),
                media_type: Some(asset.media_type.clone()),
                primary_evidence_id: clip.id.clone(),
                evidence_refs: vec![EvidenceRef::new("clip_id", &clip.id)],
                why: vector_why(Modality::Audio, score),
            })
        })
        .collect();
        record_probe(trace, "audio", started, results.len());
        lists.push(SourceList::new("vector", Modality::Audio, results));
    }

    lists
}

fn image_probe(
    snapshot: &Snapshot,
    query_vec: &[f32],
    top_k: usize,
    scope: Option<&TenantScope>,
) -> Vec<QueryResult> {
    probe(
        snapshot.tables().image_frames.iter().filter(|frame| {
            snapshot
                .asset(&frame.media_asset_id)
                .map(|asset| asset_visible(asset, scope))
                .unwrap_or(false)
        }),
        query_vec,
        |frame| frame.clip_vector.as_slice(),
        top_k,
    )
    .into_iter()
    .filter_map(|(frame, score)| {
        let asset = snapshot.asset(&frame.media_asset_id)?;
        Some(QueryResult {
            modality: Modality::Image,
            uri: asset.uri.clone(),
            snippet: None,
            start_ms: frame.timestamp_ms,
            end_ms: frame.timestamp_ms,
            thumbnail_uri: frame.thumbnail_uri.clone(),
            score,
            media_asset_id: asset.id.clone(),
            media_type: Some(asset.media_type.clone()),
            primary_evidence_id: frame.id.clone(),
            evidence_refs: vec![EvidenceRef::new("frame_id", &frame.id)],
            why: vector_why(Modality::Image, score),
        })
    })
    .collect()
}

fn decode_base64_image(payload: &str) -> Result<Vec<u8>> {
    let cleaned = payload.trim();
    let cleaned = match cleaned.split_once(',') {
        Some((prefix, rest)) if prefix.to_ascii_lowercase().starts_with("data:") => rest,
        _ => cleaned,
    };
    base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|_| QueryError::Validation("Invalid image_base64 payload".into()))
}

/// Image-for-image vector probe.
pub fn search_image_vector(
    snapshot: &Snapshot,
    embedders: &EmbedderSet,
    image_base64: &str,
    top_k: usize,
    scope: Option<&TenantScope>,
    trace: &mut TraceMap,
) -> Result<SourceList> {
    let decode_start = Instant::now();
    let bytes = decode_base64_image(image_base64)?;
    record_embed(trace, "image_decode_ms", decode_start);

    let embed_start = Instant::now();
    let vector = embedders.image.encode_bytes(&bytes);
    record_embed(trace, "image_embed_ms", embed_start);

    let started = Instant::now();
    let results = image_probe(snapshot, &vector, top_k, scope);
    record_probe(trace, "image", started, results.len());
    Ok(SourceList::new("vector", Modality::Image, results))
}

/// Occurrence count of query tokens in the content token stream.
fn match_count(query_tokens: &[String], content: &str) -> usize {
    if query_tokens.is_empty() {
        return 0;
    }
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .filter(|token| query_tokens.contains(token))
        .count()
}

/// Deterministic keyword score: monotonic non-decreasing in the match count,
/// damped by chunk length so short exact hits outrank long diffuse ones.
fn keyword_score(matches: usize, content_len: usize) -> f32 {
    if matches == 0 {
        return 0.0;
    }
    let m = matches as f32;
    let length_damping = 1.0 / (1.0 + content_len as f32 / 2048.0);
    clamp_score((m / (m + 1.0)) * length_damping.max(0.25))
}

/// Keyword search over document chunks and transcripts.
pub fn search_keyword(
    snapshot: &Snapshot,
    query_text: &str,
    top_k: usize,
    scope: Option<&TenantScope>,
    trace: &mut TraceMap,
) -> Vec<SourceList> {
    let query_tokens: Vec<String> = query_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect();

    let started = Instant::now();
    let mut doc_results: Vec<QueryResult> = snapshot
        .tables()
        .doc_chunks
        .iter()
        .filter_map(|chunk| {
            let asset = snapshot.asset(&chunk.media_asset_id)?;
            if !asset_visible(asset, scope) {
                return None;
            }
            let matches = match_count(&query_tokens, &chunk.content);
            if matches == 0 {
                return None;
            }
            let score = keyword_score(matches, chunk.content.len());
            Some(QueryResult {
                modality: Modality::Document,
                uri: asset.uri.clone(),
                snippet: Some(chunk.content.clone()),
                start_ms: None,
                end_ms: None,
                thumbnail_uri: None,
                score,
                media_asset_id: asset.id.clone(),
                media_type: Some(asset.media_type.clone()),
                primary_evidence_id: chunk.id.clone(),
                evidence_refs: vec![EvidenceRef::new("doc_chunk_id", &chunk.id)],
                why: vec![WhyEntry {
                    source: "keyword".to_string(),
                    modality: Some("document".to_string()),
                    raw_score: Some(score),
                    rank: None,
                    weight: None,
                    weight_version: None,
                }],
            })
        })
        .collect();
    doc_results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.primary_evidence_id.cmp(&b.primary_evidence_id))
    });
    doc_results.truncate(top_k);
    record_probe(trace, "doc", started, doc_results.len());

    let started = Instant::now();
    let mut transcript_results: Vec<QueryResult> = snapshot
        .tables()
        .transcripts
        .iter()
        .filter_map(|tr| {
            let asset = snapshot.asset(&tr.media_asset_id)?;
            if !asset_visible(asset, scope) {
                return None;
            }
            let matches = match_count(&query_tokens, &tr.content);
            if matches == 0 {
                return None;
            }
            let score = keyword_score(matches, tr.content.len());
            Some(QueryResult {
                modality: Modality::Transcript,
                uri: asset.uri.clone(),
                snippet: Some(tr.content.clone()),
                start_ms: Some(tr.start_ms),
                end_ms: Some(tr.end_ms),
                thumbnail_uri: None,
                score,
                media_asset_id: asset.id.clone(),
                media_type: Some(asset.media_type.clone()),
                primary_evidence_id: tr.id.clone(),
                evidence_refs: vec![EvidenceRef::new("transcript_id", &tr.id)],
                why: vec![WhyEntry {
                    source: "keyword".to_string(),
                    modality: Some("transcript".to_string()),
                    raw_score: Some(score),
                    rank: None,
                    weight: None,
                    weight_version: None,
                }],
            })
        })
        .collect();
    transcript_results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.primary_evidence_id.cmp(&b.primary_evidence_id))
    });
    transcript_results.truncate(top_k);
    record_probe(trace, "transcript", started, transcript_results.len());

    vec![
        SourceList::new("keyword", Modality::Document, doc_results),
        SourceList::new("keyword", Modality::Transcript, transcript_results),
    ]
}

const METADATA_FILTER_KEYS: [&str; 5] = ["media_type", "org_id", "site_id", "stream_id", "uri"];

fn modality_for_media_type(media_type: &str) -> Modality {
    let lower = media_type.to_ascii_lowercase();
    if lower.starts_with("image") || lower.starts_with("video") {
        Modality::Image
    } else if lower.starts_with("audio") {
        Modality::Audio
    } else {
        Modality::Document
    }
}

/// Pure predicate match against the indexed media-asset columns. Filter keys
/// are validated against the allow-list.
pub fn search_metadata(
    snapshot: &Snapshot,
    filters: &BTreeMap<String, String>,
    top_k: usize,
    scope: Option<&TenantScope>,
    trace: &mut TraceMap,
) -> Result<SourceList> {
    for key in filters.keys() {
        if !METADATA_FILTER_KEYS.contains(&key.as_str()) {
            return Err(QueryError::Validation(format!(
                "Unknown metadata filter key: {key} (allowed: {})",
                METADATA_FILTER_KEYS.join(", ")
            )));
        }
    }

    let matches_filter = |asset: &MediaAsset| -> bool {
        filters.iter().all(|(key, expected)| match key.as_str() {
            "media_type" => asset.media_type == *expected,
            "org_id" => asset.org_id.as_deref() == Some(expected.as_str()),
            "site_id" => asset.site_id.as_deref() == Some(expected.as_str()),
            "stream_id" => asset.stream_id.as_deref() == Some(expected.as_str()),
            "uri" => asset.uri == *expected,
            _ => false,
        })
    };

    let started = Instant::now();
    let mut results: Vec<QueryResult> = snapshot
        .tables()
        .media_assets
        .iter()
        .filter(|asset| asset_visible(asset, scope) && matches_filter(asset))
        .map(|asset| QueryResult {
            modality: modality_for_media_type(&asset.media_type),
            uri: asset.uri.clone(),
            snippet: None,
            start_ms: None,
            end_ms: None,
            thumbnail_uri: None,
            score: 1.0,
            media_asset_id: asset.id.clone(),
            media_type: Some(asset.media_type.clone()),
            primary_evidence_id: asset.id.clone(),
            evidence_refs: vec![EvidenceRef::new("media_asset_id", &asset.id)],
            why: vec![WhyEntry {
                source: "metadata".to_string(),
                modality: None,
                raw_score: Some(1.0),
                rank: None,
                weight: None,
                weight_version: None,
            }],
        })
        .collect();
    results.sort_by(|a, b| a.media_asset_id.cmp(&b.media_asset_id));
    results.truncate(top_k);
    record_probe(trace, "metadata", started, results.len());
    Ok(SourceList::new("metadata", Modality::Document, results))
}

const IMAGE_HINT_TERMS: [&str; 6] = ["video", "photo", "image", "picture", "frame", "screenshot"];
const AUDIO_HINT_TERMS: [&str; 4] = ["audio", "sound", "voice", "noise"];

/// Per-modality score multipliers derived from the query text.
pub fn modality_hints(query_text: &str) -> BTreeMap<Modality, f32> {
    let lowered = query_text.to_ascii_lowercase();
    let mut hints = BTreeMap::new();
    if IMAGE_HINT_TERMS.iter().any(|term| lowered.contains(term)) {
        hints.insert(Modality::Image, 1.2);
    }
    if AUDIO_HINT_TERMS.iter().any(|term| lowered.contains(term)) {
        hints.insert(Modality::Audio, 1.2);
    }
    hints
}

/// Applied after distance-to-score conversion and before fusion.
pub fn apply_modality_hints(lists: &mut [SourceList], hints: &BTreeMap<Modality, f32>) {
    if hints.is_empty() {
        return;
    }
    for list in lists.iter_mut() {
        for row in list.results.iter_mut() {
            if let Some(multiplier) = hints.get(&row.modality) {
                row.score = clamp_score(row.score * multiplier);
            }
        }
    }
}
