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

//! Query request and result records.
//!
//! `QueryRequest` is the wire shape of `POST /query`; `QueryResult` is the
//! internal candidate row flowing from the generators through fusion, rerank
//! and shaping; `QueryHit` is the row as emitted to clients.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upper bound on `top_k`.
pub const MAX_TOP_K: usize = 50;

/// Retrieval modality of a candidate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Document,
    Transcript,
    Image,
    Audio,
}

impl Modality {
    pub const ALL: [Modality; 4] = [
        Modality::Document,
        Modality::Transcript,
        Modality::Image,
        Modality::Audio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Document => "document",
            Modality::Transcript => "transcript",
            Modality::Image => "image",
            Modality::Audio => "audio",
        }
    }

    /// Tie-break priority when merging evidence: lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            Modality::Document => 0,
            Modality::Transcript => 1,
            Modality::Image => 2,
            Modality::Audio => 3,
        }
    }

    pub fn is_text_bearing(self) -> bool {
        matches!(self, Modality::Document | Modality::Transcript)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ();

    /// `vision` is accepted as an alias of `image`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(Modality::Document),
            "transcript" => Ok(Modality::Transcript),
            "image" | "vision" => Ok(Modality::Image),
            "audio" => Ok(Modality::Audio),
            _ => Err(()),
        }
    }
}

/// Coarse modality selector, mutually exclusive with an explicit modality set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Text,
    Image,
    Audio,
    All,
}

impl FromStr for QueryMode {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(QueryMode::Text),
            "image" => Ok(QueryMode::Image),
            "audio" => Ok(QueryMode::Audio),
            "all" => Ok(QueryMode::All),
            _ => Err(()),
        }
    }
}

impl QueryMode {
    pub fn modalities(self) -> Vec<Modality> {
        match self {
            QueryMode::Text => vec![Modality::Document, Modality::Transcript],
            QueryMode::Image => vec![Modality::Image],
            QueryMode::Audio => vec![Modality::Audio],
            QueryMode::All => Modality::ALL.to_vec(),
        }
    }
}

/// How candidates are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    Keyword,
    Metadata,
}

impl FromStr for SearchType {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(SearchType::Vector),
            "keyword" => Ok(SearchType::Keyword),
            "metadata" => Ok(SearchType::Metadata),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchType::Vector => "vector",
            SearchType::Keyword => "keyword",
            SearchType::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

fn default_top_k() -> usize {
    5
}

/// Body of `POST /query`.
///
/// `mode` / `modalities` / `search_type` stay raw strings here so validation
/// can emit the typed error codes instead of a serde parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_filters: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            query_text: None,
            image_base64: None,
            top_k: default_top_k(),
            mode: None,
            modalities: None,
            search_type: None,
            metadata_filters: None,
            page_limit: None,
            page_token: None,
            group_by: None,
            sort_by: None,
        }
    }
}

/// Stable reference to an evidence unit backing a candidate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Key kind, e.g. `doc_chunk_id` or `frame_id`.
    pub kind: String,
    pub id: String,
}

impl EvidenceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// One fusion provenance entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhyEntry {
    /// Contributing source, e.g. `vector`, `keyword`, `rerank`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_version: Option<String>,
}

impl WhyEntry {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            modality: None,
            raw_score: None,
            rank: None,
            weight: None,
            weight_version: None,
        }
    }
}

/// Internal candidate row. `primary_evidence_id` is the fusion key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub modality: Modality,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_uri: Option<String>,
    pub score: f32,
    pub media_asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub primary_evidence_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_refs: Vec<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub why: Vec<WhyEntry>,
}

impl QueryResult {
    /// Equivalence key for fusion when `primary_evidence_id` is empty.
    pub fn fusion_key(&self) -> String {
        if !self.primary_evidence_id.is_empty() {
            return self.primary_evidence_id.clone();
        }
        format!(
            "{}|{}|{}",
            self.modality,
            self.uri,
            self.start_ms.map(|v| v.to_string()).unwrap_or_default()
        )
    }
}

/// Candidate row as emitted to clients, after redaction and shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub modality: Modality,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_uri: Option<String>,
    pub score: f32,
    pub media_asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub primary_evidence_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_refs: Vec<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub why: Vec<WhyEntry>,
}

impl From<QueryResult> for QueryHit {
    fn from(row: QueryResult) -> Self {
        let highlight_text = row.snippet.clone();
        Self {
            modality: row.modality,
            uri: row.uri,
            snippet: row.snippet,
            highlight_text,
            start_ms: row.start_ms,
            end_ms: row.end_ms,
            thumbnail_uri: row.thumbnail_uri,
            score: row.score,
            media_asset_id: row.media_asset_id,
            media_type: row.media_type,
            primary_evidence_id: row.primary_evidence_id,
            evidence_refs: row.evidence_refs,
            why: row.why,
        }
    }
}

/// One collapsed parent when grouping by video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedVideo {
    pub asset_id: String,
    pub clip_count: usize,
    pub moments: Vec<QueryHit>,
}

/// Grouping summary emitted alongside the flat result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grouping {
    pub total_videos: usize,
    pub total_moments: usize,
    pub videos: Vec<GroupedVideo>,
}

/// Response metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub fusion_method: String,
    pub weight_version: String,
    pub snapshot_marker: String,
    pub trace_id: String,
}

/// Body of the `POST /query` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
    pub meta: ResponseMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_parsing_accepts_vision_alias() {
        assert_eq!("vision".parse::<Modality>(), Ok(Modality::Image));
        assert_eq!("Document".parse::<Modality>(), Ok(Modality::Document));
        assert!("hologram".parse::<Modality>().is_err());
    }

    #[test]
    fn mode_expands_to_modalities() {
        assert_eq!(
            QueryMode::Text.modalities(),
            vec![Modality::Document, Modality::Transcript]
        );
        assert_eq!(QueryMode::All.modalities().len(), 4);
    }

    #[test]
    fn unknown_request_fields_are_rejected() {
        let raw = r#"{"query_text":"hello","unknown_field":1}"#;
        assert!(serde_json::from_str::<QueryRequest>(raw).is_err());
    }

    #[test]
    fn fusion_key_falls_back_to_location() {
        let row = QueryResult {
            modality: Modality::Image,
            uri: "mm://asset/1".into(),
            snippet: None,
            start_ms: Some(1500),
            end_ms: None,
            thumbnail_uri: None,
            score: 0.5,
            media_asset_id: "asset-1".into(),
            media_type: None,
            primary_evidence_id: String::new(),
            evidence_refs: vec![],
            why: vec![],
        };
        assert_eq!(row.fusion_key(), "image|mm://asset/1|1500");
    }

    #[test]
    fn modality_priority_orders_document_first() {
        let mut all = Modality::ALL.to_vec();
        all.sort_by_key(|m| m.priority());
        assert_eq!(all[0], Modality::Document);
        assert_eq!(all[3], Modality::Audio);
    }
}
