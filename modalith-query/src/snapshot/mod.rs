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

//! Read-only analytical snapshot.
//!
//! On disk a snapshot is a little-endian `u32` header length, a JSON header
//! (`magic`, `format_version`), and a bincode-encoded [`SnapshotTables`]
//! body. Queries never touch raw bytes; they go through [`Snapshot`], which
//! holds the decoded tables and an asset index. The file is written by the
//! ingestion side and opened read-only here.

mod loader;
mod slot;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

pub use loader::{healthcheck, load_snapshot, SnapshotDescriptor};
pub use slot::SnapshotSlot;

pub const SNAPSHOT_MAGIC: &str = "modalith-snapshot";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    magic: String,
    format_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: String,
    pub uri: String,
    pub media_type: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChunk {
    pub id: String,
    pub media_asset_id: String,
    pub content: String,
    pub text_vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub media_asset_id: String,
    pub content: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text_vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub id: String,
    pub media_asset_id: String,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub thumbnail_uri: Option<String>,
    pub clip_vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub id: String,
    pub media_asset_id: String,
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub end_ms: Option<i64>,
    pub clap_vector: Vec<f32>,
}

/// The five columnar tables of one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTables {
    pub media_assets: Vec<MediaAsset>,
    pub doc_chunks: Vec<DocChunk>,
    pub transcripts: Vec<Transcript>,
    pub image_frames: Vec<ImageFrame>,
    pub audio_clips: Vec<AudioClip>,
}

impl SnapshotTables {
    pub fn row_count(&self) -> usize {
        self.media_assets.len()
            + self.doc_chunks.len()
            + self.transcripts.len()
            + self.image_frames.len()
            + self.audio_clips.len()
    }

    /// Serialize to the snapshot file format. Used by the ingestion side and
    /// test fixtures.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let header = serde_json::to_vec(&SnapshotHeader {
            magic: SNAPSHOT_MAGIC.to_string(),
            format_version: SNAPSHOT_FORMAT_VERSION,
        })
        .map_err(|err| QueryError::Internal(err.to_string()))?;
        let body = bincode::serialize(self).map_err(|err| QueryError::Decode(err.to_string()))?;
        let mut buf = Vec::with_capacity(4 + header.len() + body.len());
        buf.extend_from_slice(&(header.len() as u32).to_le_bytes());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&body);

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("db.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Decoded snapshot plus the asset index the generators join against.
pub struct Snapshot {
    tables: SnapshotTables,
    assets_by_id: HashMap<String, usize>,
}

impl Snapshot {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read(path.as_ref())?;
        if raw.len() < 4 {
            return Err(QueryError::Decode("snapshot file truncated".into()));
        }
        let header_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if raw.len() < 4 + header_len {
            return Err(QueryError::Decode("snapshot header truncated".into()));
        }
        let header: SnapshotHeader = serde_json::from_slice(&raw[4..4 + header_len])
            .map_err(|err| QueryError::Decode(format!("snapshot header: {err}")))?;
        if header.magic != SNAPSHOT_MAGIC {
            return Err(QueryError::Decode(format!(
                "unexpected snapshot magic: {}",
                header.magic
            )));
        }
        if header.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(QueryError::Decode(format!(
                "unsupported snapshot format version: {}",
                header.format_version
            )));
        }
        let tables: SnapshotTables = bincode::deserialize(&raw[4 + header_len..])
            .map_err(|err| QueryError::Decode(err.to_string()))?;
        Ok(Self::from_tables(tables))
    }

    pub fn from_tables(tables: SnapshotTables) -> Self {
        let assets_by_id = tables
            .media_assets
            .iter()
            .enumerate()
            .map(|(idx, asset)| (asset.id.clone(), idx))
            .collect();
        Self {
            tables,
            assets_by_id,
        }
    }

    pub fn tables(&self) -> &SnapshotTables {
        &self.tables
    }

    pub fn asset(&self, media_asset_id: &str) -> Option<&MediaAsset> {
        self.assets_by_id
            .get(media_asset_id)
            .map(|&idx| &self.tables.media_assets[idx])
    }

    /// Trivial read used by the startup healthcheck.
    pub fn row_count(&self) -> usize {
        self.tables.row_count()
    }
}
