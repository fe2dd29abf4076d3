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

//! Snapshot loading: copy the database file to a deterministic local path,
//! ingest the optional JSON sidecar, open the engine, and record `loaded_at`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use super::Snapshot;
use crate::error::{QueryError, Result};

/// An opened, immutable snapshot plus its provenance. Replaced atomically by
/// the slot, never mutated in place.
pub struct SnapshotDescriptor {
    pub local_path: PathBuf,
    pub metadata: BTreeMap<String, Value>,
    pub loaded_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

impl SnapshotDescriptor {
    /// Stable identifier of the snapshot's contents, used in pagination
    /// cursors and logs.
    pub fn marker(&self) -> String {
        for key in [
            "manifest_fingerprint",
            "snapshot_manifest_count",
            "manifest_count",
            "snapshot_uri",
        ] {
            if let Some(value) = self.metadata.get(key) {
                match value {
                    Value::String(text) if !text.is_empty() => return text.clone(),
                    Value::Null => {}
                    other => return other.to_string(),
                }
            }
        }
        self.loaded_at.to_rfc3339()
    }

    pub fn age_seconds(&self) -> f64 {
        (Utc::now() - self.loaded_at).num_milliseconds() as f64 / 1000.0
    }
}

fn strip_file_scheme(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

/// Copy the snapshot file (local or `file://` URI) into `dest_dir`, read the
/// `<file>.json` sidecar if present, and open the engine against the copy.
pub fn load_snapshot(snapshot_uri: &str, dest_dir: impl AsRef<Path>) -> Result<SnapshotDescriptor> {
    if snapshot_uri.is_empty() {
        return Err(QueryError::Validation("snapshot URI is required".into()));
    }
    let started = Instant::now();
    let source = PathBuf::from(strip_file_scheme(snapshot_uri));
    if !source.exists() {
        return Err(QueryError::Internal(format!(
            "snapshot file not found: {}",
            source.display()
        )));
    }
    let dest_dir = dest_dir.as_ref();
    fs::create_dir_all(dest_dir)?;
    let file_name = source
        .file_name()
        .ok_or_else(|| QueryError::Validation(format!("snapshot URI has no file name: {snapshot_uri}")))?;
    let local_path = dest_dir.join(file_name);
    if source.canonicalize()? != local_path.canonicalize().unwrap_or_default() {
        fs::copy(&source, &local_path)?;
    }

    let sidecar_path = PathBuf::from(format!("{}.json", source.display()));
    let metadata = read_sidecar(&sidecar_path)?;

    let snapshot = Snapshot::open(&local_path)?;
    let loaded_at = Utc::now();
    let snapshot_size = fs::metadata(&local_path).map(|m| m.len()).ok();
    info!(
        snapshot_path = %local_path.display(),
        snapshot_loaded_at = %loaded_at.to_rfc3339(),
        snapshot_load_ms = started.elapsed().as_millis() as u64,
        snapshot_size_bytes = snapshot_size,
        "snapshot loaded"
    );
    Ok(SnapshotDescriptor {
        local_path,
        metadata,
        loaded_at,
        snapshot,
    })
}

fn read_sidecar(path: &Path) -> Result<BTreeMap<String, Value>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read(path)?;
    let value: Value =
        serde_json::from_slice(&raw).map_err(|err| QueryError::Decode(err.to_string()))?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(BTreeMap::new()),
    }
}

/// Startup probe: open the engine against the healthcheck artifact and
/// execute one trivial read. A missing local artifact is skipped.
pub fn healthcheck(artifact: Option<&Path>) -> Result<()> {
    let Some(path) = artifact else {
        return Ok(());
    };
    if !path.exists() {
        info!(path = %path.display(), "healthcheck artifact missing; skipping");
        return Ok(());
    }
    let started = Instant::now();
    let snapshot = Snapshot::open(path)?;
    let rows = snapshot.row_count();
    info!(
        healthcheck_ms = started.elapsed().as_millis() as u64,
        healthcheck_rows = rows,
        "snapshot engine healthcheck completed"
    );
    Ok(())
}
