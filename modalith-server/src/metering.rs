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

//! Usage metering sink.
//!
//! Usage records append as JSON lines under `<graph_root>/usage/`. Metering
//! must never fail the metered operation: callers log and swallow errors.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use modalith_core::TenantScope;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<TenantScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    pub modality: String,
    pub units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_in: Option<u64>,
    pub pipeline_version: String,
    pub schema_version: String,
    pub recorded_at: chrono::DateTime<Utc>,
}

pub struct UsageSink {
    enabled: bool,
    usage_dir: PathBuf,
}

impl UsageSink {
    pub fn new(graph_root: &std::path::Path, enabled: bool) -> Self {
        Self {
            enabled,
            usage_dir: graph_root.join("usage"),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Append one record. Callers treat errors as log-and-continue.
    pub fn record(&self, record: &UsageRecord) -> std::io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        std::fs::create_dir_all(&self.usage_dir)?;
        let path = self.usage_dir.join("usage.jsonl");
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&line)
    }

    /// The swallow-on-failure wrapper handlers call.
    pub fn record_usage(&self, record: UsageRecord) {
        if let Err(err) = self.record(&record) {
            warn!(error = %err, "failed to record usage");
        }
    }
}
