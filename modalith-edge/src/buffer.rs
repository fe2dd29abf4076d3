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

//! Durable, size- and age-capped upload spool.
//!
//! Each item is a payload file under `payloads/` plus a metadata JSON under
//! `meta/`. Both are written via temp-file + rename, so after a crash either
//! the whole pair is visible or the item does not exist. Orphan `.tmp` files
//! are never indexed. Metadata records whose payload is missing, and
//! metadata that fails to parse, are garbage-collected on the next scan.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EdgeBufferError {
    #[error("buffer I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("buffer metadata encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One spooled upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferItem {
    pub item_id: String,
    /// Milliseconds since the epoch.
    pub created_at_ms: u64,
    pub size_bytes: u64,
    pub payload_path: PathBuf,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl BufferItem {
    pub fn read_bytes(&self) -> Result<Vec<u8>, EdgeBufferError> {
        Ok(fs::read(&self.payload_path)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub count: usize,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_age_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_age_s: Option<f64>,
}

/// Result of one replay pass. Failure is sticky within a call: the first
/// rejected item stops the scan with everything after it still buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub success: usize,
    pub failed: usize,
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct EdgeBuffer {
    payload_dir: PathBuf,
    meta_dir: PathBuf,
    max_bytes: AtomicU64,
    ttl_seconds: AtomicU64,
    clock: Clock,
}

impl EdgeBuffer {
    pub fn open(
        base_dir: impl AsRef<Path>,
        max_bytes: u64,
        ttl_seconds: u64,
    ) -> Result<Self, EdgeBufferError> {
        Self::open_with_clock(base_dir, max_bytes, ttl_seconds, Arc::new(system_now_ms))
    }

    pub fn open_with_clock(
        base_dir: impl AsRef<Path>,
        max_bytes: u64,
        ttl_seconds: u64,
        clock: Clock,
    ) -> Result<Self, EdgeBufferError> {
        let base = base_dir.as_ref();
        let payload_dir = base.join("payloads");
        let meta_dir = base.join("meta");
        fs::create_dir_all(&payload_dir)?;
        fs::create_dir_all(&meta_dir)?;
        Ok(Self {
            payload_dir,
            meta_dir,
            max_bytes: AtomicU64::new(max_bytes),
            ttl_seconds: AtomicU64::new(ttl_seconds),
            clock,
        })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes.load(Ordering::Relaxed)
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds.load(Ordering::Relaxed)
    }

    pub fn set_max_bytes(&self, value: u64) {
        self.max_bytes.store(value, Ordering::Relaxed);
    }

    pub fn set_ttl_seconds(&self, value: u64) {
        self.ttl_seconds.store(value, Ordering::Relaxed);
    }

    /// Spool one payload. Payload lands before metadata, so a crash between
    /// the two renames leaves an unindexed payload file at worst.
    pub fn add(
        &self,
        payload: &[u8],
        metadata: BTreeMap<String, Value>,
    ) -> Result<BufferItem, EdgeBufferError> {
        let item_id = Uuid::new_v4().to_string();
        let created_at_ms = (self.clock)();
        let payload_path = self.payload_dir.join(format!("{item_id}.bin"));
        let meta_path = self.meta_path(&item_id);

        atomic_write(&payload_path, payload)?;
        let item = BufferItem {
            item_id,
            created_at_ms,
            size_bytes: payload.len() as u64,
            payload_path,
            metadata,
        };
        atomic_write(&meta_path, &serde_json::to_vec(&item)?)?;
        debug!(
            item_id = %item.item_id,
            size_bytes = item.size_bytes,
            "edge buffer item spooled"
        );

        self.prune()?;
        Ok(item)
    }

    /// All items, created-at ascending. Drops broken records as it scans.
    pub fn list(&self) -> Result<Vec<BufferItem>, EdgeBufferError> {
        let mut items = Vec::new();
        for entry in fs::read_dir(&self.meta_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable buffer metadata");
                    continue;
                }
            };
            let item: BufferItem = match serde_json::from_slice(&raw) {
                Ok(item) => item,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "dropping corrupt buffer metadata");
                    let _ = fs::remove_file(&path);
                    continue;
                }
            };
            if !item.payload_path.exists() {
                debug!(item_id = %item.item_id, "dropping metadata without payload");
                let _ = fs::remove_file(&path);
                continue;
            }
            items.push(item);
        }
        items.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(items)
    }

    pub fn stats(&self) -> Result<BufferStats, EdgeBufferError> {
        let items = self.list()?;
        if items.is_empty() {
            return Ok(BufferStats {
                count: 0,
                total_bytes: 0,
                oldest_age_s: None,
                newest_age_s: None,
            });
        }
        let now = (self.clock)();
        let total_bytes = items.iter().map(|item| item.size_bytes).sum();
        let oldest = items.first().map(|i| i.created_at_ms).unwrap_or(now);
        let newest = items.last().map(|i| i.created_at_ms).unwrap_or(now);
        Ok(BufferStats {
            count: items.len(),
            total_bytes,
            oldest_age_s: Some(age_s(now, oldest)),
            newest_age_s: Some(age_s(now, newest)),
        })
    }

    /// Expire items past the TTL, then evict oldest-first until the byte cap
    /// holds.
    pub fn prune(&self) -> Result<(), EdgeBufferError> {
        let items = self.list()?;
        if items.is_empty() {
            return Ok(());
        }
        let now = (self.clock)();
        let ttl_ms = self.ttl_seconds().saturating_mul(1000);
        for item in &items {
            if now.saturating_sub(item.created_at_ms) > ttl_ms {
                self.remove_item(item);
            }
        }

        let items = self.list()?;
        let mut total: u64 = items.iter().map(|item| item.size_bytes).sum();
        let max_bytes = self.max_bytes();
        if total <= max_bytes {
            return Ok(());
        }
        for item in &items {
            self.remove_item(item);
            total = total.saturating_sub(item.size_bytes);
            if total <= max_bytes {
                break;
            }
        }
        Ok(())
    }

    /// Replay items oldest-first through `send`. A `true` return deletes the
    /// item and continues; `false` stops the pass.
    pub fn replay<F>(&self, mut send: F) -> Result<ReplayOutcome, EdgeBufferError>
    where
        F: FnMut(&BufferItem) -> bool,
    {
        let mut success = 0;
        let mut failed = 0;
        for item in self.list()? {
            if send(&item) {
                self.remove_item(&item);
                success += 1;
            } else {
                failed += 1;
                break;
            }
        }
        Ok(ReplayOutcome { success, failed })
    }

    fn meta_path(&self, item_id: &str) -> PathBuf {
        self.meta_dir.join(format!("{item_id}.json"))
    }

    fn remove_item(&self, item: &BufferItem) {
        if let Err(err) = fs::remove_file(&item.payload_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(item_id = %item.item_id, error = %err, "failed to remove buffer payload");
            }
        }
        let meta_path = self.meta_path(&item.item_id);
        if let Err(err) = fs::remove_file(&meta_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(item_id = %item.item_id, error = %err, "failed to remove buffer metadata");
            }
        }
    }
}

fn age_s(now_ms: u64, created_ms: u64) -> f64 {
    now_ms.saturating_sub(created_ms) as f64 / 1000.0
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Write-to-temp plus rename on the same filesystem.
fn atomic_write(path: &Path, payload: &[u8]) -> Result<(), EdgeBufferError> {
    let tmp_path = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestClockCell;
    use tempfile::TempDir;

    fn test_buffer(max_bytes: u64, ttl_seconds: u64) -> (TempDir, EdgeBuffer, Arc<TestClockCell>) {
        let dir = TempDir::new().unwrap();
        let now = Arc::new(TestClockCell::new(1_000_000));
        let clock_now = now.clone();
        let buffer = EdgeBuffer::open_with_clock(
            dir.path(),
            max_bytes,
            ttl_seconds,
            Arc::new(move || clock_now.load(Ordering::Relaxed)),
        )
        .unwrap();
        (dir, buffer, now)
    }

    fn meta(filename: &str) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("filename".to_string(), Value::String(filename.into()));
        map.insert("modality".to_string(), Value::String("audio".into()));
        map
    }

    #[test]
    fn add_then_list_round_trips() {
        let (_dir, buffer, _) = test_buffer(1024, 60);
        let item = buffer.add(b"hi", meta("a.wav")).unwrap();
        let listed = buffer.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].item_id, item.item_id);
        assert_eq!(listed[0].size_bytes, 2);
        assert_eq!(listed[0].read_bytes().unwrap(), b"hi");
    }

    #[test]
    fn list_orders_by_created_at() {
        let (_dir, buffer, now) = test_buffer(1 << 20, 3600);
        let first = buffer.add(b"one", meta("1.bin")).unwrap();
        now.fetch_add(1000, Ordering::Relaxed);
        let second = buffer.add(b"two", meta("2.bin")).unwrap();
        now.fetch_add(1000, Ordering::Relaxed);
        let third = buffer.add(b"three", meta("3.bin")).unwrap();

        let ids: Vec<_> = buffer
            .list()
            .unwrap()
            .into_iter()
            .map(|i| i.item_id)
            .collect();
        assert_eq!(ids, vec![first.item_id, second.item_id, third.item_id]);
    }

    #[test]
    fn missing_payload_drops_metadata() {
        let (_dir, buffer, _) = test_buffer(1024, 60);
        let item = buffer.add(b"gone", meta("x.bin")).unwrap();
        fs::remove_file(&item.payload_path).unwrap();
        assert!(buffer.list().unwrap().is_empty());
        // The metadata record was garbage-collected too.
        assert!(!buffer.meta_path(&item.item_id).exists());
    }

    #[test]
    fn corrupt_metadata_only_drops_that_item() {
        let (_dir, buffer, _) = test_buffer(1024, 60);
        let keep = buffer.add(b"keep", meta("keep.bin")).unwrap();
        let broken = buffer.add(b"broken", meta("broken.bin")).unwrap();
        fs::write(buffer.meta_path(&broken.item_id), b"{not json").unwrap();

        let listed = buffer.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].item_id, keep.item_id);
    }

    #[test]
    fn ttl_prune_removes_expired_items() {
        let (_dir, buffer, now) = test_buffer(1 << 20, 10);
        buffer.add(b"old", meta("old.bin")).unwrap();
        now.fetch_add(11_000, Ordering::Relaxed);
        let fresh = buffer.add(b"fresh", meta("fresh.bin")).unwrap();

        let listed = buffer.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].item_id, fresh.item_id);
    }

    #[test]
    fn byte_cap_evicts_oldest_first() {
        let (_dir, buffer, now) = test_buffer(10, 3600);
        buffer.add(b"aaaa", meta("a.bin")).unwrap();
        now.fetch_add(1000, Ordering::Relaxed);
        let b = buffer.add(b"bbbb", meta("b.bin")).unwrap();
        now.fetch_add(1000, Ordering::Relaxed);
        let c = buffer.add(b"cccc", meta("c.bin")).unwrap();

        let listed = buffer.list().unwrap();
        let ids: Vec<_> = listed.iter().map(|i| i.item_id.clone()).collect();
        assert_eq!(ids, vec![b.item_id, c.item_id]);
        let stats = buffer.stats().unwrap();
        assert!(stats.total_bytes <= 10);
    }

    #[test]
    fn replay_stops_at_first_failure() {
        let (_dir, buffer, now) = test_buffer(1 << 20, 3600);
        buffer.add(b"one", meta("1.bin")).unwrap();
        now.fetch_add(1000, Ordering::Relaxed);
        buffer.add(b"two", meta("2.bin")).unwrap();
        now.fetch_add(1000, Ordering::Relaxed);
        buffer.add(b"three", meta("3.bin")).unwrap();

        let mut seen = Vec::new();
        let outcome = buffer
            .replay(|item| {
                seen.push(item.item_id.clone());
                seen.len() < 2
            })
            .unwrap();
        assert_eq!(outcome, ReplayOutcome { success: 1, failed: 1 });
        assert_eq!(seen.len(), 2);
        // The failed item and everything after it stay buffered.
        assert_eq!(buffer.list().unwrap().len(), 2);
    }

    #[test]
    fn replay_drains_in_order() {
        let (_dir, buffer, now) = test_buffer(1 << 20, 3600);
        let mut expected = Vec::new();
        for idx in 0..4 {
            expected.push(
                buffer
                    .add(format!("p{idx}").as_bytes(), meta("p.bin"))
                    .unwrap()
                    .item_id,
            );
            now.fetch_add(500, Ordering::Relaxed);
        }
        let mut seen = Vec::new();
        let outcome = buffer
            .replay(|item| {
                seen.push(item.item_id.clone());
                true
            })
            .unwrap();
        assert_eq!(outcome, ReplayOutcome { success: 4, failed: 0 });
        assert_eq!(seen, expected);
        assert_eq!(buffer.stats().unwrap().count, 0);
    }

    #[test]
    fn orphan_temp_files_are_not_indexed() {
        let (_dir, buffer, _) = test_buffer(1024, 60);
        fs::write(buffer.meta_dir.join("orphan.json.tmp"), b"{}").unwrap();
        fs::write(buffer.payload_dir.join("orphan.bin.tmp"), b"junk").unwrap();
        assert!(buffer.list().unwrap().is_empty());
    }

    #[test]
    fn stats_report_ages() {
        let (_dir, buffer, now) = test_buffer(1 << 20, 3600);
        buffer.add(b"old", meta("old.bin")).unwrap();
        now.fetch_add(5_000, Ordering::Relaxed);
        buffer.add(b"new", meta("new.bin")).unwrap();
        now.fetch_add(1_000, Ordering::Relaxed);

        let stats = buffer.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.oldest_age_s, Some(6.0));
        assert_eq!(stats.newest_age_s, Some(1.0));
    }
}
