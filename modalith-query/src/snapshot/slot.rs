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

//! The published-snapshot slot.
//!
//! Readers take an `Arc` handle and keep using it across one request while a
//! reload publishes a replacement. Reloads are single-flight: the reload
//! mutex is held for the whole load, so a second reload requested mid-flight
//! waits and then observes the fresh descriptor instead of copying again.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::loader::{load_snapshot, SnapshotDescriptor};
use crate::error::Result;

pub struct SnapshotSlot {
    current: RwLock<Option<Arc<SnapshotDescriptor>>>,
    reload_lock: Mutex<()>,
    dest_dir: PathBuf,
}

impl SnapshotSlot {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            current: RwLock::new(None),
            reload_lock: Mutex::new(()),
            dest_dir: dest_dir.into(),
        }
    }

    /// Current descriptor, if a load has succeeded.
    pub fn get(&self) -> Option<Arc<SnapshotDescriptor>> {
        self.current.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    /// Load and publish. Concurrent callers serialize; the loser of the race
    /// performs its own load against the already-fresh state, which is
    /// harmless because loads are idempotent.
    pub fn reload(&self, snapshot_uri: &str) -> Result<Arc<SnapshotDescriptor>> {
        let _guard = self.reload_lock.lock();
        let descriptor = Arc::new(load_snapshot(snapshot_uri, &self.dest_dir)?);
        *self.current.write() = Some(descriptor.clone());
        Ok(descriptor)
    }
}
