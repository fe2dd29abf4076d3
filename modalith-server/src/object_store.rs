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

//! Raw-object store the edge gateway writes into.
//!
//! The trait is the seam a cloud bucket plugs into; the filesystem
//! implementation ships for single-node deployments and tests.

use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
#[error("object store write failed: {0}")]
pub struct ObjectStoreError(pub String);

pub trait ObjectStore: Send + Sync {
    /// Write the payload at the relative path, returning the object uri.
    fn put(&self, path: &str, payload: &[u8]) -> Result<String, ObjectStoreError>;
}

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, path: &str, payload: &[u8]) -> Result<String, ObjectStoreError> {
        let dest = self.root.join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| ObjectStoreError(err.to_string()))?;
        }
        let tmp = dest.with_extension("part");
        fs::write(&tmp, payload).map_err(|err| ObjectStoreError(err.to_string()))?;
        fs::rename(&tmp, &dest).map_err(|err| ObjectStoreError(err.to_string()))?;
        Ok(format!("file://{}", dest.display()))
    }
}

/// Always-failing store, used in tests and chaos drills.
pub struct UnavailableObjectStore;

impl ObjectStore for UnavailableObjectStore {
    fn put(&self, _path: &str, _payload: &[u8]) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError("object store unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_writes_and_returns_uri() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let uri = store.put("audio/site/dev/stream/x_y.wav", b"hi").unwrap();
        assert!(uri.starts_with("file://"));
        assert_eq!(
            fs::read(dir.path().join("audio/site/dev/stream/x_y.wav")).unwrap(),
            b"hi"
        );
    }
}
