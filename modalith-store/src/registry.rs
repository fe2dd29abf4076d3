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

//! Store bundle construction from configuration.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::{ControlPlaneConfig, StoreBackend};
use crate::docdb::{DocDbControlStore, DocumentDriver, MemoryDriver};
use crate::dual::{self, DualPolicy};
use crate::error::Result;
use crate::interfaces::StoreBundle;
use crate::json::JsonControlStore;

fn backend_bundle(
    backend: StoreBackend,
    graph_root: &Path,
    config: &ControlPlaneConfig,
    driver: &Arc<dyn DocumentDriver>,
) -> Result<StoreBundle> {
    match backend {
        StoreBackend::Json => Ok(StoreBundle::from_backend(Arc::new(JsonControlStore::open(
            graph_root,
        )?))),
        StoreBackend::DocumentDb => Ok(StoreBundle::from_backend(Arc::new(
            DocDbControlStore::new(driver.clone(), config.collection_prefix.clone()),
        ))),
    }
}

/// Build the control-plane store bundle.
///
/// With no secondary configured, the primary backend is used directly; when
/// fallback reads, dual writes, or empty-fallback are enabled the two
/// backends are composed behind the dual façade. The document driver is
/// shared so both the primary and the fallback document store see the same
/// collections.
pub fn build_store_bundle(
    graph_root: impl AsRef<Path>,
    config: &ControlPlaneConfig,
    driver: Option<Arc<dyn DocumentDriver>>,
) -> Result<StoreBundle> {
    let graph_root = graph_root.as_ref();
    let driver: Arc<dyn DocumentDriver> = driver.unwrap_or_else(|| Arc::new(MemoryDriver::new()));
    let primary = backend_bundle(config.backend, graph_root, config, &driver)?;
    if !config.needs_secondary() {
        return Ok(primary);
    }
    if config.fallback_backend == config.backend {
        warn!(
            backend = ?config.backend,
            "fallback backend equals primary; running without a secondary"
        );
        return Ok(primary);
    }
    let secondary = backend_bundle(config.fallback_backend, graph_root, config, &driver)?;
    Ok(dual::dual_bundle(primary, secondary, DualPolicy::from(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReadMode, WriteMode};
    use crate::interfaces::PrivacyStore as _;
    use modalith_core::entities::PrivacyPolicy;
    use tempfile::TempDir;

    #[test]
    fn single_mode_builds_plain_backend() {
        let dir = TempDir::new().unwrap();
        let bundle =
            build_store_bundle(dir.path(), &ControlPlaneConfig::default(), None).unwrap();
        bundle
            .privacy
            .register_policy(PrivacyPolicy::new("pii"))
            .unwrap();
        assert_eq!(bundle.privacy.load_policies().unwrap().len(), 1);
        // JSON backend wrote under control/.
        assert!(dir.path().join("control/privacy_policies.json").exists());
    }

    #[test]
    fn dual_mode_mirrors_writes_to_secondary() {
        let dir = TempDir::new().unwrap();
        let config = ControlPlaneConfig {
            read_mode: ReadMode::Fallback,
            write_mode: WriteMode::Dual,
            fallback_on_empty: true,
            ..Default::default()
        };
        let driver: Arc<dyn DocumentDriver> = Arc::new(MemoryDriver::new());
        let bundle = build_store_bundle(dir.path(), &config, Some(driver.clone())).unwrap();
        bundle
            .privacy
            .register_policy(PrivacyPolicy::new("pii"))
            .unwrap();

        // The secondary document store got its own copy.
        let secondary = DocDbControlStore::new(driver, config.collection_prefix.clone());
        assert_eq!(secondary.load_policies().unwrap().len(), 1);
    }
}
