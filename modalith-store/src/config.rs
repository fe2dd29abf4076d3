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

//! Control-plane configuration, loaded once from the environment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Json,
    DocumentDb,
}

impl StoreBackend {
    fn parse(raw: &str) -> StoreBackend {
        match raw.trim().to_ascii_lowercase().as_str() {
            "document_db" | "docdb" => StoreBackend::DocumentDb,
            _ => StoreBackend::Json,
        }
    }

    /// The counterpart backend used as the fallback/secondary by default.
    pub fn other(self) -> StoreBackend {
        match self {
            StoreBackend::Json => StoreBackend::DocumentDb,
            StoreBackend::DocumentDb => StoreBackend::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Single,
    Dual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    pub backend: StoreBackend,
    pub fallback_backend: StoreBackend,
    pub read_mode: ReadMode,
    pub write_mode: WriteMode,
    pub fallback_on_empty: bool,
    pub collection_prefix: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            fallback_backend: StoreBackend::DocumentDb,
            read_mode: ReadMode::Primary,
            write_mode: WriteMode::Single,
            fallback_on_empty: false,
            collection_prefix: String::new(),
        }
    }
}

impl ControlPlaneConfig {
    /// Environment surface:
    /// `CONTROL_PLANE_STORE`, `CONTROL_PLANE_FALLBACK_STORE`,
    /// `CONTROL_PLANE_READ_MODE`, `CONTROL_PLANE_WRITE_MODE`,
    /// `CONTROL_PLANE_FALLBACK_ON_EMPTY`, `CONTROL_PLANE_COLLECTION_PREFIX`.
    pub fn from_env() -> Self {
        let backend = StoreBackend::parse(
            &std::env::var("CONTROL_PLANE_STORE").unwrap_or_else(|_| "json".into()),
        );
        let fallback_backend = match std::env::var("CONTROL_PLANE_FALLBACK_STORE") {
            Ok(raw) if !raw.trim().is_empty() => StoreBackend::parse(&raw),
            _ => backend.other(),
        };
        let read_mode = match std::env::var("CONTROL_PLANE_READ_MODE")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "fallback" => ReadMode::Fallback,
            _ => ReadMode::Primary,
        };
        let write_mode = match std::env::var("CONTROL_PLANE_WRITE_MODE")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "dual" => WriteMode::Dual,
            _ => WriteMode::Single,
        };
        // Unset means "follow the read mode".
        let fallback_on_empty = match std::env::var("CONTROL_PLANE_FALLBACK_ON_EMPTY") {
            Ok(raw) => raw.trim() == "1",
            Err(_) => read_mode == ReadMode::Fallback,
        };
        let collection_prefix = std::env::var("CONTROL_PLANE_COLLECTION_PREFIX")
            .unwrap_or_default()
            .trim()
            .to_string();
        Self {
            backend,
            fallback_backend,
            read_mode,
            write_mode,
            fallback_on_empty,
            collection_prefix,
        }
    }

    /// Whether a secondary backend participates at all.
    pub fn needs_secondary(&self) -> bool {
        (self.read_mode == ReadMode::Fallback
            || self.write_mode == WriteMode::Dual
            || self.fallback_on_empty)
            && self.fallback_backend != self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_primary_json() {
        let config = ControlPlaneConfig::default();
        assert_eq!(config.backend, StoreBackend::Json);
        assert_eq!(config.read_mode, ReadMode::Primary);
        assert_eq!(config.write_mode, WriteMode::Single);
        assert!(!config.needs_secondary());
    }

    #[test]
    fn dual_write_requires_secondary() {
        let config = ControlPlaneConfig {
            write_mode: WriteMode::Dual,
            ..Default::default()
        };
        assert!(config.needs_secondary());
    }

    #[test]
    fn same_fallback_backend_disables_secondary() {
        let config = ControlPlaneConfig {
            read_mode: ReadMode::Fallback,
            fallback_backend: StoreBackend::Json,
            ..Default::default()
        };
        assert!(!config.needs_secondary());
    }
}
