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

//! Server configuration, loaded once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use modalith_edge::{AdaptiveBatchPolicy, BackpressurePolicy};

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => raw.trim() == "1",
        Err(_) => default,
    }
}

/// Edge gateway knobs, `EDGE_*` environment surface.
#[derive(Debug, Clone)]
pub struct EdgeGatewayConfig {
    pub buffer_dir: PathBuf,
    pub buffer_max_bytes: u64,
    pub buffer_ttl_seconds: u64,
    pub batch: AdaptiveBatchPolicy,
    pub backpressure: BackpressurePolicy,
    /// Root of the filesystem object store uploads land in.
    pub raw_root: PathBuf,
    pub max_raw_bytes: u64,
    pub force_buffer: bool,
}

impl EdgeGatewayConfig {
    fn from_env(graph_root: &std::path::Path) -> Self {
        let buffer_dir = env_opt("EDGE_BUFFER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("modalith_edge_buffer"));
        let raw_root = env_opt("EDGE_RAW_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| graph_root.join("raw"));
        Self {
            buffer_dir,
            buffer_max_bytes: env_u64("EDGE_BUFFER_MAX_BYTES", 2 * 1024 * 1024 * 1024),
            buffer_ttl_seconds: env_u64("EDGE_BUFFER_TTL_SECONDS", 86_400),
            batch: AdaptiveBatchPolicy {
                min_batch: env_u32("EDGE_BATCH_MIN", 1),
                max_batch: env_u32("EDGE_BATCH_MAX", 50),
                low_watermark: env_u64("EDGE_BACKLOG_LOW", 10),
                high_watermark: env_u64("EDGE_BACKLOG_HIGH", 100),
                min_delay_ms: env_u64("EDGE_BATCH_DELAY_MIN_MS", 0),
                max_delay_ms: env_u64("EDGE_BATCH_DELAY_MAX_MS", 2000),
            },
            backpressure: BackpressurePolicy {
                max_backlog: env_u64("EDGE_BACKPRESSURE_MAX", 1000),
                hard_limit: env_u64("EDGE_BACKPRESSURE_HARD", 2000),
            },
            raw_root,
            max_raw_bytes: env_u64("MAX_RAW_BYTES", 500_000_000),
            force_buffer: env_flag("EDGE_FORCE_BUFFER", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub env: String,
    pub version: String,
    pub commit: String,
    /// Root of the snapshot/control tree on the local filesystem.
    pub graph_root: PathBuf,
    pub snapshot_uri: String,
    pub healthcheck_path: PathBuf,
    pub snapshot_cache_dir: PathBuf,
    /// Static operator key; matches grant admin.
    pub query_api_key: Option<String>,
    pub api_key_salt: String,
    pub rbac_enforce: bool,
    pub rbac_default_role: String,
    pub abac_enforce: bool,
    pub abac_default_allow: bool,
    pub metering_enabled: bool,
    pub cors_origins: Vec<String>,
    pub edge: EdgeGatewayConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let env = env_string("ENV", "dev").to_ascii_lowercase();
        let graph_root = env_opt("GRAPH_ROOT")
            .map(PathBuf::from)
            .or_else(|| {
                let bucket = env_opt("GRAPH_BUCKET")?;
                let prefix = env_opt("GRAPH_PREFIX")?;
                Some(PathBuf::from(bucket).join(prefix))
            })
            .unwrap_or_else(|| PathBuf::from("./modalith-data"));
        let snapshot_uri = env_opt("SNAPSHOT_URI").unwrap_or_else(|| {
            graph_root
                .join("snapshots/modalith.db")
                .display()
                .to_string()
        });
        let healthcheck_path = env_opt("SNAPSHOT_HEALTHCHECK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| graph_root.join("healthcheck.db"));
        let snapshot_cache_dir = env_opt("SNAPSHOT_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("modalith-snapshots"));
        let cors_origins = env_string("CORS_ALLOW_ORIGINS", "")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        Self {
            listen_addr: env_string("MODALITH_HTTP_ADDR", "127.0.0.1:8080"),
            env: env.clone(),
            version: env_string("MODALITH_VERSION", "dev"),
            commit: env_string("GIT_COMMIT", "unknown"),
            edge: EdgeGatewayConfig::from_env(&graph_root),
            graph_root,
            snapshot_uri,
            healthcheck_path,
            snapshot_cache_dir,
            query_api_key: env_opt("QUERY_API_KEY"),
            api_key_salt: env_string("API_KEY_SALT", ""),
            rbac_enforce: env_flag("RBAC_ENFORCE", false),
            rbac_default_role: env_string("RBAC_DEFAULT_ROLE", "reader"),
            abac_enforce: env_flag("ABAC_ENFORCE", false),
            abac_default_allow: env_flag("ABAC_DEFAULT_ALLOW", true),
            metering_enabled: env_flag("METERING_ENABLED", false),
            cors_origins,
        }
    }

    /// Credentials are mandatory outside dev-like environments.
    pub fn auth_required(&self) -> bool {
        !matches!(self.env.as_str(), "dev" | "local" | "test")
    }

    /// Allow-all CORS is a dev-environment default only.
    pub fn cors_allow_all(&self) -> bool {
        self.cors_origins.is_empty() && !self.auth_required()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.listen_addr.parse()?)
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        std::fs::create_dir_all(&self.graph_root)?;
        Ok(())
    }
}
