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

//! Modalith Server
//!
//! The HTTP surface over the retrieval platform: the fusion query service,
//! the edge gateway with its durable buffer, the ingestion endpoint, and the
//! admin surface, all on one router.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metering;
pub mod middleware;
pub mod object_store;

use anyhow::Result;
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use modalith_query::snapshot::healthcheck;
use modalith_query::QueryServiceConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::ServerConfig;

/// Build the full application router over the shared state.
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.cors_allow_all() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(api::health::health))
        .route("/query", post(api::query::query))
        .route("/admin/reload-snapshot", post(api::query::reload_snapshot))
        .route("/ingest", post(api::ingest::ingest))
        .route("/edge/upload", post(api::edge::upload))
        .route("/edge/buffer/status", get(api::edge::buffer_status))
        .route("/edge/buffer/replay", post(api::edge::buffer_replay))
        .route("/edge/buffer/prune", post(api::edge::buffer_prune))
        .route(
            "/edge/config",
            get(api::edge::get_config).post(api::edge::update_config),
        )
        .layer(axum_middleware::from_fn(
            middleware::correlation_id_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Startup probes: engine healthcheck, initial snapshot load, model warmup.
/// All failures are recoverable; the query endpoint answers snapshot-not-
/// ready until a load succeeds.
pub fn startup_probes(state: &AppState) {
    if let Err(err) = healthcheck(Some(&state.config.healthcheck_path)) {
        warn!(error = %err, "snapshot engine healthcheck failed");
    }
    match state.snapshot.reload(&state.config.snapshot_uri) {
        Ok(descriptor) => info!(
            snapshot_marker = %descriptor.marker(),
            "initial snapshot published"
        ),
        Err(err) => warn!(error = %err, "initial snapshot load failed; queries return 503"),
    }
    if state.query_config.query_warmup {
        state.embedders.warm(
            &state.query_config.query_warmup_steps,
            &state.query_config.query_warmup_text,
        );
    } else {
        info!("query model warmup skipped");
    }
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modalith_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting modalith server");
    config.validate()?;

    let query_config = QueryServiceConfig::from_env();
    let state = AppState::build(config, query_config)?;
    startup_probes(&state);

    let addr = state.config.socket_addr()?;
    let app = build_router(state);
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
