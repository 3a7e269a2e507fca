use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, routing::get};
use gnexport_db_memory::{Fixture, MemoryBackend};
use gnexport_db_postgres::{
    PgDatasetSource, PgExportCatalog, PgPermissionResolver, create_pool, test_connection,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::config::{AppConfig, StorageBackend};
use crate::handlers;
use crate::state::AppState;

pub struct ExportServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let timeout = state.config.request_timeout();
    Router::new()
        .route("/", get(handlers::list_exports))
        .route("/healthz", get(handlers::healthz))
        .route("/etalab", get(handlers::etalab_export))
        .route("/api/{id_export}", get(handlers::export_api))
        .route("/{id_export}/{export_format}", get(handlers::export_file))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .with_state(state)
}

/// Connect the configured storage backend and prepare output directories.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let state = match config.storage.backend {
        StorageBackend::Postgres => {
            let pg = &config.storage.postgres;
            let pool = create_pool(pg).await.context("failed to create database pool")?;
            test_connection(&pool)
                .await
                .context("database connection test failed")?;

            let catalog = Arc::new(PgExportCatalog::new(pool.clone()));
            let permissions = Arc::new(
                PgPermissionResolver::new(pool.clone(), &config.permissions.module_code)
                    .with_parent_module(config.permissions.parent_module_code.clone()),
            );
            let datasets = Arc::new(PgDatasetSource::new(pool, pg.query_timeout()));
            AppState::new(config, catalog, permissions, datasets)
        }
        StorageBackend::Memory => {
            let backend = match config.storage.memory.fixture.as_deref() {
                Some(path) => MemoryBackend::from_fixture(
                    Fixture::from_path(path).context("failed to load memory fixture")?,
                ),
                None => MemoryBackend::new(),
            };
            tracing::warn!("using in-memory storage; data is not persisted");
            AppState::with_memory(config, backend)
        }
    };

    for dir in [
        state.config.exports.exports_dir(),
        state.config.exports.schedules_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    state
        .scratch
        .ensure()
        .with_context(|| format!("failed to create {}", state.scratch.root().display()))?;

    Ok(state)
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<ExportServer> {
        let addr = self.config.addr();
        let state = build_state(self.config).await?;
        Ok(ExportServer {
            addr,
            app: build_app(state),
        })
    }
}

impl ExportServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
