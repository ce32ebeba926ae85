use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::api::{self, AppState};
use super::ws;
use crate::phase::PhaseRegistry;
use crate::service::WorkflowService;
use crate::store::{DbHandle, GateDb};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub phases_file: Option<PathBuf>,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3150,
            db_path: PathBuf::from(".phasegate/phasegate.db"),
            phases_file: None,
            dev_mode: false,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database, sync phase definitions and build the shared state.
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let registry = PhaseRegistry::load_or_default(config.phases_file.as_deref())
        .context("Failed to load phase definitions")?;
    let db = GateDb::new(&config.db_path).context("Failed to initialize gate database")?;
    db.sync_phase_definitions(&registry)
        .context("Failed to sync phase definitions")?;

    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    let service =
        WorkflowService::new(DbHandle::new(db), Arc::new(registry)).with_events(ws_tx.clone());
    Ok(Arc::new(AppState { service, ws_tx }))
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr: SocketAddr = listener.local_addr()?;
    info!(%local_addr, db = %config.db_path.display(), "phasegate server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("gate.db"),
            ..Default::default()
        };
        let state = build_state(&config).unwrap();
        (build_router(state, true), dir)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let (app, _dir) = test_router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .uri("/api/projects/1/workflow")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .uri("/api/nothing-here")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_build_state_rejects_bad_phases_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let phases = dir.path().join("phases.json");
        std::fs::write(&phases, "not json").unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("gate.db"),
            phases_file: Some(phases),
            ..Default::default()
        };
        assert!(build_state(&config).is_err());
    }
}
