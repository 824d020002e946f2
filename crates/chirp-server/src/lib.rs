//! Chirp server library logic.

pub mod api_ws;
pub mod config;

use axum::{routing::get, Extension, Json, Router};
use chirp_connect::{ConnectionRegistry, ParentDirectory};
use chirp_db::DbPool;
use chirp_emotion::ReportScheduler;
use chirp_mq::Transport;
use chirp_pipeline::PipelineService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The queue transport shared by the pipeline and the scheduler.
    pub transport: Transport,
    /// Registry of live client connections.
    pub registry: ConnectionRegistry,
    /// Child → parent directory, populated by the account collaborator.
    pub parents: ParentDirectory,
    /// The voice pipeline.
    pub pipeline: Arc<PipelineService>,
    /// The daily report scheduler.
    pub scheduler: Arc<ReportScheduler>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chirp_mq::TransportConfig;
    use chirp_pipeline::{PipelineConfig, StageClients};
    use chirp_voice::{CapabilityConfig, HttpGenerator, HttpRecognizer, HttpSynthesizer};
    use tower::ServiceExt;

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let db_path = dir.path().join("chirp.db");
        let pool = chirp_db::create_pool(
            db_path.to_str().expect("utf-8 path"),
            chirp_db::DbRuntimeSettings::default(),
        )
        .expect("pool creation should succeed");
        {
            let conn = pool.get().expect("should get a connection");
            chirp_db::run_migrations(&conn).expect("migrations should succeed");
        }

        let transport = Transport::new(TransportConfig::default());
        let registry = ConnectionRegistry::new();
        let parents = ParentDirectory::new();
        let capabilities = CapabilityConfig::default();

        let pipeline = Arc::new(PipelineService::new(
            PipelineConfig::default(),
            transport.clone(),
            registry.clone(),
            StageClients {
                recognizer: Arc::new(HttpRecognizer::new(&capabilities)),
                generator: Arc::new(HttpGenerator::new(&capabilities)),
                synthesizer: Arc::new(HttpSynthesizer::new(&capabilities)),
            },
        ));
        let scheduler = Arc::new(ReportScheduler::new(
            chirp_emotion::SchedulerConfig::default(),
            pool.clone(),
            transport.clone(),
            registry.clone(),
            parents.clone(),
        ));

        (
            Arc::new(AppState {
                pool,
                transport,
                registry,
                parents,
                pipeline,
                scheduler,
            }),
            dir,
        )
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let (state, _dir) = test_state();
        let app = app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let json: Value = serde_json::from_slice(&body).expect("body should be JSON");
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn ws_connect_without_user_id_is_rejected() {
        let (state, _dir) = test_state();
        let app = app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
