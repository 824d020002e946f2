//! Chirp server binary — wires the voice pipeline, connection registry,
//! and report scheduler into one process.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, and graceful shutdown on SIGTERM/SIGINT. Shutdown order
//! matters: the scheduler stops first (it publishes through the
//! transport), then the pipeline stops, draining in-flight stage handlers
//! before the transport is released.

use chirp_connect::{ConnectionRegistry, ParentDirectory};
use chirp_emotion::ReportScheduler;
use chirp_mq::Transport;
use chirp_pipeline::{PipelineService, StageClients};
use chirp_server::{app, config, AppState};
use chirp_voice::{HttpGenerator, HttpRecognizer, HttpSynthesizer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CHIRP_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = chirp_db::create_pool(
        &config.database.path,
        chirp_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = chirp_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Wire the components: one transport, one registry, one parent
    // directory, shared by the pipeline and the scheduler.
    let transport = Transport::new(config.transport.to_transport_config());
    let registry = ConnectionRegistry::new();
    let parents = ParentDirectory::new();

    let pipeline = Arc::new(PipelineService::new(
        config.pipeline,
        transport.clone(),
        registry.clone(),
        StageClients {
            recognizer: Arc::new(HttpRecognizer::new(&config.capabilities)),
            generator: Arc::new(HttpGenerator::new(&config.capabilities)),
            synthesizer: Arc::new(HttpSynthesizer::new(&config.capabilities)),
        },
    ));
    pipeline
        .start()
        .await
        .expect("failed to start the voice pipeline");

    let scheduler = Arc::new(ReportScheduler::new(
        config.scheduler,
        pool.clone(),
        transport.clone(),
        registry.clone(),
        parents.clone(),
    ));
    scheduler.start();

    // Build application
    let state = Arc::new(AppState {
        pool,
        transport,
        registry,
        parents,
        pipeline: Arc::clone(&pipeline),
        scheduler: Arc::clone(&scheduler),
    });
    let router = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting chirp server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Scheduler first: it publishes through the transport the pipeline is
    // about to drain and close.
    scheduler.stop().await;
    pipeline.stop().await;

    tracing::info!("chirp server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
