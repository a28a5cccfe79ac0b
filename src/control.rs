//! Administrative control surface.
//!
//! A thin `axum` layer over the supervisor's pause/resume and read-only
//! state, kept separate from the plain-text `/metrics` body (which uses
//! `hyper` directly) since this one needs routing and JSON responses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State as AxumState;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::config::{EmbedderVariant, SourceVariant, StorageVariant};
use crate::pipeline::{State, Supervisor};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state: String,
}

#[derive(Serialize)]
struct ConfigurationResponse {
    source: String,
    embedder: String,
    storage: String,
    source_batch_size: usize,
    embedder_workers: usize,
    storage_batch_size: usize,
    skip_embedder_errors: bool,
}

fn state_label(state: State) -> &'static str {
    match state {
        State::Created => "created",
        State::Validated => "validated",
        State::Connected => "connected",
        State::Running => "running",
        State::Paused => "paused",
        State::Draining => "draining",
        State::Closed => "closed",
    }
}

async fn health(AxumState(supervisor): AxumState<Arc<Supervisor>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        state: state_label(supervisor.state().await).to_string(),
    })
}

async fn configuration(
    AxumState(supervisor): AxumState<Arc<Supervisor>>,
) -> Json<ConfigurationResponse> {
    let cfg = supervisor.configuration();
    Json(ConfigurationResponse {
        source: match &cfg.source {
            SourceVariant::Nats(_) => "nats".to_string(),
            SourceVariant::RedisStreams(_) => "redis_streams".to_string(),
        },
        embedder: match &cfg.embedder {
            EmbedderVariant::Http(_) => "http".to_string(),
        },
        storage: match &cfg.storage {
            StorageVariant::Qdrant(_) => "qdrant".to_string(),
        },
        source_batch_size: cfg.source_batch_size,
        embedder_workers: cfg.embedder_workers,
        storage_batch_size: cfg.storage_batch_size,
        skip_embedder_errors: cfg.skip_embedder_errors,
    })
}

async fn start(AxumState(supervisor): AxumState<Arc<Supervisor>>) -> Json<HealthResponse> {
    supervisor.resume().await;
    info!("pipeline resumed via control surface");
    Json(HealthResponse {
        status: "ok",
        state: state_label(supervisor.state().await).to_string(),
    })
}

async fn stop(AxumState(supervisor): AxumState<Arc<Supervisor>>) -> Json<HealthResponse> {
    supervisor.pause().await;
    info!("pipeline paused via control surface");
    Json(HealthResponse {
        status: "ok",
        state: state_label(supervisor.state().await).to_string(),
    })
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/configuration", get(configuration))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .with_state(supervisor)
}

pub async fn serve(addr: SocketAddr, supervisor: Arc<Supervisor>) -> anyhow::Result<()> {
    let app = router(supervisor);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "control surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}
