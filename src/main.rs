//! Vectrain Pipeline
//!
//! Streaming vectorization service: fetch records from a configured
//! source, embed their text through a pool of embed workers, and
//! persist the embeddings with at-least-once delivery.
//!
//! Features:
//! - NATS JetStream / Redis Streams sources
//! - HTTP embedding-service client with retry and jitter
//! - Qdrant-shaped vector storage, idempotent upsert by id
//! - Bounded queues for backpressure between stages
//! - Graceful shutdown on SIGTERM/SIGINT with a bounded drain window
//! - Prometheus metrics and a small administrative HTTP control surface

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vectrain_pipeline::adapters::{embedder, source, storage};
use vectrain_pipeline::cancellation::CancellationToken;
use vectrain_pipeline::config::Config;
use vectrain_pipeline::control;
use vectrain_pipeline::metrics::start_metrics_server;
use vectrain_pipeline::pipeline::Supervisor;

/// Vectrain Pipeline - streaming fetch/embed/store service
#[derive(Parser, Debug)]
#[command(name = "vectrain-pipeline")]
#[command(author = "NEURO Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streaming vectorization pipeline: fetch, embed, and persist records")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Resolves once SIGINT or (on unix) SIGTERM is observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "starting vectrain-pipeline");

    let config = Config::load()?;
    config.validate()?;

    let source = source::build(&config.source);
    let embedder = embedder::build(&config.embedder);
    let storage = storage::build(&config.storage);

    let metrics_enabled = config.metrics_enabled;
    let metrics_port = config.metrics_port;
    let control_port = config.control_port;

    let supervisor = Arc::new(Supervisor::new(config, source, embedder, storage));

    if metrics_enabled {
        let metrics_addr: SocketAddr = format!("0.0.0.0:{metrics_port}").parse()?;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr).await {
                error!(error = %e, "metrics server failed");
            }
        });
        info!(port = metrics_port, "metrics server started at /metrics");
    }

    {
        let control_addr: SocketAddr = format!("0.0.0.0:{control_port}").parse()?;
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(control_addr, supervisor).await {
                error!(error = %e, "control surface failed");
            }
        });
        info!(port = control_port, "control surface started");
    }

    let token = CancellationToken::new();
    {
        let token = token.child_token();
        tokio::spawn(async move {
            shutdown_signal().await;
            token.cancel();
        });
    }

    match supervisor.run(token).await {
        Ok(()) => {
            info!("vectrain-pipeline stopped cleanly");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            info!("vectrain-pipeline stopped after cancellation");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "vectrain-pipeline stopped with a fatal error");
            Err(e.into())
        }
    }
}
