//! logwarden -- streaming log anomaly detection with remediation
//! enrichment.
//!
//! The crate ingests a newline-delimited JSON log stream, aggregates
//! records into tumbling per-service windows, classifies closed windows
//! against threshold rules, and publishes de-duplicated alerts enriched
//! with remediation guidance fetched from an external retrieval service.

pub mod aggregate;
pub mod api;
pub mod classify;
pub mod config;
pub mod emit;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod retrieval;
pub mod sink;
pub mod source;
pub mod storage;

use crate::config::Config;
use crate::emit::Emitter;
use crate::metrics::PipelineMetrics;
use crate::pipeline::Pipeline;
use crate::retrieval::{HttpRetrievalGateway, NullGateway, RetrievalGateway};
use crate::sink::SqliteSink;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

fn build_gateway(config: &Config) -> Result<Arc<dyn RetrievalGateway>> {
    match &config.retrieval_endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, timeout_secs = config.retrieval_timeout_secs, "remediation retrieval enabled");
            let gateway =
                HttpRetrievalGateway::new(endpoint.clone(), config.retrieval_timeout())
                    .context("cannot construct retrieval gateway")?;
            Ok(Arc::new(gateway))
        }
        None => {
            tracing::info!("no retrieval endpoint configured; alerts will be degraded");
            Ok(Arc::new(NullGateway))
        }
    }
}

/// Start the logwarden daemon: detection pipeline plus status API.
/// Runs until the input stream is exhausted.
pub async fn serve(config: Config, input: &str) -> Result<()> {
    config.validate()?;

    tracing::info!(db_path = %config.db_path, "initializing storage");
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("cannot create database directory {}", parent.display())
            })?;
        }
    }
    let pool = storage::open_pool(&config.db_path)?;

    let metrics = Arc::new(PipelineMetrics::default());
    let gateway = build_gateway(&config)?;
    let emitter = Arc::new(Emitter::new(
        gateway,
        Arc::new(SqliteSink::new(pool.clone())),
        config.retry_policy(),
        Arc::clone(&metrics),
    ));

    // Status API in the background.
    let app = api::router(api::AppState::new(Arc::clone(&metrics), pool.clone()));
    let addr: std::net::SocketAddr = config.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "logwarden status API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "status API terminated");
        }
    });

    // Source feeds the pipeline through a bounded channel.
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let input = input.to_string();
    let source = tokio::spawn(async move { source::read_ndjson(&input, tx).await });

    let pipeline = Pipeline::new(&config, emitter, Arc::clone(&metrics));
    pipeline.run(rx).await?;

    source.await??;
    Ok(())
}

/// One-shot replay: process a file against an in-memory database and
/// return the alerts that were produced, oldest first.
pub async fn process_file(config: Config, input: &str) -> Result<Vec<serde_json::Value>> {
    config.validate()?;

    let pool = storage::open_memory_pool()?;
    let metrics = Arc::new(PipelineMetrics::default());
    let gateway = build_gateway(&config)?;
    let emitter = Arc::new(Emitter::new(
        gateway,
        Arc::new(SqliteSink::new(pool.clone())),
        config.retry_policy(),
        Arc::clone(&metrics),
    ));

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let input = input.to_string();
    let source = tokio::spawn(async move { source::read_ndjson(&input, tx).await });

    let pipeline = Pipeline::new(&config, emitter, Arc::clone(&metrics));
    pipeline.run(rx).await?;
    source.await??;

    let mut alerts = sink::recent_alerts(&pool, 10_000)?;
    alerts.reverse();
    Ok(alerts)
}
