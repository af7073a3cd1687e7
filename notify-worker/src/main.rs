use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use envconfig::Envconfig;
use futures::future::ready;
use notify_common::metrics::{serve, setup_metrics_routes};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use notify_worker::{
    app_context::AppContext,
    config::Config,
    consumer::{run_consumer, TaskConsumer},
    pool::WorkerPool,
};

fn setup_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let log_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "notify worker"
}

fn start_server(config: &Config) -> Result<JoinHandle<()>> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")));
    let router = setup_metrics_routes(router).context("failed to install metrics recorder")?;

    let bind = config.bind();
    Ok(tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    }))
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("Failed to load configuration from environment")?;
    config.validate().context("Invalid configuration")?;

    let context = Arc::new(
        AppContext::new(&config)
            .await
            .context("Failed to build the send pipeline")?,
    );

    let consumer = TaskConsumer::new(&config.kafka).context("Failed to create Kafka consumer")?;
    info!("Subscribed to topic: {}", consumer.topic());

    let server_handle = start_server(&config)?;
    info!("Serving health and metrics on {}", config.bind());

    let pool = WorkerPool::new(&config.worker);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => info!("Shutdown signal received, draining workers"),
            Err(e) => error!("Signal handling failed, shutting down: {e:?}"),
        }
        signal_cancel.cancel();
    });

    run_consumer(&consumer, context, &pool, cancel).await;

    pool.shutdown().await;
    server_handle.abort();
    info!("Shut down cleanly");

    Ok(())
}
