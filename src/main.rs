use anyhow::{Context, Result};
use flowdpi::metrics::{self, Metrics};
use flowdpi::{stdin_reader, Config, Orchestrator};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flowdpi");

    let config = match std::env::var("FLOWDPI_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::from_env(),
    };

    let orchestrator = Arc::new(Orchestrator::with_config(&config));

    // Model sources may be URLs fetched with a blocking client.
    let errors = tokio::task::spawn_blocking({
        let orchestrator = orchestrator.clone();
        move || orchestrator.initialize_all()
    })
    .await
    .context("initializing modules")?;
    for e in &errors {
        warn!("Module unavailable: {}", e);
    }
    info!(modules = ?orchestrator.active_modules(), "Classification modules ready");

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = metrics::serve_metrics(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let cleanup = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let metrics = metrics.clone();
        let mut interval = tokio::time::interval(config.cleanup_interval());
        async move {
            loop {
                interval.tick().await;
                orchestrator.tracker().cleanup_expired();
                metrics.update_tracker_metrics(orchestrator.tracker());
            }
        }
    });

    let mut stdin_processor = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = stdin_reader::process_stdin(orchestrator, metrics).await {
                error!("Stdin processing error: {}", e);
            }
        }
    });

    let input_closed = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        _ = metrics_server => {
            error!("Metrics server stopped unexpectedly");
            false
        }
        _ = &mut stdin_processor => {
            info!("Input closed");
            true
        }
    };

    cleanup.abort();
    if !input_closed {
        // the reader must be gone before the flow cache is torn down
        stdin_processor.abort();
        let _ = stdin_processor.await;
    }

    info!("Shutting down");
    for e in orchestrator.destroy_all() {
        warn!("Module failed to shut down: {}", e);
    }
    Ok(())
}
