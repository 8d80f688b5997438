//! EcoOptimizer server
//!
//! Samples server usage in the background and serves allocation and load
//! forecasts over HTTP.

use anyhow::{Context, Result};
use ecoopt_lib::{
    forecast::{ArtifactStore, ForecastModel, ModelState},
    health::{components, HealthRegistry},
    observability::{EcoMetrics, StructuredLogger},
    sampler::{RandomUsageSampler, SamplingLoopBuilder, UsageHistory, UsageSource},
    TaskDispatcher,
};
use ecoopt_server::{api, config::ServerConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ecoopt-server");

    let config = ServerConfig::load()?;
    let catalog = config.catalog()?;
    info!(
        instance = %config.instance,
        servers = catalog.len(),
        artifact_dir = %config.artifact_dir.display(),
        "Server configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::FORECASTER).await;
    health_registry.register(components::ARTIFACT_STORE).await;

    let store = match ArtifactStore::open(&config.artifact_dir, config.versions_to_keep) {
        Ok(store) => store,
        Err(e) => {
            health_registry
                .set_unhealthy(components::ARTIFACT_STORE, e.to_string())
                .await;
            return Err(e).context("Failed to open artifact store");
        }
    };
    let model = Arc::new(ForecastModel::open(store, config.training_config()));

    let source: Arc<dyn UsageSource> = match config.sampler_seed {
        Some(seed) => Arc::new(RandomUsageSampler::seeded(seed)),
        None => Arc::new(RandomUsageSampler::new()),
    };
    let history = Arc::new(UsageHistory::new(config.history_capacity));

    let metrics = EcoMetrics::new();
    let logger = StructuredLogger::new(&config.instance);

    let app_state = Arc::new(api::AppState {
        catalog: catalog.clone(),
        source: Arc::clone(&source),
        history: Arc::clone(&history),
        model: Arc::clone(&model),
        dispatcher: TaskDispatcher::new(config.dispatch_timeout()),
        health_registry: health_registry.clone(),
        metrics,
        logger: logger.clone(),
    });
    app_state.publish_model_state().await;

    let model_version = match model.state() {
        ModelState::Trained { model_version } => model_version,
        ModelState::Untrained => "untrained".to_string(),
    };
    logger.log_startup(SERVICE_VERSION, &model_version, catalog.len());

    let (shutdown_tx, _) = broadcast::channel(1);

    let sampling = SamplingLoopBuilder::new(catalog)
        .source(source)
        .history(history)
        .interval(config.sampling_interval())
        .jitter(config.sampling_jitter())
        .build()?;
    let sampling_handle = tokio::spawn(sampling.run(shutdown_tx.subscribe()));

    // Mark the service ready once the sampler and model are in place
    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal, or for the API server to exit on its own
    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            "SIGINT received"
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => "API server stopped",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server task panicked"
                }
            }
        }
    };

    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = sampling_handle.await {
        error!(error = %e, "Sampling loop task failed");
    }
    if !api_handle.is_finished() {
        match api_handle.await {
            Ok(Err(e)) => error!(error = %e, "API server failed during shutdown"),
            Err(e) => error!(error = %e, "API server task panicked"),
            Ok(Ok(())) => {}
        }
    }

    info!("Shutdown complete");
    Ok(())
}
