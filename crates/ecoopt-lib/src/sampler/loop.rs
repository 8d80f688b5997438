//! Periodic sampling loop
//!
//! Samples every server on a fixed interval with jitter and appends the
//! readings to the shared usage history.

use super::{UsageHistory, UsageSource};
use crate::error::Result;
use crate::models::{total_load, ServerCatalog};
use crate::observability::EcoMetrics;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Base sampling interval (default: 5 seconds)
    pub interval: Duration,
    /// Maximum jitter added to each interval (default: 500 ms)
    pub jitter: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
        }
    }
}

/// Sampling loop feeding the usage history
pub struct SamplingLoop {
    source: Arc<dyn UsageSource>,
    catalog: ServerCatalog,
    history: Arc<UsageHistory>,
    config: SamplingConfig,
    metrics: EcoMetrics,
}

impl SamplingLoop {
    pub fn new(
        source: Arc<dyn UsageSource>,
        catalog: ServerCatalog,
        history: Arc<UsageHistory>,
        config: SamplingConfig,
    ) -> Self {
        Self {
            source,
            catalog,
            history,
            config,
            metrics: EcoMetrics::new(),
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            source = self.source.name(),
            servers = self.catalog.len(),
            "Starting sampling loop"
        );
        if !self.history.is_empty().await {
            let held = self.history.len().await;
            debug!(held = held, "Appending to existing usage history");
        }

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = sleep(self.next_delay()) => {
                    ticks += 1;
                    match self.tick().await {
                        Ok(held) => {
                            // Roughly once a minute at the default interval
                            if ticks % 12 == 0 {
                                debug!(ticks = ticks, history = held, "Sampling cycle complete");
                            }
                        }
                        Err(e) => {
                            self.metrics.inc_errors("sample", e.code());
                            warn!(error = %e, "Sampling failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling loop");
                    break;
                }
            }
        }
    }

    /// Take one sample and append it, returning the history size
    pub async fn tick(&self) -> Result<usize> {
        let start = Instant::now();
        let now = chrono::Local::now().naive_local();
        let readings = self.source.sample(&self.catalog, now)?;
        self.metrics
            .observe_sampling_latency(start.elapsed().as_secs_f64());
        self.metrics.set_current_total_load(total_load(&readings));

        let held = self.history.extend(readings).await;
        self.metrics.set_history_readings(held);
        Ok(held)
    }

    fn next_delay(&self) -> Duration {
        let max_ms = self.config.jitter.as_millis() as u64;
        let jitter_ms = if max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..max_ms)
        };
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Builder for creating the sampling loop
pub struct SamplingLoopBuilder {
    source: Option<Arc<dyn UsageSource>>,
    catalog: ServerCatalog,
    history: Option<Arc<UsageHistory>>,
    config: SamplingConfig,
}

impl SamplingLoopBuilder {
    pub fn new(catalog: ServerCatalog) -> Self {
        Self {
            source: None,
            catalog,
            history: None,
            config: SamplingConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn UsageSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn history(mut self, history: Arc<UsageHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn build(self) -> anyhow::Result<SamplingLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Usage source is required"))?;
        let history = self
            .history
            .ok_or_else(|| anyhow::anyhow!("Usage history is required"))?;
        Ok(SamplingLoop::new(source, self.catalog, history, self.config))
    }
}
