//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (sampling, allocation and prediction latency, load, energy, model info)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, Gauge, GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Buckets for training runs, which take seconds rather than microseconds
const TRAINING_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EcoMetricsInner> = OnceLock::new();

struct EcoMetricsInner {
    sampling_latency_seconds: Histogram,
    allocation_latency_seconds: Histogram,
    prediction_latency_seconds: Histogram,
    training_duration_seconds: Histogram,
    current_total_load: Gauge,
    allocated_energy: Gauge,
    unallocated_load: Gauge,
    history_readings: Gauge,
    model_mse: Gauge,
    model_version_info: GaugeVec,
    predictions_total: IntCounter,
    forecast_fallbacks_total: IntCounter,
    errors_total: IntCounterVec,
}

impl EcoMetricsInner {
    fn new() -> Self {
        Self {
            sampling_latency_seconds: register_histogram!(
                "ecoopt_sampling_latency_seconds",
                "Time spent sampling server usage",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            allocation_latency_seconds: register_histogram!(
                "ecoopt_allocation_latency_seconds",
                "Time spent computing a load allocation",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register allocation_latency_seconds"),

            prediction_latency_seconds: register_histogram!(
                "ecoopt_prediction_latency_seconds",
                "Time spent running forecast inference",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            training_duration_seconds: register_histogram!(
                "ecoopt_training_duration_seconds",
                "Wall time of forecast model training runs",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            current_total_load: register_gauge!(
                "ecoopt_current_total_load",
                "Total usage across servers at the latest sample"
            )
            .expect("Failed to register current_total_load"),

            allocated_energy: register_gauge!(
                "ecoopt_allocated_energy",
                "Energy consumption of the latest allocation"
            )
            .expect("Failed to register allocated_energy"),

            unallocated_load: register_gauge!(
                "ecoopt_unallocated_load",
                "Load left unallocated by the latest allocation"
            )
            .expect("Failed to register unallocated_load"),

            history_readings: register_gauge!(
                "ecoopt_history_readings",
                "Usage readings held in the training history buffer"
            )
            .expect("Failed to register history_readings"),

            model_mse: register_gauge!(
                "ecoopt_model_mse",
                "Held-out mean squared error of the served forecast model"
            )
            .expect("Failed to register model_mse"),

            model_version_info: register_gauge_vec!(
                "ecoopt_model_version_info",
                "Information about the currently served forecast model",
                &["version"]
            )
            .expect("Failed to register model_version_info"),

            predictions_total: register_int_counter!(
                "ecoopt_predictions_total",
                "Total number of load predictions served"
            )
            .expect("Failed to register predictions_total"),

            forecast_fallbacks_total: register_int_counter!(
                "ecoopt_forecast_fallbacks_total",
                "Forecast points replaced by the zero fallback"
            )
            .expect("Failed to register forecast_fallbacks_total"),

            errors_total: register_int_counter_vec!(
                "ecoopt_errors_total",
                "Errors returned by core operations",
                &["operation", "code"]
            )
            .expect("Failed to register errors_total"),
        }
    }
}

/// Metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EcoMetrics {
    _private: (),
}

impl Default for EcoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EcoMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EcoMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EcoMetricsInner {
        GLOBAL_METRICS.get_or_init(EcoMetricsInner::new)
    }

    pub fn observe_sampling_latency(&self, duration_secs: f64) {
        self.inner().sampling_latency_seconds.observe(duration_secs);
    }

    pub fn observe_allocation_latency(&self, duration_secs: f64) {
        self.inner().allocation_latency_seconds.observe(duration_secs);
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn observe_training_duration(&self, duration_secs: f64) {
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn set_current_total_load(&self, load: f64) {
        self.inner().current_total_load.set(load);
    }

    /// Record the outcome of an allocation
    pub fn set_allocation(&self, energy: f64, unallocated: f64) {
        self.inner().allocated_energy.set(energy);
        self.inner().unallocated_load.set(unallocated);
    }

    pub fn set_history_readings(&self, count: usize) {
        self.inner().history_readings.set(count as f64);
    }

    /// Update served model info
    pub fn set_model(&self, version: &str, mse: Option<f64>) {
        // Reset previous version
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version])
            .set(1.0);
        if let Some(mse) = mse {
            self.inner().model_mse.set(mse);
        }
    }

    pub fn inc_predictions(&self, count: u64) {
        self.inner().predictions_total.inc_by(count);
    }

    pub fn inc_forecast_fallbacks(&self, count: u64) {
        self.inner().forecast_fallbacks_total.inc_by(count);
    }

    pub fn inc_errors(&self, operation: &str, code: &str) {
        self.inner()
            .errors_total
            .with_label_values(&[operation, code])
            .inc();
    }
}

/// Structured logger for service events
///
/// Provides consistent JSON-formatted logging for allocations, training
/// runs and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, model_version: &str, servers: usize) {
        info!(
            event = "service_started",
            instance = %self.instance,
            service_version = %version,
            model_version = %model_version,
            servers = servers,
            "EcoOptimizer service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "EcoOptimizer service shutting down"
        );
    }

    /// Log a completed allocation
    pub fn log_allocation(&self, total_load: f64, allocated: f64, unallocated: f64, energy: f64) {
        if unallocated > 0.0 {
            warn!(
                event = "load_allocated",
                instance = %self.instance,
                total_load = total_load,
                allocated = allocated,
                unallocated = unallocated,
                total_energy = energy,
                "Load allocated with capacity shortfall"
            );
        } else {
            info!(
                event = "load_allocated",
                instance = %self.instance,
                total_load = total_load,
                allocated = allocated,
                total_energy = energy,
                "Load allocated"
            );
        }
    }

    /// Log a training run
    pub fn log_training(&self, model_version: &str, mse: f64, train_rows: usize, test_rows: usize) {
        info!(
            event = "model_trained",
            instance = %self.instance,
            model_version = %model_version,
            mse = mse,
            train_rows = train_rows,
            test_rows = test_rows,
            "Forecast model trained"
        );
    }

    /// Log a model rollback
    pub fn log_rollback(&self, from_version: &str, to_version: Option<&str>) {
        match to_version {
            Some(to) => info!(
                event = "model_rollback",
                instance = %self.instance,
                from_version = %from_version,
                to_version = %to,
                "Forecast model rolled back"
            ),
            None => warn!(
                event = "model_rollback",
                instance = %self.instance,
                from_version = %from_version,
                "No earlier forecast model to roll back to"
            ),
        }
    }

    /// Log forecast points replaced by the zero fallback
    pub fn log_forecast_fallback(&self, points: usize, error_code: &str, error: &str) {
        warn!(
            event = "forecast_fallback",
            instance = %self.instance,
            points = points,
            error_code = %error_code,
            error = %error,
            "Forecast unavailable, substituting zero"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_records() {
        let metrics = EcoMetrics::new();
        let clone = metrics.clone();

        metrics.observe_sampling_latency(0.001);
        metrics.observe_allocation_latency(0.0002);
        metrics.observe_prediction_latency(0.002);
        metrics.observe_training_duration(1.5);
        metrics.set_current_total_load(250.0);
        metrics.set_allocation(284.7, 0.0);
        metrics.set_history_readings(42);
        metrics.set_model("v3", Some(12.5));
        clone.inc_predictions(24);
        clone.inc_forecast_fallbacks(24);
        clone.inc_errors("predict", "artifact_missing");

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "ecoopt_model_version_info"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
        logger.log_allocation(500.0, 450.0, 50.0, 520.0);
        logger.log_rollback("v2", None);
        logger.log_forecast_fallback(24, "artifact_missing", "no trained model");
    }
}
