//! HTTP API for the optimizer, health checks and Prometheus metrics

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDateTime};
use ecoopt_lib::{
    allocate_with_summary,
    forecast::{check_horizon, floor_hour, ForecastModel, ModelState},
    health::{ComponentStatus, HealthRegistry},
    models::{
        total_load, AllocationEntry, ForecastPoint, Server, ServerCatalog, TrainingReport,
        UsageReading,
    },
    observability::{EcoMetrics, StructuredLogger},
    sampler::{UsageHistory, UsageSource},
    EcoError, TaskDispatcher,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const DEFAULT_FORECAST_HOURS: u32 = 24;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: ServerCatalog,
    pub source: Arc<dyn UsageSource>,
    pub history: Arc<UsageHistory>,
    pub model: Arc<ForecastModel>,
    pub dispatcher: TaskDispatcher,
    pub health_registry: HealthRegistry,
    pub metrics: EcoMetrics,
    pub logger: StructuredLogger,
}

impl AppState {
    /// Record a failed operation and turn it into a response error
    fn fail(&self, operation: &str, error: EcoError) -> ApiError {
        self.metrics.inc_errors(operation, error.code());
        warn!(operation = operation, code = error.code(), error = %error, "Request failed");
        ApiError(error)
    }

    async fn sample_now(&self) -> Result<Vec<UsageReading>, ApiError> {
        let start = Instant::now();
        let readings = self
            .source
            .sample(&self.catalog, now())
            .map_err(|e| self.fail("sample", e))?;
        self.metrics
            .observe_sampling_latency(start.elapsed().as_secs_f64());
        self.metrics.set_current_total_load(total_load(&readings));

        let held = self.history.extend(readings.clone()).await;
        self.metrics.set_history_readings(held);
        Ok(readings)
    }

    fn allocate(&self, load: f64) -> Result<Vec<AllocationEntry>, ApiError> {
        let start = Instant::now();
        let (entries, summary) =
            allocate_with_summary(load, &self.catalog).map_err(|e| self.fail("allocate", e))?;
        self.metrics
            .observe_allocation_latency(start.elapsed().as_secs_f64());
        self.metrics
            .set_allocation(summary.total_energy, summary.unallocated);
        self.logger.log_allocation(
            summary.total_load,
            summary.allocated,
            summary.unallocated,
            summary.total_energy,
        );
        Ok(entries)
    }

    /// Turn an extractor rejection into the API's invalid-input error
    fn reject(&self, operation: &str, body_text: String) -> ApiError {
        self.fail(operation, EcoError::InvalidInput(body_text))
    }

    /// Log a finished training run and publish the newly served model
    async fn record_training(&self, report: &TrainingReport, elapsed_secs: f64) {
        self.metrics.observe_training_duration(elapsed_secs);
        self.logger.log_training(
            &report.model_version,
            report.mse,
            report.train_rows,
            report.test_rows,
        );
        self.publish_model_state().await;
    }

    /// Sync model metrics and forecaster health with the served artifact
    pub async fn publish_model_state(&self) {
        let state = self.model.state();
        if let ModelState::Trained { model_version } = &state {
            let mse = self.model.active().ok().map(|stored| stored.artifact.mse);
            self.metrics.set_model(model_version, mse);
        }
        self.health_registry.observe_model_state(&state).await;
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Error body returned for every failed API call
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Core error mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(pub EcoError);

impl From<EcoError> for ApiError {
    fn from(error: EcoError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EcoError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EcoError::ArtifactMissing(_) => StatusCode::NOT_FOUND,
            EcoError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EcoError::TransientTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EcoError::ArtifactMismatch(_)
            | EcoError::Io(_)
            | EcoError::Serialization(_)
            | EcoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub total_load: f64,
}

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    Zero,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub hours: Option<u32>,
    pub fallback: Option<FallbackMode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(flatten)]
    pub state: ModelState,
    pub versions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub rolled_back: bool,
    pub previous_version: Option<String>,
    pub current_version: Option<String>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn servers(State(state): State<Arc<AppState>>) -> Json<Vec<Server>> {
    Json(state.catalog.to_vec())
}

/// Sample every server now and return the readings
async fn usage_data(State(state): State<Arc<AppState>>) -> ApiResult<Vec<UsageReading>> {
    Ok(Json(state.sample_now().await?))
}

/// Allocate the load observed right now
async fn optimize(State(state): State<Arc<AppState>>) -> ApiResult<Vec<AllocationEntry>> {
    let readings = state.sample_now().await?;
    Ok(Json(state.allocate(total_load(&readings))?))
}

async fn allocate(
    State(state): State<Arc<AppState>>,
    request: Result<Json<AllocateRequest>, JsonRejection>,
) -> ApiResult<Vec<AllocationEntry>> {
    let Json(request) = request.map_err(|e| state.reject("allocate", e.body_text()))?;
    Ok(Json(state.allocate(request.total_load)?))
}

async fn predict_load(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PredictQuery>, QueryRejection>,
) -> ApiResult<ForecastPoint> {
    let Query(query) = query.map_err(|e| state.reject("predict", e.body_text()))?;
    let timestamp = query.timestamp.unwrap_or_else(|| now() + Duration::hours(1));
    let start = Instant::now();

    let model = Arc::clone(&state.model);
    let predicted_load = state
        .dispatcher
        .run("predict", move || model.predict(timestamp))
        .await
        .map_err(|e| state.fail("predict", e))?;

    state
        .metrics
        .observe_prediction_latency(start.elapsed().as_secs_f64());
    state.metrics.inc_predictions(1);

    Ok(Json(ForecastPoint {
        timestamp,
        predicted_load,
        fallback: false,
    }))
}

/// Hourly forecast from the current hour
///
/// With `fallback=zero`, points the model cannot produce are returned as 0
/// and flagged instead of failing the whole request.
async fn forecast(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ForecastQuery>, QueryRejection>,
) -> ApiResult<Vec<ForecastPoint>> {
    let Query(query) = query.map_err(|e| state.reject("forecast", e.body_text()))?;
    let hours = query.hours.unwrap_or(DEFAULT_FORECAST_HOURS);
    check_horizon(hours).map_err(|e| state.fail("forecast", e))?;

    let origin = floor_hour(now());
    let start = Instant::now();
    let model = Arc::clone(&state.model);

    let points = match query.fallback {
        None => state
            .dispatcher
            .run("forecast", move || model.forecast(origin, hours))
            .await
            .map_err(|e| state.fail("forecast", e))?,
        Some(FallbackMode::Zero) => {
            let (points, failure) = state
                .dispatcher
                .run("forecast", move || Ok(forecast_or_zero(&model, origin, hours)))
                .await
                .map_err(|e| state.fail("forecast", e))?;
            if let Some(error) = failure {
                let substituted = points.iter().filter(|p| p.fallback).count();
                state.metrics.inc_errors("forecast", error.code());
                state.metrics.inc_forecast_fallbacks(substituted as u64);
                state
                    .logger
                    .log_forecast_fallback(substituted, error.code(), &error.to_string());
            }
            points
        }
    };

    state
        .metrics
        .observe_prediction_latency(start.elapsed().as_secs_f64());
    state
        .metrics
        .inc_predictions(points.iter().filter(|p| !p.fallback).count() as u64);

    Ok(Json(points))
}

/// Predict each hour, substituting 0 where the model fails.
///
/// Returns the first error encountered alongside the points.
fn forecast_or_zero(
    model: &ForecastModel,
    origin: NaiveDateTime,
    hours: u32,
) -> (Vec<ForecastPoint>, Option<EcoError>) {
    let timestamps = (1..=hours).map(|h| origin + Duration::hours(h as i64));
    let zero = |timestamp: NaiveDateTime| ForecastPoint {
        timestamp,
        predicted_load: 0.0,
        fallback: true,
    };

    let stored = match model.active() {
        Ok(stored) => stored,
        Err(e) => return (timestamps.map(zero).collect(), Some(e)),
    };

    let mut failure = None;
    let points = timestamps
        .map(|timestamp| match stored.predict(timestamp) {
            Ok(predicted_load) => ForecastPoint {
                timestamp,
                predicted_load,
                fallback: false,
            },
            Err(e) => {
                failure.get_or_insert(e);
                zero(timestamp)
            }
        })
        .collect();
    (points, failure)
}

/// Train on the accumulated usage history
///
/// A run that outlives the dispatch timeout still installs its model, so the
/// late result is published once it lands.
async fn train_model(State(state): State<Arc<AppState>>) -> ApiResult<TrainingReport> {
    let history = state.history.snapshot().await;
    info!(readings = history.len(), "Training forecast model");

    let start = Instant::now();
    let model = Arc::clone(&state.model);
    let late_state = Arc::clone(&state);
    let report = state
        .dispatcher
        .run_or_else(
            "train",
            move || model.train(&history),
            move |late| async move {
                match late {
                    Ok(report) => {
                        info!(
                            version = %report.model_version,
                            "Training finished after its request timed out"
                        );
                        late_state
                            .record_training(&report, start.elapsed().as_secs_f64())
                            .await;
                    }
                    Err(e) => {
                        let _ = late_state.fail("train", e);
                    }
                }
            },
        )
        .await
        .map_err(|e| state.fail("train", e))?;

    state
        .record_training(&report, start.elapsed().as_secs_f64())
        .await;

    Ok(Json(report))
}

async fn model_info(State(state): State<Arc<AppState>>) -> ApiResult<ModelInfo> {
    let model = Arc::clone(&state.model);
    let info = state
        .dispatcher
        .run("model_info", move || {
            let versions = model.versions()?;
            let model_state = model.state();
            let active = match model_state {
                ModelState::Trained { .. } => model.active().ok(),
                ModelState::Untrained => None,
            };
            Ok(ModelInfo {
                state: model_state,
                versions,
                mse: active.as_ref().map(|s| s.artifact.mse),
                trained_at: active.as_ref().map(|s| s.artifact.trained_at),
            })
        })
        .await
        .map_err(|e| state.fail("model_info", e))?;
    Ok(Json(info))
}

/// Switch the served model back to the previous stored version
async fn rollback(State(state): State<Arc<AppState>>) -> ApiResult<RollbackResponse> {
    let previous_version = match state.model.state() {
        ModelState::Trained { model_version } => Some(model_version),
        ModelState::Untrained => None,
    };

    let model = Arc::clone(&state.model);
    let current_version = state
        .dispatcher
        .run("rollback", move || model.rollback())
        .await
        .map_err(|e| state.fail("rollback", e))?;

    state.logger.log_rollback(
        previous_version.as_deref().unwrap_or("none"),
        current_version.as_deref(),
    );
    if current_version.is_some() {
        state.publish_model_state().await;
    }

    Ok(Json(RollbackResponse {
        rolled_back: current_version.is_some(),
        previous_version,
        current_version,
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/servers", get(servers))
        .route("/api/usage_data", get(usage_data))
        .route("/api/optimize", get(optimize))
        .route("/api/allocate", post(allocate))
        .route("/api/predict_load", get(predict_load))
        .route("/api/forecast", get(forecast))
        .route("/api/train_model", post(train_model))
        .route("/api/model", get(model_info))
        .route("/api/model/rollback", post(rollback))
        .with_state(state)
}

/// Start the API server, stopping gracefully on the shutdown signal
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
