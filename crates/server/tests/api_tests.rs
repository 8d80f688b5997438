//! Integration tests for the optimizer API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use ecoopt_lib::{
    forecast::{ArtifactStore, ForecastModel, ForestParams, ModelState, TrainingConfig},
    health::{components, HealthRegistry},
    observability::{EcoMetrics, StructuredLogger},
    sampler::{RandomUsageSampler, UsageHistory},
    ServerCatalog, TaskDispatcher, UsageReading,
};
use ecoopt_server::api::{create_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>, TempDir) {
    setup_test_app_with(TaskDispatcher::default()).await
}

async fn setup_test_app_with(dispatcher: TaskDispatcher) -> (Router, Arc<AppState>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::open(dir.path(), 5).unwrap();
    let training = TrainingConfig {
        forest: ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        },
        ..TrainingConfig::default()
    };

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::FORECASTER).await;
    health_registry.register(components::ARTIFACT_STORE).await;

    let state = Arc::new(AppState {
        catalog: ServerCatalog::default(),
        source: Arc::new(RandomUsageSampler::seeded(7)),
        history: Arc::new(UsageHistory::new(10_000)),
        model: Arc::new(ForecastModel::open(store, training)),
        dispatcher,
        health_registry,
        metrics: EcoMetrics::new(),
        logger: StructuredLogger::new("test"),
    });
    state.publish_model_state().await;
    let router = create_router(state.clone());

    (router, state, dir)
}

/// Two days of readings every ten minutes with a daily load cycle
async fn seed_history(state: &AppState) {
    seed_history_days(state, 2).await;
}

async fn seed_history_days(state: &AppState, days: i64) {
    let start = NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let readings: Vec<UsageReading> = (0..days * 24 * 6)
        .flat_map(|i| {
            let ts: NaiveDateTime = start + Duration::minutes(10 * i);
            let factor = if (8..18).contains(&ts.hour()) { 0.8 } else { 0.2 };
            state
                .catalog
                .iter()
                .map(|s| UsageReading::new(s, ts, s.capacity * factor))
                .collect::<Vec<_>>()
        })
        .collect();
    state.history.extend(readings).await;
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn post(app: &Router, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_healthz_degraded_while_untrained() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, health) = get(&app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["forecaster"]["status"], "degraded");
    assert!(health["components"]["sampler"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _dir) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::ARTIFACT_STORE, "Directory not writable")
        .await;

    let (status, health) = get(&app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_transitions() {
    let (app, state, _dir) = setup_test_app().await;

    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, _dir) = setup_test_app().await;

    // Generate some observations first
    let (status, _) = get(&app, "/api/optimize").await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("ecoopt_sampling_latency_seconds_bucket"));
    assert!(metrics_text.contains("ecoopt_allocation_latency_seconds_count"));
    assert!(metrics_text.contains("ecoopt_current_total_load"));
    assert!(metrics_text.contains("ecoopt_allocated_energy"));
}

#[tokio::test]
async fn test_servers_lists_catalog() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, servers) = get(&app, "/api/servers").await;
    assert_eq!(status, StatusCode::OK);
    let servers = servers.as_array().unwrap();
    assert_eq!(servers.len(), 3);
    assert_eq!(servers[2]["id"], 3);
    assert_eq!(servers[2]["capacity"], 200.0);
}

#[tokio::test]
async fn test_usage_data_appends_to_history() {
    let (app, state, _dir) = setup_test_app().await;

    let (status, readings) = get(&app, "/api/usage_data").await;
    assert_eq!(status, StatusCode::OK);

    let readings = readings.as_array().unwrap();
    assert_eq!(readings.len(), 3);
    for reading in readings {
        let usage = reading["usage"].as_f64().unwrap();
        assert!(usage >= 0.0);
        assert!(reading["energy_consumption"].as_f64().unwrap() >= usage);
        assert!(reading["timestamp"].is_string());
    }
    assert_eq!(state.history.len().await, 3);
}

#[tokio::test]
async fn test_optimize_orders_by_efficiency() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, entries) = get(&app, "/api/optimize").await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<u64> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["server_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 1, 2]);
}

#[tokio::test]
async fn test_allocate_reference_example() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, entries) = post(
        &app,
        "/api/allocate",
        Some(serde_json::json!({ "total_load": 250.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let entries = entries.as_array().unwrap();
    assert_eq!(entries[0]["server_id"], 3);
    assert_eq!(entries[0]["allocated_load"], 200.0);
    assert!((entries[0]["energy_consumption"].as_f64().unwrap() - 222.222).abs() < 0.01);
    assert_eq!(entries[1]["server_id"], 1);
    assert_eq!(entries[1]["allocated_load"], 50.0);
    assert_eq!(entries[1]["energy_consumption"], 62.5);
    assert_eq!(entries[2]["server_id"], 2);
    assert_eq!(entries[2]["allocated_load"], 0.0);
}

#[tokio::test]
async fn test_allocate_negative_load_is_bad_request() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = post(
        &app,
        "/api/allocate",
        Some(serde_json::json!({ "total_load": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");
    assert!(error["error"].is_string());
}

#[tokio::test]
async fn test_predict_before_train_is_not_found() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = get(&app, "/api/predict_load").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "artifact_missing");
}

#[tokio::test]
async fn test_forecast_zero_fallback_is_explicit() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = get(&app, "/api/forecast").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "artifact_missing");

    let (status, points) = get(&app, "/api/forecast?hours=6&fallback=zero").await;
    assert_eq!(status, StatusCode::OK);
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), 6);
    assert!(points
        .iter()
        .all(|p| p["fallback"] == true && p["predicted_load"] == 0.0));
}

#[tokio::test]
async fn test_forecast_rejects_bad_horizon() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = get(&app, "/api/forecast?hours=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");

    let (status, _) = get(&app, "/api/forecast?hours=1000&fallback=zero").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_train_without_history_is_unprocessable() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = post(&app, "/api/train_model", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "insufficient_data");
}

#[tokio::test]
async fn test_train_then_predict_and_forecast() {
    let (app, state, _dir) = setup_test_app().await;
    seed_history(&state).await;

    let (status, report) = post(&app, "/api/train_model", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["model_version"], "v1");
    assert!(report["mse"].as_f64().unwrap().is_finite());
    assert_eq!(report["test_rows"], 10);
    assert_eq!(report["train_rows"], 38);

    let (status, point) = get(&app, "/api/predict_load?timestamp=2024-03-05T12:00:00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(point["timestamp"], "2024-03-05T12:00:00");
    let predicted = point["predicted_load"].as_f64().unwrap();
    assert!(predicted.is_finite() && predicted > 0.0);

    let (status, points) = get(&app, "/api/forecast?hours=24").await;
    assert_eq!(status, StatusCode::OK);
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), 24);
    assert!(points.iter().all(|p| p["fallback"] == false));

    let (_, health) = get(&app, "/healthz").await;
    assert_eq!(health["components"]["forecaster"]["status"], "healthy");

    let (status, info) = get(&app, "/api/model").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["state"], "trained");
    assert_eq!(info["model_version"], "v1");
    assert_eq!(info["versions"], serde_json::json!(["v1"]));
    assert!(info["mse"].is_number());
}

#[tokio::test]
async fn test_model_rollback() {
    let (app, state, _dir) = setup_test_app().await;

    let (status, response) = post(&app, "/api/model/rollback", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["rolled_back"], false);

    seed_history(&state).await;
    assert_eq!(post(&app, "/api/train_model", None).await.0, StatusCode::OK);
    assert_eq!(post(&app, "/api/train_model", None).await.0, StatusCode::OK);

    let (status, response) = post(&app, "/api/model/rollback", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["rolled_back"], true);
    assert_eq!(response["previous_version"], "v2");
    assert_eq!(response["current_version"], "v1");

    let (_, info) = get(&app, "/api/model").await;
    assert_eq!(info["model_version"], "v1");
    assert_eq!(info["versions"], serde_json::json!(["v1", "v2"]));
}

#[tokio::test]
async fn test_model_info_untrained() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, info) = get(&app, "/api/model").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["state"], "untrained");
    assert_eq!(info["versions"], serde_json::json!([]));
    assert!(info.get("mse").is_none());
}

#[tokio::test]
async fn test_malformed_query_is_bad_request() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = get(&app, "/api/forecast?hours=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");
    assert!(error["error"].as_str().unwrap().contains("query"));

    let (status, error) = get(&app, "/api/forecast?fallback=sometimes").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");

    let (status, error) = get(&app, "/api/predict_load?timestamp=garbage").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");
}

#[tokio::test]
async fn test_malformed_allocate_body_is_bad_request() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, error) = post(
        &app,
        "/api/allocate",
        Some(serde_json::json!({ "total_load": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");

    // No JSON content type at all
    let (status, error) = post(&app, "/api/allocate", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_input");
}

#[tokio::test]
async fn test_late_training_is_published() {
    let (app, state, _dir) =
        setup_test_app_with(TaskDispatcher::new(StdDuration::from_millis(1))).await;
    seed_history_days(&state, 14).await;

    let (status, error) = post(&app, "/api/train_model", None).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error["code"], "transient_timeout");

    let mut health = Value::Null;
    for _ in 0..100 {
        health = get(&app, "/healthz").await.1;
        if health["components"]["forecaster"]["status"] == "healthy" {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    assert_eq!(health["components"]["forecaster"]["status"], "healthy");
    assert_eq!(health["status"], "healthy");

    assert_eq!(
        state.model.state(),
        ModelState::Trained {
            model_version: "v1".to_string()
        }
    );
}
