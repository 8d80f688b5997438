//! API client for communicating with the optimizer service

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const NO_QUERY: &[(&str, &str)] = &[];

/// Error reported by the service in its `{error, code}` body
#[derive(Debug, Error)]
#[error("API error ({status}) [{code}]: {message}")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// API client for the optimizer service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request with query parameters
    pub async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request, with a JSON body when one is given
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => ApiError {
                    status: status.as_u16(),
                    code: parsed.code,
                    message: parsed.error,
                },
                Err(_) => ApiError {
                    status: status.as_u16(),
                    code: "unknown".to_string(),
                    message: body,
                },
            };
            return Err(error.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn servers(&self) -> Result<Vec<Server>> {
        self.get("api/servers", NO_QUERY).await
    }

    pub async fn usage(&self) -> Result<Vec<UsageReading>> {
        self.get("api/usage_data", NO_QUERY).await
    }

    pub async fn optimize(&self) -> Result<Vec<AllocationEntry>> {
        self.get("api/optimize", NO_QUERY).await
    }

    pub async fn allocate(&self, total_load: f64) -> Result<Vec<AllocationEntry>> {
        self.post("api/allocate", Some(&AllocateRequest { total_load }))
            .await
    }

    pub async fn predict(&self, at: Option<NaiveDateTime>) -> Result<ForecastPoint> {
        let query: Vec<(&str, String)> = at
            .map(|ts| ("timestamp", ts.format("%Y-%m-%dT%H:%M:%S").to_string()))
            .into_iter()
            .collect();
        self.get("api/predict_load", &query).await
    }

    pub async fn forecast(&self, hours: u32, zero_fallback: bool) -> Result<Vec<ForecastPoint>> {
        let mut query = vec![("hours", hours.to_string())];
        if zero_fallback {
            query.push(("fallback", "zero".to_string()));
        }
        self.get("api/forecast", &query).await
    }

    pub async fn train(&self) -> Result<TrainingReport> {
        self.post::<_, ()>("api/train_model", None).await
    }

    pub async fn model(&self) -> Result<ModelInfo> {
        self.get("api/model", NO_QUERY).await
    }

    pub async fn rollback(&self) -> Result<RollbackResponse> {
        self.post::<_, ()>("api/model/rollback", None).await
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub total_load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u32,
    pub capacity: f64,
    pub efficiency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReading {
    pub server_id: u32,
    pub timestamp: NaiveDateTime,
    pub usage: f64,
    pub energy_consumption: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub server_id: u32,
    pub allocated_load: f64,
    pub energy_consumption: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: NaiveDateTime,
    pub predicted_load: f64,
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_version: String,
    pub mse: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub trained_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub versions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub rolled_back: bool,
    pub previous_version: Option<String>,
    pub current_version: Option<String>,
}
