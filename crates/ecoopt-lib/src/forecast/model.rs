//! Training and serving of the load forecast model
//!
//! Predictions always read the last persisted artifact. A retrain builds its
//! artifact without touching the served one, persists it, and only then swaps
//! the in-memory handle, so a concurrent `predict` sees either the old or the
//! new model and never a half-written pair. Concurrent trains are serialized.

use super::artifact::{ArtifactStore, ModelArtifact, StoredArtifact};
use super::features::{build_features, resample_hourly, ResamplePolicy, FEATURE_NAMES};
use super::forest::{mean_squared_error, ForestParams, RandomForest, DEFAULT_SEED};
use super::scaler::StandardScaler;
use crate::error::{EcoError, Result};
use crate::models::{ForecastPoint, TrainingReport, UsageReading};
use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Minimum hourly rows needed to train
pub const MIN_TRAINING_ROWS: usize = 5;

/// Longest forecast horizon served in one call (one week)
pub const MAX_FORECAST_HOURS: u32 = 24 * 7;

/// Configuration for training runs
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub resample_policy: ResamplePolicy,
    pub forest: ForestParams,
    /// Fraction of hourly rows held out for evaluation
    pub test_fraction: f64,
    pub split_seed: u64,
    pub min_rows: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            resample_policy: ResamplePolicy::Sum,
            forest: ForestParams::default(),
            test_fraction: 0.2,
            split_seed: DEFAULT_SEED,
            min_rows: MIN_TRAINING_ROWS,
        }
    }
}

/// Lifecycle state of the forecast model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ModelState {
    Untrained,
    Trained { model_version: String },
}

/// Forecast model backed by an artifact store
pub struct ForecastModel {
    store: ArtifactStore,
    config: TrainingConfig,
    active: RwLock<Option<Arc<StoredArtifact>>>,
    train_lock: Mutex<()>,
}

impl ForecastModel {
    /// Open the model, reloading the current artifact if one was persisted
    pub fn open(store: ArtifactStore, config: TrainingConfig) -> Self {
        let active = match store.load_current() {
            Ok(stored) => {
                info!(version = %stored.version, "Loaded persisted forecast model");
                Some(Arc::new(stored))
            }
            Err(EcoError::ArtifactMissing(_)) => {
                info!(dir = %store.dir().display(), "No forecast model trained yet");
                None
            }
            Err(e) => {
                warn!(error = %e, "Persisted forecast model could not be loaded");
                None
            }
        };

        Self {
            store,
            config,
            active: RwLock::new(active),
            train_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn state(&self) -> ModelState {
        match self.active.read() {
            Ok(guard) => match guard.as_ref() {
                Some(stored) => ModelState::Trained {
                    model_version: stored.version.clone(),
                },
                None => ModelState::Untrained,
            },
            Err(_) => ModelState::Untrained,
        }
    }

    /// Snapshot of the served artifact, loading it from the store on first use
    pub fn active(&self) -> Result<Arc<StoredArtifact>> {
        {
            let guard = self
                .active
                .read()
                .map_err(|e| EcoError::Internal(format!("Lock poisoned: {}", e)))?;
            if let Some(stored) = guard.as_ref() {
                return Ok(Arc::clone(stored));
            }
        }

        let loaded = Arc::new(self.store.load_current()?);
        self.install_if_empty(loaded)
    }

    /// Train on raw usage history and install the resulting artifact
    pub fn train(&self, history: &[UsageReading]) -> Result<TrainingReport> {
        let _guard = self
            .train_lock
            .lock()
            .map_err(|e| EcoError::Internal(format!("Lock poisoned: {}", e)))?;
        let start = Instant::now();

        let series = resample_hourly(history, self.config.resample_policy);
        if series.len() < self.config.min_rows {
            return Err(EcoError::InsufficientData {
                rows: series.len(),
                required: self.config.min_rows,
            });
        }

        let timestamps: Vec<NaiveDateTime> = series.iter().map(|(ts, _)| *ts).collect();
        let x: Vec<Vec<f64>> = build_features(&timestamps)
            .iter()
            .map(|row| row.to_vector().to_vec())
            .collect();
        let y: Vec<f64> = series.iter().map(|(_, load)| *load).collect();

        let (train_idx, test_idx) =
            train_test_split(x.len(), self.config.test_fraction, self.config.split_seed);
        let x_train: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
        let y_train: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();
        let x_test: Vec<Vec<f64>> = test_idx.iter().map(|&i| x[i].clone()).collect();
        let y_test: Vec<f64> = test_idx.iter().map(|&i| y[i]).collect();

        let scaler = StandardScaler::fit(&x_train)?;
        let x_train_scaled = scaler.transform(&x_train)?;
        let x_test_scaled = scaler.transform(&x_test)?;

        let forest = RandomForest::fit(&x_train_scaled, &y_train, &self.config.forest)?;
        let y_pred = forest.predict(&x_test_scaled)?;
        let mse = mean_squared_error(&y_test, &y_pred);

        info!(
            mse = mse,
            train_rows = train_idx.len(),
            test_rows = test_idx.len(),
            "Forecast model evaluated on held-out split"
        );

        let artifact = ModelArtifact {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            scaler,
            forest,
            params: self.config.forest.clone(),
            resample_policy: self.config.resample_policy,
            mse,
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            trained_at: chrono::Local::now().naive_local(),
        };

        // Persist first; the served model only changes once the pair is on disk
        let stored = Arc::new(self.store.save(artifact)?);
        self.install(Arc::clone(&stored))?;

        debug!(
            version = %stored.version,
            elapsed_ms = start.elapsed().as_millis(),
            "Training completed"
        );

        Ok(TrainingReport {
            model_version: stored.version.clone(),
            mse,
            train_rows: stored.artifact.train_rows,
            test_rows: stored.artifact.test_rows,
            trained_at: stored.artifact.trained_at,
        })
    }

    /// Predict load at one timestamp
    pub fn predict(&self, timestamp: NaiveDateTime) -> Result<f64> {
        self.active()?.predict(timestamp)
    }

    /// Predict each of the `hours` hourly timestamps following `start`
    pub fn forecast(&self, start: NaiveDateTime, hours: u32) -> Result<Vec<ForecastPoint>> {
        check_horizon(hours)?;
        // One snapshot for the whole horizon so a concurrent retrain cannot mix models
        let stored = self.active()?;
        (1..=hours)
            .map(|h| {
                let timestamp = start + Duration::hours(h as i64);
                Ok(ForecastPoint {
                    timestamp,
                    predicted_load: stored.predict(timestamp)?,
                    fallback: false,
                })
            })
            .collect()
    }

    /// Switch back to the previous stored version
    pub fn rollback(&self) -> Result<Option<String>> {
        let _guard = self
            .train_lock
            .lock()
            .map_err(|e| EcoError::Internal(format!("Lock poisoned: {}", e)))?;
        match self.store.rollback()? {
            Some(stored) => {
                let version = stored.version.clone();
                self.install(Arc::new(stored))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    pub fn versions(&self) -> Result<Vec<String>> {
        self.store.versions()
    }

    /// Install a lazily loaded artifact unless a train or rollback got there first
    fn install_if_empty(&self, loaded: Arc<StoredArtifact>) -> Result<Arc<StoredArtifact>> {
        let mut active = self
            .active
            .write()
            .map_err(|e| EcoError::Internal(format!("Lock poisoned: {}", e)))?;
        match active.as_ref() {
            Some(current) => Ok(Arc::clone(current)),
            None => {
                *active = Some(Arc::clone(&loaded));
                Ok(loaded)
            }
        }
    }

    fn install(&self, stored: Arc<StoredArtifact>) -> Result<()> {
        let mut active = self
            .active
            .write()
            .map_err(|e| EcoError::Internal(format!("Lock poisoned: {}", e)))?;
        *active = Some(stored);
        Ok(())
    }
}

/// Reject horizons outside `1..=MAX_FORECAST_HOURS`
pub fn check_horizon(hours: u32) -> Result<()> {
    if hours == 0 || hours > MAX_FORECAST_HOURS {
        return Err(EcoError::InvalidInput(format!(
            "forecast horizon must be 1..={} hours, got {}",
            MAX_FORECAST_HOURS, hours
        )));
    }
    Ok(())
}

/// Shuffle row indices with a fixed seed and hold out the first ceil(n * fraction)
fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let train = indices.split_off(n_test);
    (train, indices)
}
