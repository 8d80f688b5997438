//! Load forecasting from calendar features

mod artifact;
mod features;
mod forest;
mod model;
mod scaler;

pub use artifact::{
    compute_checksum, ArtifactStore, ModelArtifact, StoredArtifact, DEFAULT_VERSIONS_TO_KEEP,
    SCHEMA_VERSION,
};
pub use features::{
    build_features, feature_row, floor_hour, resample_hourly, ResamplePolicy, FEATURE_NAMES,
    NUM_FEATURES,
};
pub use forest::{mean_squared_error, ForestParams, RandomForest, DEFAULT_SEED, DEFAULT_TREES};
pub use model::{
    check_horizon, ForecastModel, ModelState, TrainingConfig, MAX_FORECAST_HOURS,
    MIN_TRAINING_ROWS,
};
pub use scaler::StandardScaler;
