//! Versioned model artifacts on disk
//!
//! Each training run produces one composite artifact holding the scaler and
//! the forest together, so the two can never drift apart. Files are laid out as
//! a single JSON header line followed by the JSON payload; the header carries
//! the schema version, the model version and a SHA256 checksum of the payload.
//!
//! A `CURRENT` pointer file names the active version. Both artifact files and
//! the pointer are written to a temp file, synced and then renamed into place.

use super::features::{feature_row, FEATURE_NAMES, NUM_FEATURES};
use super::forest::{ForestParams, RandomForest};
use super::scaler::StandardScaler;
use super::ResamplePolicy;
use crate::error::{EcoError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bump when the payload layout changes incompatibly
pub const SCHEMA_VERSION: u32 = 1;

/// Default number of artifact versions retained for rollback
pub const DEFAULT_VERSIONS_TO_KEEP: usize = 5;

const CURRENT_FILE: &str = "CURRENT";
const ARTIFACT_PREFIX: &str = "model-v";
const ARTIFACT_EXT: &str = "artifact";

/// Everything produced by one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub forest: RandomForest,
    pub params: ForestParams,
    pub resample_policy: ResamplePolicy,
    pub mse: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub trained_at: NaiveDateTime,
}

impl ModelArtifact {
    /// Check that scaler, forest and feature layout belong together
    pub fn validate(&self) -> Result<()> {
        let names: Vec<&str> = self.feature_names.iter().map(String::as_str).collect();
        if names != FEATURE_NAMES {
            return Err(EcoError::ArtifactMismatch(format!(
                "artifact features {:?} do not match {:?}",
                names, FEATURE_NAMES
            )));
        }
        if self.scaler.n_features() != NUM_FEATURES || self.scaler.scale.len() != NUM_FEATURES {
            return Err(EcoError::ArtifactMismatch(format!(
                "scaler fitted on {} features, model uses {}",
                self.scaler.n_features(),
                NUM_FEATURES
            )));
        }
        if self.forest.n_features() != self.scaler.n_features() {
            return Err(EcoError::ArtifactMismatch(format!(
                "forest expects {} features but scaler produces {}",
                self.forest.n_features(),
                self.scaler.n_features()
            )));
        }
        if self
            .scaler
            .scale
            .iter()
            .chain(&self.scaler.mean)
            .any(|v| !v.is_finite())
            || self.scaler.scale.iter().any(|s| *s <= 0.0)
        {
            return Err(EcoError::ArtifactMismatch(
                "scaler holds invalid parameters".to_string(),
            ));
        }
        self.forest.validate()
    }
}

/// An artifact as persisted, with its assigned version
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub version: String,
    pub checksum: String,
    pub artifact: ModelArtifact,
}

impl StoredArtifact {
    /// Predict load for one timestamp with this artifact's scaler and forest
    pub fn predict(&self, timestamp: NaiveDateTime) -> Result<f64> {
        let features = feature_row(timestamp).to_vector();
        let scaled = self.artifact.scaler.transform_row(&features)?;
        let prediction = self.artifact.forest.predict_row(&scaled)?;
        if !prediction.is_finite() {
            return Err(EcoError::ArtifactMismatch(format!(
                "model {} produced a non-finite prediction",
                self.version
            )));
        }
        Ok(prediction)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    schema_version: u32,
    model_version: String,
    checksum: String,
    payload_bytes: usize,
}

/// Directory-backed artifact store with version history
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    versions_to_keep: usize,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>, versions_to_keep: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            versions_to_keep: versions_to_keep.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an artifact as a new version and make it current
    pub fn save(&self, artifact: ModelArtifact) -> Result<StoredArtifact> {
        artifact.validate()?;

        let next = self.version_numbers()?.last().copied().unwrap_or(0) + 1;
        let version = format!("v{}", next);
        let payload = serde_json::to_vec(&artifact)?;
        let checksum = compute_checksum(&payload);
        let header = ArtifactHeader {
            schema_version: SCHEMA_VERSION,
            model_version: version.clone(),
            checksum: checksum.clone(),
            payload_bytes: payload.len(),
        };

        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');
        contents.extend_from_slice(&payload);

        write_atomic(&self.artifact_path(&version), &contents)?;
        write_atomic(&self.dir.join(CURRENT_FILE), version.as_bytes())?;

        info!(
            version = %version,
            size = contents.len(),
            checksum = %checksum,
            "Model artifact saved"
        );

        self.prune(&version);

        Ok(StoredArtifact {
            version,
            checksum,
            artifact,
        })
    }

    /// Version named by the pointer file, if any model was ever saved
    pub fn current_version(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.join(CURRENT_FILE)) {
            Ok(contents) => {
                let version = contents.trim().to_string();
                if version.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(version))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the current artifact
    pub fn load_current(&self) -> Result<StoredArtifact> {
        match self.current_version()? {
            Some(version) => self.load_version(&version),
            None => Err(EcoError::ArtifactMissing(self.dir.display().to_string())),
        }
    }

    /// Load and verify a specific version
    pub fn load_version(&self, version: &str) -> Result<StoredArtifact> {
        let path = self.artifact_path(version);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EcoError::ArtifactMismatch(format!(
                    "artifact {} referenced but not found at {}",
                    version,
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| EcoError::ArtifactMismatch(format!("artifact {} has no header", version)))?;
        let (header_bytes, payload) = (&bytes[..split], &bytes[split + 1..]);

        let header: ArtifactHeader = serde_json::from_slice(header_bytes).map_err(|e| {
            EcoError::ArtifactMismatch(format!("artifact {} header unreadable: {}", version, e))
        })?;

        if header.schema_version != SCHEMA_VERSION {
            return Err(EcoError::ArtifactMismatch(format!(
                "artifact {} has schema {}, expected {}",
                version, header.schema_version, SCHEMA_VERSION
            )));
        }
        if header.model_version != version {
            return Err(EcoError::ArtifactMismatch(format!(
                "artifact file {} claims version {}",
                version, header.model_version
            )));
        }
        if header.payload_bytes != payload.len() {
            return Err(EcoError::ArtifactMismatch(format!(
                "artifact {} truncated: {} of {} bytes",
                version,
                payload.len(),
                header.payload_bytes
            )));
        }
        let checksum = compute_checksum(payload);
        if checksum != header.checksum {
            return Err(EcoError::ArtifactMismatch(format!(
                "artifact {} checksum mismatch: expected {}, got {}",
                version, header.checksum, checksum
            )));
        }

        let artifact: ModelArtifact = serde_json::from_slice(payload).map_err(|e| {
            EcoError::ArtifactMismatch(format!("artifact {} payload unreadable: {}", version, e))
        })?;
        artifact.validate()?;

        debug!(version = %version, checksum = %checksum, "Model artifact loaded");

        Ok(StoredArtifact {
            version: version.to_string(),
            checksum,
            artifact,
        })
    }

    /// Stored versions, oldest first
    pub fn versions(&self) -> Result<Vec<String>> {
        Ok(self
            .version_numbers()?
            .into_iter()
            .map(|n| format!("v{}", n))
            .collect())
    }

    /// Point `CURRENT` at the newest version older than the current one.
    ///
    /// The rolled-back version stays on disk so version numbers are never reused.
    pub fn rollback(&self) -> Result<Option<StoredArtifact>> {
        let current = match self.current_version()? {
            Some(v) => v,
            None => {
                warn!("No current model to roll back from");
                return Ok(None);
            }
        };
        let current_number = parse_version(&current).ok_or_else(|| {
            EcoError::ArtifactMismatch(format!("current version '{}' is malformed", current))
        })?;

        let previous = self
            .version_numbers()?
            .into_iter()
            .filter(|n| *n < current_number)
            .last();

        let Some(previous) = previous else {
            warn!(current = %current, "No previous model version available for rollback");
            return Ok(None);
        };

        let version = format!("v{}", previous);
        // Verify before switching so a corrupt predecessor never becomes current
        let stored = self.load_version(&version)?;
        write_atomic(&self.dir.join(CURRENT_FILE), version.as_bytes())?;

        info!(from = %current, to = %version, "Rolled back to previous model version");
        Ok(Some(stored))
    }

    fn artifact_path(&self, version: &str) -> PathBuf {
        let number = version.trim_start_matches('v');
        self.dir
            .join(format!("{}{}.{}", ARTIFACT_PREFIX, number, ARTIFACT_EXT))
    }

    fn version_numbers(&self) -> Result<Vec<u64>> {
        let mut numbers: Vec<u64> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_prefix(ARTIFACT_PREFIX)?
                    .strip_suffix(&format!(".{}", ARTIFACT_EXT))?
                    .parse()
                    .ok()
            })
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Drop the oldest versions beyond the retention limit, never the current one
    fn prune(&self, current: &str) {
        let numbers = match self.version_numbers() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to list model artifacts for pruning");
                return;
            }
        };
        let excess = numbers.len().saturating_sub(self.versions_to_keep);
        for number in numbers.into_iter().take(excess) {
            let version = format!("v{}", number);
            if version == current {
                continue;
            }
            let path = self.artifact_path(&version);
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove old model artifact");
            } else {
                debug!(version = %version, "Pruned old model artifact");
            }
        }
    }
}

fn parse_version(version: &str) -> Option<u64> {
    version.strip_prefix('v')?.parse().ok()
}

/// Write to a sibling temp file, sync, then rename over the target
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
