//! Core data models for the optimizer

use crate::error::{EcoError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

/// A server in the cluster catalog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: u32,
    pub capacity: f64,
    /// Energy-per-unit-usage divisor in (0, 1]; higher means less energy per unit
    pub efficiency: f64,
}

impl Server {
    pub fn new(id: u32, capacity: f64, efficiency: f64) -> Self {
        Self {
            id,
            capacity,
            efficiency,
        }
    }

    /// Energy consumed when this server carries `load` units
    pub fn energy_for(&self, load: f64) -> f64 {
        load / self.efficiency
    }

    fn validate(&self) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(EcoError::InvalidInput(format!(
                "server {} capacity must be positive, got {}",
                self.id, self.capacity
            )));
        }
        if !(self.efficiency > 0.0 && self.efficiency <= 1.0) {
            return Err(EcoError::InvalidInput(format!(
                "server {} efficiency must be in (0, 1], got {}",
                self.id, self.efficiency
            )));
        }
        Ok(())
    }
}

/// Immutable, validated server catalog shared by reference
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCatalog {
    servers: Arc<[Server]>,
}

impl ServerCatalog {
    pub fn new(servers: Vec<Server>) -> Result<Self> {
        if servers.is_empty() {
            return Err(EcoError::InvalidInput(
                "server catalog must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for server in &servers {
            server.validate()?;
            if !seen.insert(server.id) {
                return Err(EcoError::InvalidInput(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
        }
        Ok(Self {
            servers: servers.into(),
        })
    }

    /// Sum of all server capacities
    pub fn total_capacity(&self) -> f64 {
        self.servers.iter().map(|s| s.capacity).sum()
    }
}

impl Default for ServerCatalog {
    /// The three-server reference cluster
    fn default() -> Self {
        Self {
            servers: vec![
                Server::new(1, 100.0, 0.8),
                Server::new(2, 150.0, 0.7),
                Server::new(3, 200.0, 0.9),
            ]
            .into(),
        }
    }
}

impl Deref for ServerCatalog {
    type Target = [Server];

    fn deref(&self) -> &[Server] {
        &self.servers
    }
}

/// One sampled usage observation for a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReading {
    pub server_id: u32,
    pub timestamp: NaiveDateTime,
    pub usage: f64,
    pub energy_consumption: f64,
}

impl UsageReading {
    pub fn new(server: &Server, timestamp: NaiveDateTime, usage: f64) -> Self {
        Self {
            server_id: server.id,
            timestamp,
            usage,
            energy_consumption: server.energy_for(usage),
        }
    }
}

/// Total usage across a batch of readings
pub fn total_load(readings: &[UsageReading]) -> f64 {
    readings.iter().map(|r| r.usage).sum()
}

/// Load assigned to one server by the allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub server_id: u32,
    pub allocated_load: f64,
    pub energy_consumption: f64,
}

/// Aggregate view of an allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub total_load: f64,
    pub allocated: f64,
    pub unallocated: f64,
    pub total_energy: f64,
}

impl AllocationSummary {
    pub fn from_entries(total_load: f64, entries: &[AllocationEntry]) -> Self {
        let allocated: f64 = entries.iter().map(|e| e.allocated_load).sum();
        let total_energy = entries.iter().map(|e| e.energy_consumption).sum();
        Self {
            total_load,
            allocated,
            unallocated: (total_load - allocated).max(0.0),
            total_energy,
        }
    }
}

/// Calendar features derived from a single timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRow {
    pub hour: u32,
    /// Monday = 0 through Sunday = 6
    pub dayofweek: u32,
    pub quarter: u32,
    pub month: u32,
    pub year: i32,
    pub dayofyear: u32,
}

/// Result of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_version: String,
    pub mse: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub trained_at: NaiveDateTime,
}

/// A single forecast value on the horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: NaiveDateTime,
    pub predicted_load: f64,
    /// True when the value is a substituted fallback rather than a model output
    #[serde(default)]
    pub fallback: bool,
}
