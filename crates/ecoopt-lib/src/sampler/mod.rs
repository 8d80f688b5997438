//! Server usage sampling
//!
//! [`UsageSource`] is the seam for telemetry. The only implementation shipped
//! here, [`RandomUsageSampler`], draws synthetic usage and stands in for a real
//! telemetry feed; swap it for an implementation backed by actual metrics.

mod history;
mod r#loop;

pub use history::{UsageHistory, DEFAULT_HISTORY_CAPACITY};
pub use r#loop::{SamplingConfig, SamplingLoop, SamplingLoopBuilder};

use crate::error::{EcoError, Result};
use crate::models::{Server, UsageReading};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Trait for usage sources
pub trait UsageSource: Send + Sync {
    /// One reading per server, all stamped with `now`
    fn sample(&self, servers: &[Server], now: NaiveDateTime) -> Result<Vec<UsageReading>>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Draw usage uniformly from `[0, capacity]` for every server
pub fn sample_usage<R: Rng + ?Sized>(
    servers: &[Server],
    now: NaiveDateTime,
    rng: &mut R,
) -> Vec<UsageReading> {
    servers
        .iter()
        .map(|server| UsageReading::new(server, now, rng.gen_range(0.0..=server.capacity)))
        .collect()
}

/// Synthetic usage generator
///
/// The RNG belongs to this instance; seeded instances replay the same sequence.
pub struct RandomUsageSampler {
    rng: Mutex<StdRng>,
}

impl RandomUsageSampler {
    /// Sampler seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sampler
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomUsageSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSource for RandomUsageSampler {
    fn sample(&self, servers: &[Server], now: NaiveDateTime) -> Result<Vec<UsageReading>> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| EcoError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(sample_usage(servers, now, &mut *rng))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
