//! Calendar feature extraction and hourly resampling
//!
//! Timestamps are zone-free wall-clock values. No timezone normalization is
//! done here: callers must feed every timestamp in one convention.

use crate::models::{FeatureRow, UsageReading};
use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of features per row
pub const NUM_FEATURES: usize = 6;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] =
    ["hour", "dayofweek", "quarter", "month", "year", "dayofyear"];

/// Derive the calendar features for one timestamp
pub fn feature_row(timestamp: NaiveDateTime) -> FeatureRow {
    let month = timestamp.month();
    FeatureRow {
        hour: timestamp.hour(),
        dayofweek: timestamp.weekday().num_days_from_monday(),
        quarter: (month - 1) / 3 + 1,
        month,
        year: timestamp.year(),
        dayofyear: timestamp.ordinal(),
    }
}

/// Derive features for every timestamp in the index
pub fn build_features(timestamps: &[NaiveDateTime]) -> Vec<FeatureRow> {
    timestamps.iter().copied().map(feature_row).collect()
}

impl FeatureRow {
    pub fn to_vector(&self) -> [f64; NUM_FEATURES] {
        [
            self.hour as f64,
            self.dayofweek as f64,
            self.quarter as f64,
            self.month as f64,
            self.year as f64,
            self.dayofyear as f64,
        ]
    }
}

/// How readings falling in the same hour are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplePolicy {
    /// Sum usage across all readings in the hour; empty hours count as zero
    #[default]
    Sum,
    /// Average usage in the hour; empty hours are dropped
    Mean,
}

/// Truncate a timestamp to the start of its hour
pub fn floor_hour(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .date()
        .and_hms_opt(timestamp.hour(), 0, 0)
        .unwrap_or(timestamp)
}

/// Bucket readings into hourly (timestamp, load) pairs ordered by time.
///
/// With [`ResamplePolicy::Sum`] the result covers every hour between the first
/// and the last reading, so gaps in telemetry show up as zero-load hours.
pub fn resample_hourly(
    readings: &[UsageReading],
    policy: ResamplePolicy,
) -> Vec<(NaiveDateTime, f64)> {
    let mut buckets: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();
    for reading in readings {
        let bucket = buckets.entry(floor_hour(reading.timestamp)).or_insert((0.0, 0));
        bucket.0 += reading.usage;
        bucket.1 += 1;
    }

    match policy {
        ResamplePolicy::Mean => buckets
            .into_iter()
            .map(|(hour, (sum, count))| (hour, sum / count as f64))
            .collect(),
        ResamplePolicy::Sum => {
            let (first, last) = match (buckets.keys().next(), buckets.keys().next_back()) {
                (Some(first), Some(last)) => (*first, *last),
                _ => return Vec::new(),
            };
            let mut series = Vec::new();
            let mut hour = first;
            while hour <= last {
                let load = buckets.get(&hour).map(|(sum, _)| *sum).unwrap_or(0.0);
                series.push((hour, load));
                hour += Duration::hours(1);
            }
            series
        }
    }
}
