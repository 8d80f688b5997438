//! Bounded in-memory usage history used as training data

use crate::models::UsageReading;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default number of readings retained (about 4 days of 3 servers at 5s)
pub const DEFAULT_HISTORY_CAPACITY: usize = 200_000;

/// Ring buffer of readings; the oldest are dropped once full
#[derive(Debug)]
pub struct UsageHistory {
    readings: RwLock<VecDeque<UsageReading>>,
    capacity: usize,
}

impl UsageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            readings: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a batch, returning the number of readings held afterwards
    pub async fn extend(&self, batch: impl IntoIterator<Item = UsageReading>) -> usize {
        let mut readings = self.readings.write().await;
        readings.extend(batch);
        if readings.len() > self.capacity {
            let excess = readings.len() - self.capacity;
            readings.drain(..excess);
        }
        readings.len()
    }

    /// Copy of all retained readings, oldest first
    pub async fn snapshot(&self) -> Vec<UsageReading> {
        self.readings.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.readings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.readings.read().await.is_empty()
    }
}

impl Default for UsageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
