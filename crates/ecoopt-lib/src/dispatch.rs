//! Runs synchronous core operations off the async runtime
//!
//! Training and inference are CPU-bound and blocking. The dispatcher moves
//! them onto the blocking pool and bounds how long a request waits.

use crate::error::{EcoError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::warn;

/// Default wait before a dispatched task is reported as timed out
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    timeout: Duration,
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_TIMEOUT)
    }
}

impl TaskDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` on the blocking pool and wait at most the configured timeout.
    ///
    /// A timed-out task keeps running to completion in the background; its
    /// result is discarded. Use [`TaskDispatcher::run_or_else`] when a late
    /// result still has to be observed.
    pub async fn run<F, T>(&self, task: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(joined) => flatten(task, joined),
            Err(_) => Err(self.timed_out(task)),
        }
    }

    /// Like [`TaskDispatcher::run`], but a task that outlives the timeout
    /// hands its eventual result to `on_late` instead of dropping it.
    pub async fn run_or_else<F, T, L, Fut>(
        &self,
        task: &'static str,
        f: F,
        on_late: L,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
        L: FnOnce(Result<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => flatten(task, joined),
            Err(_) => {
                tokio::spawn(async move {
                    on_late(flatten(task, handle.await)).await;
                });
                Err(self.timed_out(task))
            }
        }
    }

    fn timed_out(&self, task: &'static str) -> EcoError {
        warn!(
            task = task,
            timeout_ms = self.timeout.as_millis() as u64,
            "Dispatched task timed out"
        );
        EcoError::TransientTimeout {
            task,
            timeout: self.timeout,
        }
    }
}

fn flatten<T>(task: &str, joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.unwrap_or_else(|join_error| {
        Err(EcoError::Internal(format!(
            "{} task failed: {}",
            task, join_error
        )))
    })
}
