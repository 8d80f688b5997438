//! Core library for the energy-efficient load optimizer
//!
//! This crate provides the core functionality for:
//! - Server usage sampling and history
//! - Greedy efficiency-first load allocation
//! - Hourly load forecasting with a persisted random forest
//! - Health checks and observability

pub mod allocator;
pub mod dispatch;
pub mod error;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod sampler;

pub use allocator::{allocate, allocate_with_summary};
pub use dispatch::TaskDispatcher;
pub use error::{EcoError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EcoMetrics, StructuredLogger};
