//! HTTP service wiring for the optimizer

pub mod api;
pub mod config;
