//! Prometheus metrics for the Marketplace Registry Operator
//!
//! This module exposes metrics for monitoring operator health and performance.

pub mod prometheus;

pub use prometheus::*;
