//! Kubernetes API integrations
//!
//! Gateway API (v1) translation, reconciliation, and controller metrics.

pub mod gateway;
pub mod metrics;
