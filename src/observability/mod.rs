//! Observability
//!
//! Process-wide metrics for sandbox lifecycle, handler calls, and monitor
//! terminations.

pub mod metrics;

pub use metrics::{metrics, SandboxMetrics};
