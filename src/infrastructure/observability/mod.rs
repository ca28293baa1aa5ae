//! Observability of the agent itself
//!
//! The agent only ever pushes data out. Its own counters live in a
//! prometheus registry and are reported alongside the host metrics.

pub mod metrics;
pub mod source;

pub use metrics::Metrics;
pub use source::AgentMetricsSource;
