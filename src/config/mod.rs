//! Configuration module for the insight agent.
//!
//! Settings are loaded from environment variables; the binary loads a `.env`
//! file first when present.

mod insight_config;

pub use insight_config::{Endpoints, InsightConfig};
