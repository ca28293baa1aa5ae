// Query plan capture state machine
pub mod capture_registry;

// Periodic metrics report and plan capture ticks
pub mod reporter;

pub use capture_registry::{CaptureRegistry, RegistryStats};
pub use reporter::{AgentHandle, InsightAgent, ReporterSettings};
