pub mod http_transport;
pub mod in_memory_collector;
pub mod observability;
pub mod payload;

pub use http_transport::HttpTransport;
pub use in_memory_collector::{InMemoryPlanCollector, QueryExecution};
