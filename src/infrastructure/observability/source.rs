use crate::domain::ports::MetricsSource;
use crate::infrastructure::observability::metrics::Metrics;
use anyhow::Result;

/// Reports the agent's own prometheus metrics as the `metrics` array.
///
/// Used by the standalone binary where there is no host metrics registry.
#[derive(Clone)]
pub struct AgentMetricsSource {
    metrics: Metrics,
}

impl AgentMetricsSource {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl MetricsSource for AgentMetricsSource {
    fn collect_metrics(&self) -> Result<Vec<serde_json::Value>> {
        Ok(self.metrics.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_reported() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.plans_captured_total.inc_by(4.0);
        let source = AgentMetricsSource::new(metrics);

        let entries = source.collect_metrics().expect("collect");
        assert!(
            entries
                .iter()
                .any(|e| e["name"] == "insight.plansCaptured" && e["value"] == 4.0)
        );
        assert!(source.collect_databases().expect("dbs").is_empty());
    }
}
