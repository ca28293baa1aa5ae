//! Prometheus metrics describing the agent itself.
//!
//! All metrics use the `insight_` prefix. They are updated from each report
//! cycle and capture tick, and can be shipped inside the report payload via
//! [`AgentMetricsSource`](super::AgentMetricsSource).

use crate::domain::report::ReportCycle;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use serde_json::json;
use std::sync::Arc;

/// Outcome labels used by the cycle counters
pub const OUTCOMES: [&str; 3] = ["ok", "rejected", "failed"];

/// Prometheus metrics for the reporting agent
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Report cycles by outcome (ok, rejected, failed)
    pub reports_total: CounterVec,
    /// Plan payload posts by outcome
    pub plan_posts_total: CounterVec,
    /// Duration of the last metrics collection
    pub collect_micros: GenericGauge<AtomicF64>,
    /// Duration of the last payload encode and dispatch
    pub transmit_micros: GenericGauge<AtomicF64>,
    /// Round trip of the last ingest call
    pub latency_millis: GenericGauge<AtomicF64>,
    /// Size of the last payload on the wire
    pub payload_bytes: GenericGauge<AtomicF64>,
    /// Plan hashes armed for capture
    pub plans_armed_total: Counter,
    /// Plans harvested from the collector
    pub plans_captured_total: Counter,
    /// Hashes armed and waiting to be harvested
    pub pending_capture: GenericGauge<AtomicF64>,
    /// Requests still waiting to be fully armed
    pub pending_init: GenericGauge<AtomicF64>,
    /// Wall time of a plan capture tick
    pub capture_tick_seconds: Histogram,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let reports_total = CounterVec::new(
            Opts::new("insight_reports_total", "Metrics report cycles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reports_total.clone()))?;

        let plan_posts_total = CounterVec::new(
            Opts::new("insight_plan_posts_total", "Query plan posts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(plan_posts_total.clone()))?;

        let collect_micros = Gauge::with_opts(Opts::new(
            "insight_collect_micros",
            "Metrics collection time of the last cycle in microseconds",
        ))?;
        registry.register(Box::new(collect_micros.clone()))?;

        let transmit_micros = Gauge::with_opts(Opts::new(
            "insight_transmit_micros",
            "Encode and dispatch time of the last cycle in microseconds",
        ))?;
        registry.register(Box::new(transmit_micros.clone()))?;

        let latency_millis = Gauge::with_opts(Opts::new(
            "insight_latency_millis",
            "Round trip latency of the last ingest call in milliseconds",
        ))?;
        registry.register(Box::new(latency_millis.clone()))?;

        let payload_bytes = Gauge::with_opts(Opts::new(
            "insight_payload_bytes",
            "Size of the last metrics payload in bytes",
        ))?;
        registry.register(Box::new(payload_bytes.clone()))?;

        let plans_armed_total = Counter::with_opts(Opts::new(
            "insight_plans_armed_total",
            "Plan hashes armed for capture",
        ))?;
        registry.register(Box::new(plans_armed_total.clone()))?;

        let plans_captured_total = Counter::with_opts(Opts::new(
            "insight_plans_captured_total",
            "Query plans harvested",
        ))?;
        registry.register(Box::new(plans_captured_total.clone()))?;

        let pending_capture = Gauge::with_opts(Opts::new(
            "insight_pending_capture",
            "Plan hashes armed and awaiting harvest",
        ))?;
        registry.register(Box::new(pending_capture.clone()))?;

        let pending_init = Gauge::with_opts(Opts::new(
            "insight_pending_init",
            "Capture requests awaiting initiation",
        ))?;
        registry.register(Box::new(pending_init.clone()))?;

        let capture_tick_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "insight_capture_tick_seconds",
                "Plan capture tick duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(capture_tick_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            reports_total,
            plan_posts_total,
            collect_micros,
            transmit_micros,
            latency_millis,
            payload_bytes,
            plans_armed_total,
            plans_captured_total,
            pending_capture,
            pending_init,
            capture_tick_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    /// Current values as `{"name", "value"}` entries for the report payload
    pub fn snapshot(&self) -> Vec<serde_json::Value> {
        let mut entries = Vec::new();
        for outcome in OUTCOMES {
            entries.push(json!({
                "name": format!("insight.reports.{}", outcome),
                "value": self.reports_total.with_label_values(&[outcome]).get(),
            }));
            entries.push(json!({
                "name": format!("insight.planPosts.{}", outcome),
                "value": self.plan_posts_total.with_label_values(&[outcome]).get(),
            }));
        }
        let gauges = [
            ("insight.collectMicros", self.collect_micros.get()),
            ("insight.transmitMicros", self.transmit_micros.get()),
            ("insight.latencyMillis", self.latency_millis.get()),
            ("insight.payloadBytes", self.payload_bytes.get()),
            ("insight.plansArmed", self.plans_armed_total.get()),
            ("insight.plansCaptured", self.plans_captured_total.get()),
            ("insight.pendingCapture", self.pending_capture.get()),
            ("insight.pendingInit", self.pending_init.get()),
        ];
        entries.extend(
            gauges
                .into_iter()
                .map(|(name, value)| json!({ "name": name, "value": value })),
        );
        entries
    }

    /// Record the timings of a finished report cycle
    pub fn observe_cycle(&self, cycle: &ReportCycle) {
        self.collect_micros.set(cycle.collect_duration_micros as f64);
        self.transmit_micros.set(cycle.transmit_duration_micros as f64);
        self.payload_bytes.set(cycle.payload_byte_length as f64);
    }

    pub fn inc_reports(&self, outcome: &str) {
        self.reports_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_plan_posts(&self, outcome: &str) {
        self.plan_posts_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_pending(&self, pending_init: usize, pending_capture: usize) {
        self.pending_init.set(pending_init as f64);
        self.pending_capture.set(pending_capture as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        assert!(metrics.render().contains("insight_"));
    }

    #[test]
    fn test_observe_cycle() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.observe_cycle(&ReportCycle {
            collect_duration_micros: 250,
            transmit_duration_micros: 80,
            round_trip_latency_millis: 0,
            payload_byte_length: 1024,
        });
        let output = metrics.render();
        assert!(output.contains("insight_collect_micros 250"));
        assert!(output.contains("insight_payload_bytes 1024"));
    }

    #[test]
    fn test_report_counter_by_outcome() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_reports("ok");
        metrics.inc_reports("failed");
        let output = metrics.render();
        assert!(output.contains("insight_reports_total{outcome=\"ok\"} 1"));
        assert!(output.contains("insight_reports_total{outcome=\"failed\"} 1"));
    }

    #[test]
    fn test_snapshot_lists_counters_and_gauges() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_reports("ok");
        metrics.set_pending(2, 3);

        let snapshot = metrics.snapshot();
        let value_of = |name: &str| {
            snapshot
                .iter()
                .find(|e| e["name"] == name)
                .and_then(|e| e["value"].as_f64())
        };
        assert_eq!(value_of("insight.reports.ok"), Some(1.0));
        assert_eq!(value_of("insight.pendingInit"), Some(2.0));
        assert_eq!(value_of("insight.pendingCapture"), Some(3.0));
    }

    #[test]
    fn test_capture_tick_timer_records_sample() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        {
            let _timer = metrics.capture_tick_seconds.start_timer();
        }
        assert_eq!(metrics.capture_tick_seconds.get_sample_count(), 1);
    }
}
