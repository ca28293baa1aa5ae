//! Push-based reporting loop
//!
//! Two independent periodic tasks share one [`CaptureRegistry`]:
//!
//! 1. **Metrics report** (default every 60s): collect host metrics, POST them
//!    to the ingest endpoint and feed the response body back into the
//!    registry as a plan capture command.
//! 2. **Plan capture** (default every 10s): retry pending arming, harvest
//!    stale captures and queue the plans for a dedicated sender task.
//!
//! Both first fire one full period after start. A failed cycle is logged and
//! the next tick fires as usual; there is no backoff.

use crate::application::capture_registry::CaptureRegistry;
use crate::config::{Endpoints, InsightConfig};
use crate::domain::capture::{CaptureBudget, CapturedPlan};
use crate::domain::clock::SystemClock;
use crate::domain::errors::ReportError;
use crate::domain::ports::{MetricsSource, PlanCollector, Transport};
use crate::domain::report::{CycleTimings, ReportCycle};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::payload::{self, AppIdentity, MetricsPayload, PlanPayload};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const PLAN_QUEUE_CAPACITY: usize = 16;

/// Resolved settings of a running agent
#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub identity: AppIdentity,
    pub endpoints: Endpoints,
    pub period: Duration,
    pub capture_period: Duration,
    pub gzip: bool,
    pub ping: bool,
    pub collect_metrics: bool,
    pub collect_db_metrics: bool,
}

impl ReporterSettings {
    pub fn from_config(config: &InsightConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            identity: AppIdentity {
                environment: config.environment.clone(),
                app_name: config.app_name.clone(),
                instance_id: config.instance_id.clone(),
                version: config.version.clone(),
            },
            endpoints: config.endpoints()?,
            period: config.period(),
            capture_period: config.capture_period(),
            gzip: config.gzip,
            ping: config.ping,
            collect_metrics: config.collect_metrics,
            collect_db_metrics: config.collect_db_metrics,
        })
    }
}

/// Clears the in-flight flag when the delivery task ends, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The reporting agent. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct InsightAgent {
    settings: Arc<ReporterSettings>,
    transport: Arc<dyn Transport>,
    source: Arc<dyn MetricsSource>,
    registry: Option<Arc<CaptureRegistry>>,
    metrics: Metrics,
    timings: Arc<CycleTimings>,
    in_flight: Arc<AtomicBool>,
}

impl InsightAgent {
    pub fn new(
        settings: ReporterSettings,
        transport: Arc<dyn Transport>,
        source: Arc<dyn MetricsSource>,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            transport,
            source,
            registry: None,
            metrics,
            timings: Arc::new(CycleTimings::default()),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enable plan capture through the given registry
    pub fn with_plan_capture(mut self, registry: Arc<CaptureRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build an agent from configuration.
    ///
    /// Returns `None` when reporting is not configured: disabled, no valid
    /// key, or an unusable URL. That is a silent opt-out, not an error.
    pub fn from_config(
        config: &InsightConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn MetricsSource>,
        collector: Option<Arc<dyn PlanCollector>>,
        metrics: Metrics,
    ) -> Option<Self> {
        if !config.is_enabled() {
            debug!("InsightAgent: insight not enabled");
            return None;
        }
        let settings = match ReporterSettings::from_config(config) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("InsightAgent: Invalid url {}: {}", config.url, e);
                return None;
            }
        };

        let Some(stale_after) = chrono::Duration::try_seconds(config.stale_after_secs) else {
            warn!(
                "InsightAgent: Invalid stale after {}s",
                config.stale_after_secs
            );
            return None;
        };

        let mut agent = Self::new(settings, transport, source, metrics.clone());
        match collector {
            Some(collector) if config.capture_plans => {
                let registry = CaptureRegistry::new(collector, Arc::new(SystemClock))
                    .with_stale_after(stale_after)
                    .with_budget(CaptureBudget {
                        max_count: config.capture_max_count,
                        max_time_millis: config.capture_max_time_millis,
                    })
                    .with_metrics(metrics);
                agent = agent.with_plan_capture(Arc::new(registry));
            }
            None if config.capture_plans => {
                info!("InsightAgent: Plan capture requested but no plan collector supplied");
            }
            _ => {}
        }
        Some(agent)
    }

    pub fn registry(&self) -> Option<&Arc<CaptureRegistry>> {
        self.registry.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// True if the collector answers the liveness check with `ok`.
    pub async fn ping(&self) -> bool {
        match self.transport.get(&self.settings.endpoints.ping).await {
            Ok(response) => response.is_success() && response.body == "ok",
            Err(e) => {
                debug!("InsightAgent: Ping unsuccessful {}", e);
                false
            }
        }
    }

    /// Start the periodic tasks. When the ping gate is enabled and fails, or
    /// a period cannot be scheduled, the agent does not start and the handle
    /// reports inactive.
    pub async fn start(self) -> AgentHandle {
        if self.settings.ping && !self.ping().await {
            info!("InsightAgent: Collector not reachable, reporting not started");
            return AgentHandle::inactive();
        }

        let now = time::Instant::now();
        let (Some(report_start), Some(capture_start)) = (
            now.checked_add(self.settings.period),
            now.checked_add(self.settings.capture_period),
        ) else {
            warn!(
                "InsightAgent: Period out of range (period: {:?}, capture period: {:?})",
                self.settings.period, self.settings.capture_period
            );
            return AgentHandle::inactive();
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = vec![tokio::spawn(
            self.clone()
                .run_reports(report_start, shutdown_tx.subscribe()),
        )];

        if let Some(registry) = self.registry.clone() {
            let (plan_tx, plan_rx) = mpsc::channel(PLAN_QUEUE_CAPACITY);
            tasks.push(tokio::spawn(self.clone().run_capture(
                registry,
                capture_start,
                plan_tx,
                shutdown_tx.subscribe(),
            )));
            tasks.push(tokio::spawn(
                self.clone().run_plan_sender(plan_rx, shutdown_tx.subscribe()),
            ));
        }

        info!(
            "InsightAgent: insight enabled (period: {:?}, plan capture: {})",
            self.settings.period,
            self.registry.is_some()
        );
        AgentHandle {
            active: true,
            shutdown_tx: Some(shutdown_tx),
            tasks,
        }
    }

    /// Build the metrics payload. `collect`, `report` and `latency` carry the
    /// previous cycle's measurements.
    pub fn build_payload(&self) -> Result<MetricsPayload, ReportError> {
        let collect_error = |e: anyhow::Error| ReportError::Collect {
            reason: format!("{:#}", e),
        };

        let metrics = if self.settings.collect_metrics {
            Some(self.source.collect_metrics().map_err(collect_error)?)
        } else {
            None
        };
        let dbs = if self.settings.collect_db_metrics {
            let dbs = self.source.collect_databases().map_err(collect_error)?;
            (!dbs.is_empty()).then_some(dbs)
        } else {
            None
        };

        let identity = &self.settings.identity;
        Ok(MetricsPayload {
            environment: identity.environment.clone(),
            app_name: identity.app_name.clone(),
            instance_id: identity.instance_id.clone(),
            version: identity.version.clone(),
            event_time: chrono::Utc::now().timestamp_millis(),
            collect: self.timings.collect_micros(),
            report: self.timings.report_micros(),
            latency: self.timings.latency_millis(),
            metrics,
            dbs,
        })
    }

    /// Collect and encode one report, then hand it to a background delivery
    /// task. Returns the cycle timings and the delivery handle; the loop
    /// drops the handle so the next tick never waits on the network.
    pub fn dispatch(&self) -> Result<(ReportCycle, JoinHandle<()>), ReportError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(ReportError::InFlight);
        }
        let guard = InFlightGuard(self.in_flight.clone());

        let started = Instant::now();
        let payload = self.build_payload()?;
        let json = serde_json::to_vec(&payload).map_err(|e| ReportError::Encode {
            reason: e.to_string(),
        })?;
        trace!("InsightAgent: send metrics {}", String::from_utf8_lossy(&json));
        let collected = Instant::now();

        let body = self.encode_body(json)?;
        let payload_byte_length = body.len();
        let agent = self.clone();
        let delivery = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = agent.deliver(body).await {
                log_report_error("metrics", &e);
            }
        });

        let cycle = ReportCycle {
            collect_duration_micros: micros(collected - started),
            transmit_duration_micros: micros(collected.elapsed()),
            round_trip_latency_millis: self.timings.latency_millis(),
            payload_byte_length,
        };
        self.timings.record_cycle(&cycle);
        self.metrics.observe_cycle(&cycle);
        debug!(
            "InsightAgent: metrics collect:{} report:{} length:{} latency:{}",
            cycle.collect_duration_micros,
            cycle.transmit_duration_micros,
            cycle.payload_byte_length,
            cycle.round_trip_latency_millis
        );
        Ok((cycle, delivery))
    }

    /// POST an encoded report and process the response body as a command.
    pub async fn deliver(&self, body: Vec<u8>) -> Result<(), ReportError> {
        let started = Instant::now();
        let response = match self
            .transport
            .post(&self.settings.endpoints.metrics, body, self.settings.gzip)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.metrics.inc_reports("failed");
                return Err(e.into());
            }
        };

        let latency = started.elapsed().as_millis() as u64;
        self.timings.record_latency(latency);
        self.metrics.latency_millis.set(latency as f64);

        if !response.is_success() {
            self.metrics.inc_reports("rejected");
            return Err(ReportError::Status {
                code: response.status,
                body: response.body,
            });
        }
        self.metrics.inc_reports("ok");

        if let Some(registry) = &self.registry {
            if !response.body.is_empty() {
                registry.submit(&response.body).await;
            }
        }
        Ok(())
    }

    /// One plan capture tick against the registry
    pub async fn capture_tick(&self, registry: &CaptureRegistry) -> Vec<CapturedPlan> {
        let plans = {
            let _timer = self.metrics.capture_tick_seconds.start_timer();
            registry.capture_tick().await
        };
        let stats = registry.stats().await;
        self.metrics
            .set_pending(stats.pending_init, stats.pending_capture);
        plans
    }

    /// POST captured plans to the plans endpoint
    pub async fn send_plans(&self, plans: &[CapturedPlan]) -> Result<(), ReportError> {
        let json = serde_json::to_vec(&PlanPayload::new(&self.settings.identity, plans))
            .map_err(|e| ReportError::Encode {
                reason: e.to_string(),
            })?;
        let body = self.encode_body(json)?;

        let response = match self
            .transport
            .post(&self.settings.endpoints.plans, body, self.settings.gzip)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.metrics.inc_plan_posts("failed");
                return Err(e.into());
            }
        };
        if !response.is_success() {
            self.metrics.inc_plan_posts("rejected");
            return Err(ReportError::Status {
                code: response.status,
                body: response.body,
            });
        }

        self.metrics.inc_plan_posts("ok");
        info!("InsightAgent: Sent {} query plans", plans.len());
        Ok(())
    }

    fn encode_body(&self, json: Vec<u8>) -> Result<Vec<u8>, ReportError> {
        if !self.settings.gzip {
            return Ok(json);
        }
        payload::gzip(&json).map_err(|e| ReportError::Encode {
            reason: e.to_string(),
        })
    }

    async fn run_reports(
        self,
        start: time::Instant,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval_at(start, self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let agent = self.clone();
                    let outcome = contain_tick("metrics", async move {
                        agent.dispatch().map(|(cycle, _delivery)| cycle)
                    })
                    .await;
                    if let Some(Err(e)) = outcome {
                        log_report_error("metrics", &e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("InsightAgent: Metrics reporting stopped");
                    break;
                }
            }
        }
    }

    async fn run_capture(
        self,
        registry: Arc<CaptureRegistry>,
        start: time::Instant,
        plan_tx: mpsc::Sender<Vec<CapturedPlan>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval_at(start, self.settings.capture_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let agent = self.clone();
                    let registry = registry.clone();
                    let plans = contain_tick("plan capture", async move {
                        agent.capture_tick(&registry).await
                    })
                    .await
                    .unwrap_or_default();

                    if !plans.is_empty() && plan_tx.send(plans).await.is_err() {
                        warn!("InsightAgent: Plan queue closed, stopping plan capture");
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("InsightAgent: Plan capture stopped");
                    break;
                }
            }
        }
    }

    async fn run_plan_sender(
        self,
        mut plan_rx: mpsc::Receiver<Vec<CapturedPlan>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                maybe_plans = plan_rx.recv() => {
                    let Some(plans) = maybe_plans else {
                        break;
                    };
                    if let Err(e) = self.send_plans(&plans).await {
                        log_report_error("query plans", &e);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}

/// Handle to a started (or inactive) agent
pub struct AgentHandle {
    active: bool,
    shutdown_tx: Option<broadcast::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn inactive() -> Self {
        Self {
            active: false,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    /// True if the agent is actively reporting
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop the periodic tasks. In-flight deliveries are abandoned.
    pub async fn shutdown(self) {
        if let Some(shutdown_tx) = self.shutdown_tx {
            let _ = shutdown_tx.send(());
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("InsightAgent: Task ended abnormally: {}", e);
            }
        }
    }
}

/// Run one tick body in its own task so a panic is logged instead of
/// ending the loop.
async fn contain_tick<F, T>(name: &str, tick: F) -> Option<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(tick).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!("InsightAgent: Error in {} tick: {}", name, e);
            None
        }
    }
}

fn log_report_error(what: &str, e: &ReportError) {
    match e {
        ReportError::Status { code, body } => {
            info!(
                "InsightAgent: Failed to send {} - response code:{} body:{}",
                what, code, body
            );
        }
        ReportError::InFlight => {
            info!("InsightAgent: Skipping {} cycle, previous report in flight", what);
        }
        other => warn!("InsightAgent: Error reporting {}: {}", what, other),
    }
}

fn micros(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::TransportError;
    use crate::domain::ports::{NoMetrics, TransportResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedTransport {
        response: TransportResponse,
        posts: Mutex<Vec<(String, bool)>>,
    }

    impl FixedTransport {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: TransportResponse {
                    status,
                    body: body.to_string(),
                },
                posts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn post(
            &self,
            url: &str,
            _body: Vec<u8>,
            gzipped: bool,
        ) -> Result<TransportResponse, TransportError> {
            self.posts.lock().unwrap().push((url.to_string(), gzipped));
            Ok(self.response.clone())
        }

        async fn get(&self, _url: &str) -> Result<TransportResponse, TransportError> {
            Ok(self.response.clone())
        }
    }

    fn config() -> InsightConfig {
        InsightConfig {
            key: Some("secret".to_string()),
            url: "http://collector:8090".to_string(),
            app_name: Some("orders".to_string()),
            environment: Some("test".to_string()),
            instance_id: Some("i-1".to_string()),
            ..Default::default()
        }
    }

    fn agent(transport: Arc<FixedTransport>, config: &InsightConfig) -> InsightAgent {
        InsightAgent::from_config(
            config,
            transport,
            Arc::new(NoMetrics),
            None,
            Metrics::new().expect("metrics"),
        )
        .expect("agent enabled")
    }

    #[test]
    fn test_from_config_opts_out_without_key() {
        let transport = Arc::new(FixedTransport::new(200, ""));
        let config = InsightConfig {
            key: Some("none".to_string()),
            ..config()
        };
        let agent = InsightAgent::from_config(
            &config,
            transport,
            Arc::new(NoMetrics),
            None,
            Metrics::new().expect("metrics"),
        );
        assert!(agent.is_none());
    }

    #[test]
    fn test_from_config_opts_out_with_bad_url() {
        let transport = Arc::new(FixedTransport::new(200, ""));
        let config = InsightConfig {
            url: "::nope".to_string(),
            ..config()
        };
        let agent = InsightAgent::from_config(
            &config,
            transport,
            Arc::new(NoMetrics),
            None,
            Metrics::new().expect("metrics"),
        );
        assert!(agent.is_none());
    }

    #[test]
    fn test_from_config_opts_out_with_unrepresentable_stale_after() {
        let transport = Arc::new(FixedTransport::new(200, ""));
        let config = InsightConfig {
            stale_after_secs: i64::MAX,
            ..config()
        };
        let agent = InsightAgent::from_config(
            &config,
            transport,
            Arc::new(NoMetrics),
            None,
            Metrics::new().expect("metrics"),
        );
        assert!(agent.is_none());
    }

    #[tokio::test]
    async fn test_start_inactive_when_period_cannot_be_scheduled() {
        let transport = Arc::new(FixedTransport::new(200, ""));
        let mut settings = ReporterSettings::from_config(&config()).expect("settings");
        settings.period = Duration::MAX;
        let agent = InsightAgent::new(
            settings,
            transport.clone(),
            Arc::new(NoMetrics),
            Metrics::new().expect("metrics"),
        );

        let handle = agent.start().await;
        assert!(!handle.is_active());
        handle.shutdown().await;
        assert!(transport.posts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_build_payload_omits_dbs_when_empty() {
        let agent = agent(Arc::new(FixedTransport::new(200, "")), &config());
        let payload = agent.build_payload().expect("payload");

        assert_eq!(payload.app_name.as_deref(), Some("orders"));
        assert_eq!(payload.metrics, Some(vec![]));
        assert!(payload.dbs.is_none());
        assert_eq!(payload.collect, 0);
        assert!(payload.event_time > 0);
    }

    #[test]
    fn test_build_payload_respects_feature_flags() {
        let config = InsightConfig {
            collect_metrics: false,
            ..config()
        };
        let agent = agent(Arc::new(FixedTransport::new(200, "")), &config);
        assert!(agent.build_payload().expect("payload").metrics.is_none());
    }

    #[tokio::test]
    async fn test_ping_requires_ok_body() {
        let ok = agent(Arc::new(FixedTransport::new(200, "ok")), &config());
        assert!(ok.ping().await);

        let wrong_body = agent(Arc::new(FixedTransport::new(200, "hello")), &config());
        assert!(!wrong_body.ping().await);

        let bad_status = agent(Arc::new(FixedTransport::new(503, "ok")), &config());
        assert!(!bad_status.ping().await);
    }

    #[tokio::test]
    async fn test_start_gated_by_ping() {
        let config = InsightConfig {
            ping: true,
            ..config()
        };
        let handle = agent(Arc::new(FixedTransport::new(404, "")), &config)
            .start()
            .await;
        assert!(!handle.is_active());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_posts_gzipped_report() {
        let transport = Arc::new(FixedTransport::new(200, ""));
        let agent = agent(transport.clone(), &config());

        let (cycle, delivery) = agent.dispatch().expect("dispatch");
        delivery.await.expect("delivery");

        assert!(cycle.payload_byte_length > 0);
        let posts = transport.posts.lock().unwrap();
        assert_eq!(
            posts.as_slice(),
            &[("http://collector:8090/api/ingest/metrics".to_string(), true)]
        );
        assert_eq!(
            agent
                .metrics()
                .reports_total
                .with_label_values(&["ok"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_rejected_status_is_reported() {
        let transport = Arc::new(FixedTransport::new(500, "boom"));
        let agent = agent(transport, &config());

        let result = agent.deliver(b"{}".to_vec()).await;
        assert!(matches!(result, Err(ReportError::Status { code: 500, .. })));
        assert_eq!(
            agent
                .metrics()
                .reports_total
                .with_label_values(&["rejected"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_second_dispatch_skipped_while_in_flight() {
        let agent = agent(Arc::new(FixedTransport::new(200, "")), &config());
        agent.in_flight.store(true, Ordering::Release);
        assert!(matches!(agent.dispatch(), Err(ReportError::InFlight)));

        agent.in_flight.store(false, Ordering::Release);
        let (_, delivery) = agent.dispatch().expect("dispatch");
        delivery.await.expect("delivery");
        assert!(!agent.in_flight.load(Ordering::Acquire));
    }
}
