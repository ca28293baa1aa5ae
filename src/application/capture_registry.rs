//! Query plan capture state machine.
//!
//! Per plan hash: unrequested -> pending init -> pending capture -> harvested
//! (back to unrequested). Requests the collector cannot fully arm yet are kept
//! in `pending_init` and retried on every capture tick; armed hashes wait in
//! `pending_capture` until a harvest returns them.
//!
//! Both collections sit behind one async mutex that is held across the
//! collector calls, so command submission and the capture tick never
//! interleave.

use crate::domain::capture::{CaptureBudget, CaptureInitRequest, CapturedPlan};
use crate::domain::clock::Clock;
use crate::domain::command;
use crate::domain::ports::PlanCollector;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_STALE_AFTER_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct PendingInit {
    request: CaptureInitRequest,
    received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CaptureState {
    pending_init: Vec<PendingInit>,
    pending_capture: HashMap<String, DateTime<Utc>>,
}

/// Counts for logging and metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub pending_init: usize,
    pub pending_capture: usize,
}

pub struct CaptureRegistry {
    collector: Arc<dyn PlanCollector>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    budget: CaptureBudget,
    metrics: Option<Metrics>,
    state: Mutex<CaptureState>,
}

impl CaptureRegistry {
    pub fn new(collector: Arc<dyn PlanCollector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            collector,
            clock,
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            budget: CaptureBudget::default(),
            metrics: None,
            state: Mutex::new(CaptureState::default()),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_budget(mut self, budget: CaptureBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle a command body from the collector: parse, arm what can be
    /// armed now and queue the remainder for the next tick.
    pub async fn submit(&self, raw_message: &str) {
        let mut request = command::parse(raw_message);
        if request.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        self.arm_locked(&mut state.pending_capture, &mut request).await;
        if request.is_empty() {
            return;
        }

        if state.pending_init.iter().any(|p| p.request == request) {
            debug!("CaptureRegistry: Identical request already pending init");
            return;
        }
        state.pending_init.push(PendingInit {
            request,
            received_at: self.clock.now(),
        });
    }

    /// Arm the request through the collector. Armed hashes are removed from
    /// the request and tracked as pending capture.
    pub async fn arm(&self, request: &mut CaptureInitRequest) -> HashSet<String> {
        let mut state = self.state.lock().await;
        self.arm_locked(&mut state.pending_capture, request).await
    }

    /// Re-attempt every pending init request, dropping those fully armed.
    pub async fn retry_pending_init(&self) {
        let mut state = self.state.lock().await;
        self.retry_locked(&mut state).await;
    }

    /// True when the oldest armed hash has waited longer than the staleness
    /// gate.
    pub async fn has_stale_pending(&self) -> bool {
        let state = self.state.lock().await;
        self.has_stale_locked(&state)
    }

    /// Collect ready plans and clear their hashes from pending capture.
    pub async fn harvest(&self, budget: CaptureBudget) -> Vec<CapturedPlan> {
        let mut state = self.state.lock().await;
        self.harvest_locked(&mut state, budget).await
    }

    /// One capture tick: retry pending init, then harvest if anything is
    /// stale. Runs under a single lock acquisition.
    pub async fn capture_tick(&self) -> Vec<CapturedPlan> {
        let mut state = self.state.lock().await;
        self.retry_locked(&mut state).await;
        if !self.has_stale_locked(&state) {
            return Vec::new();
        }

        let plans = self.harvest_locked(&mut state, self.budget).await;
        if !state.pending_capture.is_empty() {
            let hashes: Vec<&String> = state.pending_capture.keys().collect();
            info!(
                "CaptureRegistry: {} pending query plan capture for plans - {:?}",
                hashes.len(),
                hashes
            );
        }
        plans
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        RegistryStats {
            pending_init: state.pending_init.len(),
            pending_capture: state.pending_capture.len(),
        }
    }

    pub async fn is_pending_capture(&self, hash: &str) -> bool {
        self.state.lock().await.pending_capture.contains_key(hash)
    }

    async fn arm_locked(
        &self,
        pending_capture: &mut HashMap<String, DateTime<Utc>>,
        request: &mut CaptureInitRequest,
    ) -> HashSet<String> {
        let armed = match self.collector.initiate(request).await {
            Ok(armed) => armed,
            Err(e) => {
                warn!("CaptureRegistry: Error initiating query plan capture: {:#}", e);
                return HashSet::new();
            }
        };

        let now = self.clock.now();
        for hash in &armed {
            request.remove(hash);
            if !pending_capture.contains_key(hash) {
                info!("CaptureRegistry: Initialised query plan capture for {}", hash);
                pending_capture.insert(hash.clone(), now);
                if let Some(metrics) = &self.metrics {
                    metrics.plans_armed_total.inc();
                }
            }
        }
        armed
    }

    /// Entries are updated in place so an unwinding collector call cannot
    /// drop requests that were not reached yet.
    async fn retry_locked(&self, state: &mut CaptureState) {
        let CaptureState {
            pending_init,
            pending_capture,
        } = state;

        for pending in pending_init.iter_mut() {
            self.arm_locked(pending_capture, &mut pending.request).await;
            if pending.request.is_empty() {
                debug!(
                    "CaptureRegistry: Request received at {} fully initialised",
                    pending.received_at
                );
            }
        }
        pending_init.retain(|p| !p.request.is_empty());
    }

    fn has_stale_locked(&self, state: &CaptureState) -> bool {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.stale_after) else {
            return false;
        };
        state
            .pending_capture
            .values()
            .min()
            .is_some_and(|earliest| *earliest < cutoff)
    }

    async fn harvest_locked(
        &self,
        state: &mut CaptureState,
        budget: CaptureBudget,
    ) -> Vec<CapturedPlan> {
        let plans = match self.collector.collect(budget).await {
            Ok(plans) => plans,
            Err(e) => {
                warn!("CaptureRegistry: Error during query plan capture: {:#}", e);
                return Vec::new();
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.plans_captured_total.inc_by(plans.len() as f64);
        }
        for plan in &plans {
            match state.pending_capture.remove(&plan.hash) {
                Some(armed_at) => info!(
                    "CaptureRegistry: Query plan captured for {} initialised:{}",
                    plan.hash, armed_at
                ),
                None => debug!(
                    "CaptureRegistry: Query plan captured for {} without pending entry",
                    plan.hash
                ),
            }
        }
        plans
    }
}
