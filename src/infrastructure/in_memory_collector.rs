//! In-memory plan collector
//!
//! A [`PlanCollector`] for hosts without a native plan capture facility. The
//! host reports each query execution it observes; the collector keeps the
//! latest shape per plan hash and, once a hash is armed, captures the first
//! execution at or above the requested threshold.
//!
//! Also the collector the integration tests and the standalone binary run
//! against.

use crate::domain::capture::{CaptureBudget, CaptureInitRequest, CapturedPlan};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::ports::PlanCollector;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// One observed query execution
#[derive(Debug, Clone)]
pub struct QueryExecution {
    pub hash: String,
    pub label: String,
    pub sql: String,
    pub bind: String,
    pub plan: String,
    pub query_time_micros: i64,
    /// Time the host spent obtaining the plan text
    pub capture_micros: i64,
}

#[derive(Debug)]
struct KnownPlan {
    label: String,
    sql: String,
    threshold_micros: Option<i64>,
    captured: Option<CapturedPlan>,
}

pub struct InMemoryPlanCollector {
    plans: Arc<RwLock<HashMap<String, KnownPlan>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryPlanCollector {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            plans: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Register an execution. Captures it when its hash is armed and the
    /// query time reaches the armed threshold.
    pub async fn record_execution(&self, execution: QueryExecution) {
        let mut plans = self.plans.write().await;
        let known = plans
            .entry(execution.hash.clone())
            .or_insert_with(|| KnownPlan {
                label: execution.label.clone(),
                sql: execution.sql.clone(),
                threshold_micros: None,
                captured: None,
            });
        known.label = execution.label.clone();
        known.sql = execution.sql.clone();

        let Some(threshold) = known.threshold_micros else {
            return;
        };
        if execution.query_time_micros < threshold {
            return;
        }

        let capture_count = known.captured.as_ref().map_or(0, |c| c.capture_count) + 1;
        debug!(
            "InMemoryPlanCollector: Captured {} ({}us >= {}us)",
            execution.hash, execution.query_time_micros, threshold
        );
        known.captured = Some(CapturedPlan {
            hash: execution.hash,
            label: execution.label,
            sql: execution.sql,
            bind: execution.bind,
            plan: execution.plan,
            query_time_micros: execution.query_time_micros,
            capture_micros: execution.capture_micros,
            capture_count,
            captured_at: self.clock.now(),
        });
    }

    pub async fn is_armed(&self, hash: &str) -> bool {
        self.plans
            .read()
            .await
            .get(hash)
            .is_some_and(|p| p.threshold_micros.is_some())
    }
}

impl Default for InMemoryPlanCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanCollector for InMemoryPlanCollector {
    async fn initiate(&self, request: &CaptureInitRequest) -> Result<HashSet<String>> {
        let mut plans = self.plans.write().await;
        let mut armed = HashSet::new();

        for (hash, known) in plans.iter_mut() {
            let Some(threshold) = request.threshold_micros(hash) else {
                continue;
            };
            if known.threshold_micros.is_none() {
                debug!(
                    "InMemoryPlanCollector: Armed {} {} threshold:{}us",
                    hash, known.label, threshold
                );
                known.threshold_micros = Some(threshold);
            }
            armed.insert(hash.clone());
        }
        Ok(armed)
    }

    async fn collect(&self, budget: CaptureBudget) -> Result<Vec<CapturedPlan>> {
        let started = Instant::now();
        let max_time = Duration::from_millis(budget.max_time_millis);
        let mut plans = self.plans.write().await;
        let mut harvested = Vec::new();

        for known in plans.values_mut() {
            if harvested.len() >= budget.max_count || started.elapsed() > max_time {
                break;
            }
            if let Some(plan) = known.captured.take() {
                known.threshold_micros = None;
                harvested.push(plan);
            }
        }
        Ok(harvested)
    }
}
