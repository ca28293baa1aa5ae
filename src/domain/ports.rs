use crate::domain::capture::{CaptureBudget, CaptureInitRequest, CapturedPlan};
use crate::domain::errors::TransportError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Adapter to the host database engine's plan capture facility.
#[async_trait]
pub trait PlanCollector: Send + Sync {
    /// Arm capture for the requested plans. Returns exactly the hashes armed
    /// by this call; anything else stays pending for a later retry. Must be
    /// idempotent per hash.
    async fn initiate(&self, request: &CaptureInitRequest) -> Result<HashSet<String>>;

    /// Harvest plans that reached their capture threshold, bounded by the
    /// budget. Returns an empty list when nothing is ready.
    async fn collect(&self, budget: CaptureBudget) -> Result<Vec<CapturedPlan>>;
}

/// Response of a transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }
}

/// Outbound HTTP channel to the remote collector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body, optionally already gzip-compressed.
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        gzipped: bool,
    ) -> Result<TransportResponse, TransportError>;

    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

/// Host metrics to embed in the report. Both arrays are opaque to the agent.
pub trait MetricsSource: Send + Sync {
    fn collect_metrics(&self) -> Result<Vec<serde_json::Value>>;

    fn collect_databases(&self) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}

/// Metrics source for hosts that only use plan capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl MetricsSource for NoMetrics {
    fn collect_metrics(&self) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_boundary() {
        let ok = TransportResponse {
            status: 299,
            body: String::new(),
        };
        let redirect = TransportResponse {
            status: 300,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }
}
