//! Query plan capture domain types.
//!
//! A `CaptureInitRequest` describes which plans the remote collector wants
//! captured and with what thresholds. A `CapturedPlan` is the result handed
//! back by the host engine once a plan has been harvested.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Request to arm query plan capture, built from one command batch.
///
/// An empty request (`all_plans == false` and no entries) is the no-op value
/// and the terminal state once every entry has been armed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureInitRequest {
    all_plans: bool,
    default_threshold_micros: i64,
    entries: HashMap<String, i64>,
}

impl CaptureInitRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when there is nothing left to arm.
    pub fn is_empty(&self) -> bool {
        !self.all_plans && self.entries.is_empty()
    }

    pub fn is_all(&self) -> bool {
        self.all_plans
    }

    pub fn set_all(&mut self) {
        self.all_plans = true;
    }

    pub fn default_threshold_micros(&self) -> i64 {
        self.default_threshold_micros
    }

    pub fn set_default_threshold_micros(&mut self, micros: i64) {
        self.default_threshold_micros = micros;
    }

    /// Add a plan hash. Without an explicit threshold the current batch
    /// default is resolved now, so a later default does not apply to it.
    pub fn add(&mut self, hash: impl Into<String>, threshold_micros: Option<i64>) {
        let threshold = threshold_micros.unwrap_or(self.default_threshold_micros);
        self.entries.insert(hash.into(), threshold);
    }

    /// Remove an armed hash, returning its threshold if it was requested.
    pub fn remove(&mut self, hash: &str) -> Option<i64> {
        self.entries.remove(hash)
    }

    pub fn includes(&self, hash: &str) -> bool {
        self.all_plans || self.entries.contains_key(hash)
    }

    /// Threshold to apply to `hash`, or `None` when it is not requested.
    pub fn threshold_micros(&self, hash: &str) -> Option<i64> {
        match self.entries.get(hash) {
            Some(threshold) => Some(*threshold),
            None if self.all_plans => Some(self.default_threshold_micros),
            None => None,
        }
    }

    pub fn entries(&self) -> &HashMap<String, i64> {
        &self.entries
    }
}

/// A plan harvested from the host engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPlan {
    pub hash: String,
    pub label: String,
    pub sql: String,
    pub bind: String,
    pub plan: String,
    pub query_time_micros: i64,
    pub capture_micros: i64,
    pub capture_count: i64,
    pub captured_at: DateTime<Utc>,
}

/// Limits for one harvest pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureBudget {
    pub max_count: usize,
    pub max_time_millis: u64,
}

impl Default for CaptureBudget {
    fn default() -> Self {
        Self {
            max_count: 10,
            max_time_millis: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_noop() {
        let request = CaptureInitRequest::new();
        assert!(request.is_empty());
        assert!(!request.is_all());
        assert_eq!(request.threshold_micros("any"), None);
    }

    #[test]
    fn test_threshold_resolved_at_insertion() {
        let mut request = CaptureInitRequest::new();
        request.add("early", None);
        request.set_default_threshold_micros(700);
        request.add("late", None);

        assert_eq!(request.threshold_micros("early"), Some(0));
        assert_eq!(request.threshold_micros("late"), Some(700));
    }

    #[test]
    fn test_all_plans_uses_default_for_unlisted_hash() {
        let mut request = CaptureInitRequest::new();
        request.set_all();
        request.set_default_threshold_micros(250);
        request.add("explicit", Some(900));

        assert!(request.includes("unlisted"));
        assert_eq!(request.threshold_micros("unlisted"), Some(250));
        assert_eq!(request.threshold_micros("explicit"), Some(900));
    }

    #[test]
    fn test_remove_does_not_clear_all_plans() {
        let mut request = CaptureInitRequest::new();
        request.set_all();
        request.add("h1", Some(10));
        assert_eq!(request.remove("h1"), Some(10));
        assert!(request.is_all());
        assert!(!request.is_empty());
    }
}
