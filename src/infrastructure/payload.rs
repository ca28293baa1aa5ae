//! Wire format of the ingest payloads.
//!
//! Field order follows declaration order, which is the order the collector
//! expects. Identity fields that are not configured are omitted rather than
//! sent as null. Free text (`sql`, `bind`, `plan`) goes through serde_json's
//! string escaping, so quotes, backslashes and control characters are safe.

use crate::domain::capture::CapturedPlan;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Identity of the reporting application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
    pub environment: Option<String>,
    pub app_name: Option<String>,
    pub instance_id: Option<String>,
    pub version: Option<String>,
}

/// Periodic metrics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Epoch millis
    pub event_time: i64,
    /// Micros spent collecting the previous report
    pub collect: u64,
    /// Micros spent transmitting the previous report
    pub report: u64,
    /// Millis of the previous round trip
    pub latency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbs: Option<Vec<serde_json::Value>>,
}

/// Batch of captured query plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub plans: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub hash: String,
    pub when_captured: DateTime<Utc>,
    pub label: String,
    pub query_time_micros: i64,
    pub capture_micros: i64,
    pub capture_count: i64,
    pub bind: String,
    pub plan: String,
    pub sql: String,
}

impl From<&CapturedPlan> for PlanEntry {
    fn from(plan: &CapturedPlan) -> Self {
        Self {
            hash: plan.hash.clone(),
            when_captured: plan.captured_at,
            label: plan.label.clone(),
            query_time_micros: plan.query_time_micros,
            capture_micros: plan.capture_micros,
            capture_count: plan.capture_count,
            bind: plan.bind.clone(),
            plan: plan.plan.clone(),
            sql: plan.sql.clone(),
        }
    }
}

impl From<PlanEntry> for CapturedPlan {
    fn from(entry: PlanEntry) -> Self {
        Self {
            hash: entry.hash,
            label: entry.label,
            sql: entry.sql,
            bind: entry.bind,
            plan: entry.plan,
            query_time_micros: entry.query_time_micros,
            capture_micros: entry.capture_micros,
            capture_count: entry.capture_count,
            captured_at: entry.when_captured,
        }
    }
}

impl PlanPayload {
    pub fn new(identity: &AppIdentity, plans: &[CapturedPlan]) -> Self {
        Self {
            environment: identity.environment.clone(),
            app_name: identity.app_name.clone(),
            plans: plans.iter().map(PlanEntry::from).collect(),
        }
    }
}

pub fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn sample_plan() -> CapturedPlan {
        CapturedPlan {
            hash: "a1b2c3".to_string(),
            label: "Customer.findList".to_string(),
            sql: "select t0.id from customer t0 where t0.name = ?\n  and t0.note like '%\"x\"%'"
                .to_string(),
            bind: "[\"C:\\\\tmp\\\\a\\tb\"]".to_string(),
            plan: "Seq Scan on customer\r\n\u{8}\u{c}  Filter: (name = $1)".to_string(),
            query_time_micros: 1520,
            capture_micros: 310,
            capture_count: 3,
            captured_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn test_metrics_payload_key_order() {
        let payload = MetricsPayload {
            environment: Some("prod".to_string()),
            app_name: Some("orders".to_string()),
            instance_id: Some("pod-1".to_string()),
            version: Some("1.2.0".to_string()),
            event_time: 1_700_000_000_000,
            collect: 12,
            report: 34,
            latency: 56,
            metrics: Some(vec![serde_json::json!({"name": "m", "value": 1})]),
            dbs: None,
        };

        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.starts_with(
            "{\"environment\":\"prod\",\"appName\":\"orders\",\"instanceId\":\"pod-1\",\"version\":\"1.2.0\",\"eventTime\":1700000000000,\"collect\":12,\"report\":34,\"latency\":56,\"metrics\":["
        ));
        assert!(!json.contains("\"dbs\""));
    }

    #[test]
    fn test_unset_identity_is_omitted() {
        let payload = MetricsPayload {
            environment: None,
            app_name: None,
            instance_id: None,
            version: None,
            event_time: 1,
            collect: 0,
            report: 0,
            latency: 0,
            metrics: None,
            dbs: None,
        };

        let json = serde_json::to_string(&payload).expect("serialize");
        assert_eq!(
            json,
            "{\"eventTime\":1,\"collect\":0,\"report\":0,\"latency\":0}"
        );
    }

    #[test]
    fn test_plan_payload_round_trip_preserves_special_characters() {
        let identity = AppIdentity {
            environment: Some("dev".to_string()),
            app_name: Some("orders".to_string()),
            ..Default::default()
        };
        let plan = sample_plan();

        let json = serde_json::to_string(&PlanPayload::new(&identity, &[plan.clone()]))
            .expect("serialize");
        let decoded: PlanPayload = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(decoded.environment.as_deref(), Some("dev"));
        assert_eq!(decoded.app_name.as_deref(), Some("orders"));
        let plans: Vec<CapturedPlan> = decoded.plans.into_iter().map(Into::into).collect();
        assert_eq!(plans, vec![plan]);
    }

    #[test]
    fn test_plan_text_is_escaped() {
        let json = serde_json::to_string(&PlanPayload::new(&AppIdentity::default(), &[sample_plan()]))
            .expect("serialize");

        assert!(json.contains("\"whenCaptured\":\"2026-03-14T09:26:53Z\""));
        assert!(json.contains("where t0.name = ?\\n  and t0.note like '%\\\"x\\\"%'"));
        assert!(json.contains("C:\\\\\\\\tmp"));
        assert!(json.contains("\\r\\n\\b\\f"));
        assert!(json.contains("\\\\a\\\\tb"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_gzip_round_trip() {
        let body = b"{\"eventTime\":1}".repeat(20);
        let compressed = gzip(&body).expect("gzip");
        assert!(compressed.len() < body.len());

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut restored = Vec::new();
        decoder.read_to_end(&mut restored).expect("gunzip");
        assert_eq!(restored, body);
    }
}
