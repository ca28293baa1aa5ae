//! Agent configuration parsing from environment variables.
//!
//! Every setting has a default; values that fail to parse fall back to it.
//! Parsing goes through a lookup function so it can be exercised without
//! touching the process environment.

use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const METRICS_PATH: &str = "api/ingest/metrics";
const PLANS_PATH: &str = "api/ingest/plans";
const PING_PATH: &str = "api/ingest";

// Periods, timeouts and the staleness gate are bounded to one day.
const SECS_RANGE: RangeInclusive<u64> = 1..=86_400;
const STALE_AFTER_RANGE: RangeInclusive<i64> = 0..=86_400;

/// Insight agent configuration
#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub enabled: bool,
    pub key: Option<String>,
    pub url: String,
    pub period_secs: u64,
    pub timeout_secs: u64,
    pub gzip: bool,
    pub ping: bool,
    pub collect_metrics: bool,
    pub collect_db_metrics: bool,

    // Query plan capture
    pub capture_plans: bool,
    pub capture_period_secs: u64,
    pub capture_max_count: usize,
    pub capture_max_time_millis: u64,
    pub stale_after_secs: i64,

    // Identity
    pub app_name: Option<String>,
    pub environment: Option<String>,
    pub instance_id: Option<String>,
    pub version: Option<String>,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key: None,
            url: "http://localhost:8090".to_string(),
            period_secs: 60,
            timeout_secs: 15,
            gzip: true,
            ping: false,
            collect_metrics: true,
            collect_db_metrics: true,
            capture_plans: false,
            capture_period_secs: 10,
            capture_max_count: 10,
            capture_max_time_millis: 10_000,
            stale_after_secs: 60,
            app_name: None,
            environment: None,
            instance_id: None,
            version: None,
        }
    }
}

/// Resolved collector endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub metrics: String,
    pub plans: String,
    pub ping: String,
}

impl InsightConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |name: &str| lookup(name).map(|v| v.trim().to_string());

        let non_empty = |name: &str| parse(name).filter(|v| !v.is_empty());
        let instance_id = non_empty("APP_INSTANCE_ID")
            .or_else(|| non_empty("HOSTNAME"))
            .or_else(|| Some(uuid::Uuid::new_v4().to_string()));

        Self {
            enabled: parse_or(parse("INSIGHT_ENABLED"), defaults.enabled),
            key: parse("INSIGHT_KEY"),
            url: parse("INSIGHT_URL").unwrap_or(defaults.url),
            period_secs: parse_in(
                parse("INSIGHT_PERIOD_SECS"),
                SECS_RANGE,
                defaults.period_secs,
            ),
            timeout_secs: parse_in(
                parse("INSIGHT_TIMEOUT_SECS"),
                SECS_RANGE,
                defaults.timeout_secs,
            ),
            gzip: parse_or(parse("INSIGHT_GZIP"), defaults.gzip),
            ping: parse_or(parse("INSIGHT_PING"), defaults.ping),
            collect_metrics: parse_or(parse("INSIGHT_COLLECT_METRICS"), defaults.collect_metrics),
            collect_db_metrics: parse_or(
                parse("INSIGHT_COLLECT_DB_METRICS"),
                defaults.collect_db_metrics,
            ),
            capture_plans: parse_or(parse("INSIGHT_CAPTURE_PLANS"), defaults.capture_plans),
            capture_period_secs: parse_in(
                parse("INSIGHT_CAPTURE_PERIOD_SECS"),
                SECS_RANGE,
                defaults.capture_period_secs,
            ),
            capture_max_count: parse_or(
                parse("INSIGHT_CAPTURE_MAX_COUNT"),
                defaults.capture_max_count,
            ),
            capture_max_time_millis: parse_or(
                parse("INSIGHT_CAPTURE_MAX_TIME_MILLIS"),
                defaults.capture_max_time_millis,
            ),
            stale_after_secs: parse_in(
                parse("INSIGHT_STALE_AFTER_SECS"),
                STALE_AFTER_RANGE,
                defaults.stale_after_secs,
            ),
            app_name: parse("APP_NAME"),
            environment: parse("APP_ENVIRONMENT"),
            instance_id,
            version: parse("APP_VERSION"),
        }
    }

    /// A key is valid when present, non-blank and not `none`.
    pub fn has_valid_key(&self) -> bool {
        self.key
            .as_deref()
            .map(str::trim)
            .is_some_and(|k| !k.is_empty() && !k.eq_ignore_ascii_case("none"))
    }

    /// Not enabled without a valid key or when explicitly disabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.has_valid_key()
    }

    pub fn endpoints(&self) -> Result<Endpoints, url::ParseError> {
        let mut base = Url::parse(&self.url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Endpoints {
            metrics: base.join(METRICS_PATH)?.to_string(),
            plans: base.join(PLANS_PATH)?.to_string(),
            ping: base.join(PING_PATH)?.to_string(),
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }

    pub fn capture_period(&self) -> Duration {
        Duration::from_secs(self.capture_period_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

/// Out-of-range values are treated like unparseable ones.
fn parse_in<T: FromStr + PartialOrd>(
    value: Option<String>,
    range: RangeInclusive<T>,
    default: T,
) -> T {
    value
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| range.contains(v))
        .unwrap_or(default)
}
