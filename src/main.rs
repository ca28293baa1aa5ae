//! Insight Agent - headless telemetry reporter
//!
//! Pushes periodic metrics reports to the collector and, when enabled, answers
//! the collector's query plan capture commands.
//!
//! # Usage
//! ```sh
//! INSIGHT_KEY=secret INSIGHT_URL=http://collector:8090 cargo run
//! ```
//!
//! # Environment Variables
//! - `INSIGHT_KEY` - API key; the agent stays inactive without one
//! - `INSIGHT_URL` - Collector base URL (default: http://localhost:8090)
//! - `INSIGHT_PERIOD_SECS` - Seconds between metrics reports (default: 60)
//! - `INSIGHT_CAPTURE_PLANS` - Enable query plan capture (default: false)
//!
//! The standalone agent has no host engine feeding it query executions, so
//! its in-memory plan collector never sees a plan hash. Plan capture only
//! arms plans when the agent is embedded and the host records executions.

use anyhow::Result;
use clap::Parser;
use insight_agent::application::InsightAgent;
use insight_agent::config::InsightConfig;
use insight_agent::domain::ports::PlanCollector;
use insight_agent::infrastructure::observability::{AgentMetricsSource, Metrics};
use insight_agent::infrastructure::{HttpTransport, InMemoryPlanCollector};
use std::sync::Arc;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "Push-based telemetry agent", long_about = None)]
struct Cli {
    /// Collector base URL
    #[arg(long, env = "INSIGHT_URL")]
    url: Option<String>,

    /// API key sent with every request
    #[arg(long, env = "INSIGHT_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Seconds between metrics reports
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    period: Option<u64>,

    /// Enable query plan capture
    #[arg(long)]
    capture_plans: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();

    info!("Insight Agent {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = InsightConfig::from_env();
    if let Some(url) = cli.url {
        config.url = url;
    }
    if let Some(key) = cli.key {
        config.key = Some(key);
    }
    if let Some(period) = cli.period {
        config.period_secs = period;
    }
    if cli.capture_plans {
        config.capture_plans = true;
    }
    info!(
        "Configuration loaded: url={}, period={}s, capture_plans={}",
        config.url, config.period_secs, config.capture_plans
    );

    let metrics = Metrics::new()?;
    let transport = Arc::new(HttpTransport::new(
        config.key.clone().unwrap_or_default(),
        config.timeout(),
    ));
    let source = Arc::new(AgentMetricsSource::new(metrics.clone()));
    let collector: Option<Arc<dyn PlanCollector>> = if config.capture_plans {
        warn!(
            "Plan capture enabled but no host records query executions; no plans will be armed"
        );
        Some(Arc::new(InMemoryPlanCollector::new()))
    } else {
        None
    };

    let Some(agent) = InsightAgent::from_config(&config, transport, source, collector, metrics.clone())
    else {
        info!("Insight reporting not configured. Exiting.");
        return Ok(());
    };

    let handle = agent.start().await;
    if !handle.is_active() {
        info!("Insight agent inactive. Exiting.");
        return Ok(());
    }

    info!("Agent running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Stopping agent...");
    handle.shutdown().await;
    debug!("Final agent metrics:\n{}", metrics.render());

    Ok(())
}
