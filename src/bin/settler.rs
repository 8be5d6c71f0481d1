//! One-shot settlement sweep
//!
//! Runs a single pass of the settlement policy and exits, for cron or
//! systemd timers where the long-running daemon is not wanted.
//!
//! ```bash
//! skillmesh-settler --db-path /data/skillmesh.db
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use skillmesh::{
    Config, EventBus, ExchangeService, HttpMeetingProvider, MarketDb, SettlementScheduler,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("skillmesh=info".parse()?),
        )
        .init();

    let config = Config::parse();

    let db = Arc::new(MarketDb::open(&config.db_path).context("opening database")?);
    let meetings = Arc::new(HttpMeetingProvider::new(&config.meeting_api_url));
    let events = EventBus::new(config.event_capacity);

    let service = Arc::new(ExchangeService::new(db, meetings, events));
    let scheduler = SettlementScheduler::new(
        Arc::clone(&service),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let report = scheduler
        .run_once(Utc::now())
        .await
        .context("settlement sweep")?;

    info!(
        scanned = report.scanned,
        settled = report.settled,
        skipped = report.skipped_errors,
        "Sweep complete"
    );

    Ok(())
}
