//! Skillmesh daemon
//!
//! Opens the marketplace database, starts the settlement sweep and logs
//! the domain event stream until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! skillmesh
//!
//! # Custom database location and sweep cadence
//! skillmesh --db-path /data/skillmesh.db --sweep-interval-secs 60
//!
//! # Point at a different meeting provider
//! skillmesh --meeting-api-url https://meet.example.com
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use skillmesh::{
    Config, EventBus, ExchangeService, HttpMeetingProvider, MarketDb, SettlementScheduler,
};
use tracing::{info, warn};
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
    info!(db_path = %config.db_path.display(), "Starting skillmesh");

    let db = Arc::new(MarketDb::open(&config.db_path).context("opening database")?);
    let meetings = Arc::new(HttpMeetingProvider::new(&config.meeting_api_url));
    let events = EventBus::new(config.event_capacity);

    let service = Arc::new(ExchangeService::new(db, meetings, events));

    let scheduler = Arc::new(SettlementScheduler::new(
        Arc::clone(&service),
        Duration::from_secs(config.sweep_interval_secs),
    ));
    Arc::clone(&scheduler).start().await;

    // Keep a subscriber alive so the broadcast channel never drops
    // events on the floor silently
    let mut event_rx = service.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => info!(?event, "Domain event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down");
    scheduler.stop().await;

    Ok(())
}
