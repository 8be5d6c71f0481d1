//! Configuration for skillmesh

use std::path::PathBuf;

use clap::Parser;

/// Runtime configuration, from CLI flags or environment
#[derive(Debug, Clone, Parser)]
#[command(name = "skillmesh", about = "Booking and token-ledger engine")]
pub struct Config {
    /// Path to the SQLite database file
    #[arg(long, env = "SKILLMESH_DB_PATH", default_value = "skillmesh.db")]
    pub db_path: PathBuf,

    /// Base URL of the external meeting provider API
    #[arg(
        long,
        env = "SKILLMESH_MEETING_API_URL",
        default_value = "http://localhost:9400"
    )]
    pub meeting_api_url: String,

    /// Settlement sweep interval in seconds
    #[arg(long, env = "SKILLMESH_SWEEP_INTERVAL_SECS", default_value_t = 120)]
    pub sweep_interval_secs: u64,

    /// Capacity of the domain event broadcast channel
    #[arg(long, env = "SKILLMESH_EVENT_CAPACITY", default_value_t = 256)]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("skillmesh.db"),
            meeting_api_url: "http://localhost:9400".to_string(),
            sweep_interval_secs: 120,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.sweep_interval_secs, 120);
        assert!(config.event_capacity > 0);
    }
}
