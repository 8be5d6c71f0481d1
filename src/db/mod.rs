//! SQLite database module for the marketplace core
//!
//! One connection behind a mutex. The mutex serializes every
//! check-then-append sequence (balance reads followed by ledger writes),
//! which is the per-account serialization the ledger contract requires.
//! All multi-row mutations run inside a single rusqlite transaction:
//! either everything commits or the transaction drop rolls it all back.
//!
//! ## Tables
//!
//! - `accounts` - identity-adjacent state: cached balance, XP, level, blocks
//! - `offerings` - skills a provider teaches, with token cost
//! - `ledger` - append-only token movements (source of truth for balances)
//! - `bookings` / `booking_history` / `reviews` / `reports`
//! - `swap_requests` - mutually agreed skill exchanges
//! - `notifications` - persistent notification store

pub mod accounts;
pub mod bookings;
pub mod notifications;
pub mod offerings;
pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::MarketError;

/// SQLite database handle for all marketplace state
pub struct MarketDb {
    conn: Mutex<Connection>,
}

impl MarketDb {
    /// Open or create the database at the given path
    pub fn open(db_path: &Path) -> Result<Self, MarketError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // WAL for concurrent readers alongside the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, MarketError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), MarketError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read-only operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MarketError>
    where
        F: FnOnce(&Connection) -> Result<T, MarketError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MarketError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, MarketError>
    where
        F: FnOnce(&mut Connection) -> Result<T, MarketError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| MarketError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, MarketError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, MarketError> {
                let n: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |row| row.get(0),
                )?;
                Ok(n as u64)
            };

            Ok(DbStats {
                account_count: count("accounts")?,
                booking_count: count("bookings")?,
                ledger_entry_count: count("ledger")?,
                swap_count: count("swap_requests")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub account_count: u64,
    pub booking_count: u64,
    pub ledger_entry_count: u64,
    pub swap_count: u64,
}

/// Format a timestamp for storage
pub fn to_ts(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Parse a stored timestamp
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, MarketError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MarketError::Internal(format!("Bad timestamp '{}': {}", raw, e)))
}
