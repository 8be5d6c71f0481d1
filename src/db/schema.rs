//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::MarketError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), MarketError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, MarketError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), MarketError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), MarketError> {
    conn.execute_batch(ACCOUNTS_SCHEMA)?;
    conn.execute_batch(LEDGER_SCHEMA)?;
    conn.execute_batch(BOOKINGS_SCHEMA)?;
    conn.execute_batch(SWAPS_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

/// Migrate schema from an older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), MarketError> {
    match from_version {
        // Migration steps go here as the schema evolves
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Accounts, skill offerings and notifications
const ACCOUNTS_SCHEMA: &str = r#"
-- Accounts own tokens, XP and trust state.
-- token_balance is a cached view of the ledger, recomputed inside every
-- ledger-touching transaction. The ledger is the source of truth.
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    token_balance INTEGER NOT NULL DEFAULT 0,
    experience_points INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    rating REAL NOT NULL DEFAULT 0.0,
    blocked_until TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- A skill a provider teaches, with its listed token cost
CREATE TABLE IF NOT EXISTS offerings (
    id TEXT PRIMARY KEY NOT NULL,
    provider_id TEXT NOT NULL,
    skill_name TEXT NOT NULL,
    token_cost INTEGER NOT NULL,
    times_taught INTEGER NOT NULL DEFAULT 0,
    average_rating REAL NOT NULL DEFAULT 0.0,
    created_at TEXT NOT NULL,

    UNIQUE (provider_id, skill_name),
    FOREIGN KEY (provider_id) REFERENCES accounts(id)
);

-- Persistent notification store; pushed to the realtime gateway as events
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    link TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (account_id) REFERENCES accounts(id)
);
"#;

/// Append-only token ledger
const LEDGER_SCHEMA: &str = r#"
-- Immutable token movements. Rows are only ever inserted.
-- balance = purchased + earned + refund - spent
CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount > 0),
    kind TEXT NOT NULL CHECK (kind IN ('earned', 'spent', 'purchased', 'refund')),
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,

    FOREIGN KEY (account_id) REFERENCES accounts(id)
);
"#;

/// Bookings and their satellite records
const BOOKINGS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bookings (
    id TEXT PRIMARY KEY NOT NULL,
    requester_id TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    offering_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'scheduled', 'completed', 'cancelled', 'rejected')),

    tokens_spent INTEGER NOT NULL DEFAULT 0,
    -- Idempotency guard: flips false -> true exactly once, at settlement
    tokens_released INTEGER NOT NULL DEFAULT 0,
    review_pending INTEGER NOT NULL DEFAULT 0,
    times_taught_incremented INTEGER NOT NULL DEFAULT 0,

    proposed_time TEXT,
    meeting_id TEXT,
    meeting_link TEXT,
    meeting_started INTEGER NOT NULL DEFAULT 0,
    actual_start_time TEXT,
    requester_joined INTEGER NOT NULL DEFAULT 0,
    provider_joined INTEGER NOT NULL DEFAULT 0,

    requested_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (requester_id) REFERENCES accounts(id),
    FOREIGN KEY (provider_id) REFERENCES accounts(id),
    FOREIGN KEY (offering_id) REFERENCES offerings(id)
);

-- Audit trail of proposed meeting times
CREATE TABLE IF NOT EXISTS booking_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    booking_id TEXT NOT NULL,
    proposer_id TEXT NOT NULL,
    proposed_time TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (booking_id) REFERENCES bookings(id)
);

-- One review per booking; primary key enforces uniqueness
CREATE TABLE IF NOT EXISTS reviews (
    booking_id TEXT PRIMARY KEY NOT NULL,
    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,

    FOREIGN KEY (booking_id) REFERENCES bookings(id)
);

CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reporter_id TEXT NOT NULL,
    reported_id TEXT NOT NULL,
    booking_id TEXT,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (reporter_id) REFERENCES accounts(id),
    FOREIGN KEY (reported_id) REFERENCES accounts(id),
    FOREIGN KEY (booking_id) REFERENCES bookings(id)
);
"#;

/// Skill swap requests
const SWAPS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS swap_requests (
    id TEXT PRIMARY KEY NOT NULL,
    requester_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    -- The skill the requester wants (offered by the target)
    target_offering_id TEXT NOT NULL,
    -- The skill the requester offers in return
    requester_offering_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'rejected')),
    created_at TEXT NOT NULL,

    FOREIGN KEY (requester_id) REFERENCES accounts(id),
    FOREIGN KEY (target_id) REFERENCES accounts(id),
    FOREIGN KEY (target_offering_id) REFERENCES offerings(id),
    FOREIGN KEY (requester_offering_id) REFERENCES offerings(id)
);
"#;

/// Index definitions for hot queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_account ON ledger(account_id);
CREATE INDEX IF NOT EXISTS idx_ledger_account_kind ON ledger(account_id, kind);

CREATE INDEX IF NOT EXISTS idx_offerings_provider ON offerings(provider_id);

CREATE INDEX IF NOT EXISTS idx_bookings_requester ON bookings(requester_id);
CREATE INDEX IF NOT EXISTS idx_bookings_provider ON bookings(provider_id);
CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status);
CREATE INDEX IF NOT EXISTS idx_bookings_open_pair
    ON bookings(requester_id, provider_id, offering_id, status);

CREATE INDEX IF NOT EXISTS idx_history_booking ON booking_history(booking_id);
CREATE INDEX IF NOT EXISTS idx_reports_reported ON reports(reported_id);
CREATE INDEX IF NOT EXISTS idx_notifications_account ON notifications(account_id, is_read);
"#;
