//! Account row operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{parse_ts, to_ts};
use crate::error::MarketError;

/// Account row: identity-adjacent marketplace state
///
/// `token_balance` is a cached projection of the ledger, rewritten inside
/// every transaction that appends a ledger entry. Read it for display;
/// trust only the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub token_balance: i64,
    pub experience_points: i64,
    pub level: i32,
    pub rating: f64,
    pub blocked_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let blocked: Option<String> = row.get("blocked_until")?;
        let created: String = row.get("created_at")?;
        let updated: String = row.get("updated_at")?;

        Ok(Self {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            token_balance: row.get("token_balance")?,
            experience_points: row.get("experience_points")?,
            level: row.get("level")?,
            rating: row.get("rating")?,
            blocked_until: blocked.as_deref().and_then(|b| parse_ts(b).ok()),
            is_active: row.get::<_, i64>("is_active")? != 0,
            created_at: parse_ts(&created).unwrap_or_else(|_| Utc::now()),
            updated_at: parse_ts(&updated).unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Create a new account with zero balance and level 1
pub fn insert_account(
    conn: &Connection,
    display_name: &str,
    now: DateTime<Utc>,
) -> Result<Account, MarketError> {
    let id = Uuid::new_v4().to_string();
    let ts = to_ts(now);

    conn.execute(
        "INSERT INTO accounts (id, display_name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![id, display_name, ts],
    )?;

    get_account(conn, &id)?.ok_or_else(|| MarketError::Internal("Account vanished after insert".into()))
}

/// Fetch an account by id
pub fn get_account(conn: &Connection, id: &str) -> Result<Option<Account>, MarketError> {
    let account = conn
        .query_row("SELECT * FROM accounts WHERE id = ?1", params![id], |row| {
            Account::from_row(row)
        })
        .optional()?;

    Ok(account)
}

/// Fetch an account or fail with NotFound
pub fn require_account(conn: &Connection, id: &str) -> Result<Account, MarketError> {
    get_account(conn, id)?.ok_or_else(|| MarketError::NotFound(format!("account {}", id)))
}

/// Rewrite the cached balance column
pub fn set_cached_balance(
    conn: &Connection,
    id: &str,
    balance: i64,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE accounts SET token_balance = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, balance, to_ts(now)],
    )?;
    Ok(())
}

/// Persist an XP/level change
pub fn set_experience(
    conn: &Connection,
    id: &str,
    experience_points: i64,
    level: i32,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE accounts SET experience_points = ?2, level = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, experience_points, level, to_ts(now)],
    )?;
    Ok(())
}

/// Persist a recomputed mean rating
pub fn set_rating(
    conn: &Connection,
    id: &str,
    rating: f64,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE accounts SET rating = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, rating, to_ts(now)],
    )?;
    Ok(())
}

/// Block the account until the given time and deactivate it for login
pub fn block_account(
    conn: &Connection,
    id: &str,
    blocked_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE accounts SET blocked_until = ?2, is_active = 0, updated_at = ?3 WHERE id = ?1",
        params![id, to_ts(blocked_until), to_ts(now)],
    )?;
    Ok(())
}
