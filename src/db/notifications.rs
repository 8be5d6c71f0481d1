//! Persistent notification store
//!
//! Notifications are written inside the same transaction as the state
//! change that produced them, then surfaced to the realtime gateway as a
//! NotificationPosted event after commit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::db::{parse_ts, to_ts};
use crate::error::MarketError;
use crate::events::DomainEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub account_id: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let created: String = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            title: row.get("title")?,
            body: row.get("body")?,
            link: row.get("link")?,
            is_read: row.get::<_, i64>("is_read")? != 0,
            created_at: parse_ts(&created).unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Store a notification and return the matching gateway event
pub fn notify(
    conn: &Connection,
    account_id: &str,
    title: &str,
    body: &str,
    link: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DomainEvent, MarketError> {
    conn.execute(
        "INSERT INTO notifications (account_id, title, body, link, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![account_id, title, body, link, to_ts(now)],
    )?;

    Ok(DomainEvent::NotificationPosted {
        account_id: account_id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        link: link.map(|l| l.to_string()),
    })
}

/// Notifications for an account, newest first
pub fn list_for_account(
    conn: &Connection,
    account_id: &str,
    limit: u32,
) -> Result<Vec<Notification>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM notifications WHERE account_id = ?1
         ORDER BY created_at DESC LIMIT ?2",
    )?;

    let notifications = stmt
        .query_map(params![account_id, limit], |row| Notification::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(notifications)
}

/// Count of unread notifications
pub fn unread_count(conn: &Connection, account_id: &str) -> Result<i64, MarketError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE account_id = ?1 AND is_read = 0",
        params![account_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Mark everything read for an account
pub fn mark_all_read(conn: &Connection, account_id: &str) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE account_id = ?1",
        params![account_id],
    )?;
    Ok(())
}
