//! Report accumulation and access-suspension escalation
//!
//! Each new report recounts the reported account's total and compares it
//! against a fixed escalation table by exact match. A count that skips a
//! tier (two reports landing in one race window) never triggers that
//! tier; this mirrors the upstream product behavior and is covered by
//! tests rather than papered over.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::db::{accounts, bookings, notifications, to_ts};
use crate::error::MarketError;
use crate::events::DomainEvent;

/// Report-count thresholds mapped to block durations in days
const ESCALATION_TABLE: [(i64, i64); 5] = [(3, 1), (5, 3), (7, 7), (10, 15), (13, 30)];

/// Block duration for an exact report count, if any
fn block_days_for_count(count: i64) -> Option<i64> {
    ESCALATION_TABLE
        .iter()
        .find(|(threshold, _)| *threshold == count)
        .map(|(_, days)| *days)
}

/// Number of reports filed against an account
pub fn report_count(conn: &Connection, account_id: &str) -> Result<i64, MarketError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM reports WHERE reported_id = ?1",
        params![account_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// File a report and run the escalation check.
///
/// When the report is tied to a booking, only that booking's requester
/// may file it, and it lands against the provider.
pub fn file_report(
    conn: &Connection,
    reporter_id: &str,
    reported_id: &str,
    booking_id: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Vec<DomainEvent>, MarketError> {
    if reason.trim().is_empty() {
        return Err(MarketError::Validation("report reason is required".into()));
    }
    if reporter_id == reported_id {
        return Err(MarketError::Validation(
            "cannot report your own account".into(),
        ));
    }

    if let Some(booking_id) = booking_id {
        let booking = bookings::require_booking(conn, booking_id)?;
        if booking.requester_id != reporter_id {
            return Err(MarketError::Unauthorized(
                "only the booking's requester can report this session".into(),
            ));
        }
        if booking.provider_id != reported_id {
            return Err(MarketError::Validation(
                "reported account does not match the booking's provider".into(),
            ));
        }
    }

    accounts::require_account(conn, reported_id)?;

    conn.execute(
        "INSERT INTO reports (reporter_id, reported_id, booking_id, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![reporter_id, reported_id, booking_id, reason, to_ts(now)],
    )?;

    apply_thresholds(conn, reported_id, now)
}

/// Compare the current count against the escalation table and suspend
/// the account on an exact match. The block runs from the triggering
/// report's timestamp.
fn apply_thresholds(
    conn: &Connection,
    reported_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<DomainEvent>, MarketError> {
    let count = report_count(conn, reported_id)?;

    let Some(days) = block_days_for_count(count) else {
        return Ok(Vec::new());
    };

    let blocked_until = now + Duration::days(days);
    accounts::block_account(conn, reported_id, blocked_until, now)?;

    warn!(
        account_id = %reported_id,
        report_count = count,
        block_days = days,
        "Report threshold reached, account suspended"
    );

    let message = format!(
        "Due to receiving multiple reports ({}), your account has been blocked for {} day(s).",
        count, days
    );

    let mut events = vec![notifications::notify(
        conn,
        reported_id,
        "Account Temporarily Blocked",
        &message,
        Some("/login"),
        now,
    )?];
    events.push(DomainEvent::ForceLogout {
        account_id: reported_id.to_string(),
        message,
    });

    Ok(events)
}
