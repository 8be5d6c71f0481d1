//! Booking row operations and status values

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{parse_ts, to_ts};
use crate::error::MarketError;

/// Booking lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Scheduled,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MarketError> {
        match raw {
            "pending" => Ok(BookingStatus::Pending),
            "accepted" => Ok(BookingStatus::Accepted),
            "scheduled" => Ok(BookingStatus::Scheduled),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "rejected" => Ok(BookingStatus::Rejected),
            other => Err(MarketError::Internal(format!(
                "Unknown booking status '{}'",
                other
            ))),
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One teaching session between a requester and a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub requester_id: String,
    pub provider_id: String,
    pub offering_id: String,
    pub status: BookingStatus,
    pub tokens_spent: i64,
    pub tokens_released: bool,
    pub review_pending: bool,
    pub times_taught_incremented: bool,
    pub proposed_time: Option<DateTime<Utc>>,
    pub meeting_id: Option<String>,
    pub meeting_link: Option<String>,
    pub meeting_started: bool,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub requester_joined: bool,
    pub provider_joined: bool,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let proposed: Option<String> = row.get("proposed_time")?;
        let started_at: Option<String> = row.get("actual_start_time")?;
        let requested: String = row.get("requested_at")?;
        let updated: String = row.get("updated_at")?;

        Ok(Self {
            id: row.get("id")?,
            requester_id: row.get("requester_id")?,
            provider_id: row.get("provider_id")?,
            offering_id: row.get("offering_id")?,
            status: BookingStatus::parse(&status)
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            tokens_spent: row.get("tokens_spent")?,
            tokens_released: row.get::<_, i64>("tokens_released")? != 0,
            review_pending: row.get::<_, i64>("review_pending")? != 0,
            times_taught_incremented: row.get::<_, i64>("times_taught_incremented")? != 0,
            proposed_time: proposed.as_deref().and_then(|t| parse_ts(t).ok()),
            meeting_id: row.get("meeting_id")?,
            meeting_link: row.get("meeting_link")?,
            meeting_started: row.get::<_, i64>("meeting_started")? != 0,
            actual_start_time: started_at.as_deref().and_then(|t| parse_ts(t).ok()),
            requester_joined: row.get::<_, i64>("requester_joined")? != 0,
            provider_joined: row.get::<_, i64>("provider_joined")? != 0,
            requested_at: parse_ts(&requested).unwrap_or_else(|_| Utc::now()),
            updated_at: parse_ts(&updated).unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Either side of the session
    pub fn is_party(&self, account_id: &str) -> bool {
        self.requester_id == account_id || self.provider_id == account_id
    }
}

/// Insert a new pending booking with tokens already deducted
pub fn insert_booking(
    conn: &Connection,
    requester_id: &str,
    provider_id: &str,
    offering_id: &str,
    tokens_spent: i64,
    now: DateTime<Utc>,
) -> Result<Booking, MarketError> {
    let id = Uuid::new_v4().to_string();
    let ts = to_ts(now);

    conn.execute(
        "INSERT INTO bookings (id, requester_id, provider_id, offering_id, tokens_spent,
                               requested_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, requester_id, provider_id, offering_id, tokens_spent, ts],
    )?;

    get_booking(conn, &id)?
        .ok_or_else(|| MarketError::Internal("Booking vanished after insert".into()))
}

/// Fetch a booking by id
pub fn get_booking(conn: &Connection, id: &str) -> Result<Option<Booking>, MarketError> {
    let booking = conn
        .query_row("SELECT * FROM bookings WHERE id = ?1", params![id], |row| {
            Booking::from_row(row)
        })
        .optional()?;

    Ok(booking)
}

/// Fetch a booking or fail with NotFound
pub fn require_booking(conn: &Connection, id: &str) -> Result<Booking, MarketError> {
    get_booking(conn, id)?.ok_or_else(|| MarketError::NotFound(format!("booking {}", id)))
}

/// Any non-terminal booking already open for this requester/provider/skill?
pub fn open_booking_exists(
    conn: &Connection,
    requester_id: &str,
    provider_id: &str,
    offering_id: &str,
) -> Result<bool, MarketError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE requester_id = ?1 AND provider_id = ?2 AND offering_id = ?3
           AND status IN ('pending', 'accepted', 'scheduled')",
        params![requester_id, provider_id, offering_id],
        |row| row.get(0),
    )?;

    Ok(count > 0)
}

/// Scheduled bookings still awaiting settlement, for the sweep
pub fn list_unsettled_scheduled(conn: &Connection) -> Result<Vec<Booking>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM bookings
         WHERE status = 'scheduled' AND tokens_released = 0
         ORDER BY requested_at",
    )?;

    let bookings = stmt
        .query_map([], |row| Booking::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(bookings)
}

/// Bookings where the account is requester or provider, newest first
pub fn list_for_account(conn: &Connection, account_id: &str) -> Result<Vec<Booking>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM bookings
         WHERE requester_id = ?1 OR provider_id = ?1
         ORDER BY requested_at DESC",
    )?;

    let bookings = stmt
        .query_map(params![account_id], |row| Booking::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(bookings)
}

/// Update just the status column
pub fn set_status(
    conn: &Connection,
    id: &str,
    status: BookingStatus,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE bookings SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), to_ts(now)],
    )?;
    Ok(())
}

/// Record a proposed time during scheduling
pub fn set_proposed_time(
    conn: &Connection,
    id: &str,
    proposed_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE bookings SET proposed_time = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, to_ts(proposed_time), to_ts(now)],
    )?;
    Ok(())
}

/// Attach an externally provisioned meeting
pub fn set_meeting(
    conn: &Connection,
    id: &str,
    meeting_id: &str,
    meeting_link: &str,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE bookings SET meeting_id = ?2, meeting_link = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, meeting_id, meeting_link, to_ts(now)],
    )?;
    Ok(())
}

/// Mark the meeting as started, once
pub fn mark_meeting_started(
    conn: &Connection,
    id: &str,
    started_at: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE bookings
         SET meeting_started = 1, actual_start_time = ?2, updated_at = ?2
         WHERE id = ?1 AND meeting_started = 0",
        params![id, to_ts(started_at)],
    )?;
    Ok(())
}

/// Record that one party joined the session
pub fn mark_joined(
    conn: &Connection,
    id: &str,
    as_requester: bool,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    let column = if as_requester {
        "requester_joined"
    } else {
        "provider_joined"
    };
    conn.execute(
        &format!(
            "UPDATE bookings SET {} = 1, updated_at = ?2 WHERE id = ?1",
            column
        ),
        params![id, to_ts(now)],
    )?;
    Ok(())
}

/// Flip the settlement guard and its companion flags.
/// Returns false when another writer already released the tokens.
pub fn mark_tokens_released(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool, MarketError> {
    let changed = conn.execute(
        "UPDATE bookings
         SET tokens_released = 1, review_pending = 1, status = 'completed', updated_at = ?2
         WHERE id = ?1 AND tokens_released = 0",
        params![id, to_ts(now)],
    )?;

    Ok(changed == 1)
}

/// Mark the provider's usage counter as already incremented.
/// Returns false when a previous settlement already claimed it.
pub fn claim_times_taught_increment(conn: &Connection, id: &str) -> Result<bool, MarketError> {
    let changed = conn.execute(
        "UPDATE bookings SET times_taught_incremented = 1
         WHERE id = ?1 AND times_taught_incremented = 0",
        params![id],
    )?;

    Ok(changed == 1)
}

/// Clear the review flag once a review lands
pub fn clear_review_pending(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE bookings SET review_pending = 0, updated_at = ?2 WHERE id = ?1",
        params![id, to_ts(now)],
    )?;
    Ok(())
}

/// Append an immutable reschedule-audit row
pub fn insert_history(
    conn: &Connection,
    booking_id: &str,
    proposer_id: &str,
    proposed_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    conn.execute(
        "INSERT INTO booking_history (booking_id, proposer_id, proposed_time, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![booking_id, proposer_id, to_ts(proposed_time), to_ts(now)],
    )?;
    Ok(())
}

/// Proposed times recorded for a booking, oldest first
pub fn list_history(
    conn: &Connection,
    booking_id: &str,
) -> Result<Vec<(String, DateTime<Utc>)>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT proposer_id, proposed_time FROM booking_history
         WHERE booking_id = ?1 ORDER BY created_at",
    )?;

    let entries = stmt
        .query_map(params![booking_id], |row| {
            let proposer: String = row.get(0)?;
            let time: String = row.get(1)?;
            Ok((proposer, time))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    entries
        .into_iter()
        .map(|(proposer, time)| Ok((proposer, parse_ts(&time)?)))
        .collect()
}
