//! Swap orchestrator
//!
//! A swap is a mutually agreed pair of bookings: each party teaches the
//! skill the other wants, each paying the other's listed cost. Acceptance
//! is a single transaction spanning both deductions and both booking
//! inserts; if either party is short, nothing at all is committed.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::bookings::Booking;
use crate::db::{accounts, bookings, notifications, offerings, to_ts};
use crate::error::MarketError;
use crate::events::DomainEvent;
use crate::ledger;

/// Swap request states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Pending,
    Accepted,
    Rejected,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "pending",
            SwapStatus::Accepted => "accepted",
            SwapStatus::Rejected => "rejected",
        }
    }

    fn parse(raw: &str) -> Result<Self, MarketError> {
        match raw {
            "pending" => Ok(SwapStatus::Pending),
            "accepted" => Ok(SwapStatus::Accepted),
            "rejected" => Ok(SwapStatus::Rejected),
            other => Err(MarketError::Internal(format!(
                "Unknown swap status '{}'",
                other
            ))),
        }
    }
}

/// A proposed exchange of teaching sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: String,
    pub requester_id: String,
    pub target_id: String,
    /// Offering the requester wants, taught by the target
    pub target_offering_id: String,
    /// Offering the requester puts up in return
    pub requester_offering_id: String,
    pub status: SwapStatus,
}

impl SwapRequest {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            requester_id: row.get("requester_id")?,
            target_id: row.get("target_id")?,
            target_offering_id: row.get("target_offering_id")?,
            requester_offering_id: row.get("requester_offering_id")?,
            status: SwapStatus::parse(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        })
    }
}

/// Fetch a swap request by id
pub fn get_swap(conn: &Connection, id: &str) -> Result<Option<SwapRequest>, MarketError> {
    let swap = conn
        .query_row(
            "SELECT * FROM swap_requests WHERE id = ?1",
            params![id],
            |row| SwapRequest::from_row(row),
        )
        .optional()?;

    Ok(swap)
}

fn require_swap(conn: &Connection, id: &str) -> Result<SwapRequest, MarketError> {
    get_swap(conn, id)?.ok_or_else(|| MarketError::NotFound(format!("swap {}", id)))
}

/// Propose a swap: requester offers one of their skills for one of the
/// target's skills. No tokens move until acceptance.
pub fn create(
    conn: &Connection,
    requester_id: &str,
    target_offering_id: &str,
    requester_offering_id: &str,
    now: DateTime<Utc>,
) -> Result<(SwapRequest, Vec<DomainEvent>), MarketError> {
    let target_offering = offerings::require_offering(conn, target_offering_id)?;
    let requester_offering = offerings::require_offering(conn, requester_offering_id)?;

    if requester_offering.provider_id != requester_id {
        return Err(MarketError::Unauthorized(
            "requester must own the offered skill".into(),
        ));
    }
    if target_offering.provider_id == requester_id {
        return Err(MarketError::SelfBookingNotAllowed);
    }
    accounts::require_account(conn, requester_id)?;

    let id = Uuid::new_v4().to_string();
    let target_id = target_offering.provider_id.clone();

    conn.execute(
        "INSERT INTO swap_requests
             (id, requester_id, target_id, target_offering_id, requester_offering_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            requester_id,
            target_id,
            target_offering_id,
            requester_offering_id,
            to_ts(now)
        ],
    )?;

    let mut events = vec![notifications::notify(
        conn,
        &target_id,
        "New Swap Request",
        &format!(
            "Someone wants to swap {} for your {}.",
            requester_offering.skill_name, target_offering.skill_name
        ),
        Some("/swaps"),
        now,
    )?];
    events.push(DomainEvent::SwapCreated {
        swap_id: id.clone(),
        requester_id: requester_id.to_string(),
        target_id,
    });

    let swap = require_swap(conn, &id)?;
    Ok((swap, events))
}

/// Accept a swap: both deductions and both bookings in one unit of work.
///
/// Runs inside the caller's transaction; an `InsufficientTokens` from
/// either side propagates out and rolls back everything, including the
/// first party's deduction.
pub fn accept(
    conn: &Connection,
    swap_id: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<(Booking, Booking, Vec<DomainEvent>), MarketError> {
    let swap = require_swap(conn, swap_id)?;
    if swap.target_id != actor_id {
        return Err(MarketError::Unauthorized(
            "only the swap target can accept".into(),
        ));
    }
    if swap.status != SwapStatus::Pending {
        return Err(MarketError::InvalidTransition {
            from: swap.status.as_str().to_string(),
            action: "accept".into(),
        });
    }

    let target_offering = offerings::require_offering(conn, &swap.target_offering_id)?;
    let requester_offering = offerings::require_offering(conn, &swap.requester_offering_id)?;

    let mut events = Vec::new();

    // Requester pays for the target's lesson
    let (_, event) = ledger::spend(
        conn,
        &swap.requester_id,
        target_offering.token_cost,
        &format!("Swap booking for {}", target_offering.skill_name),
        now,
    )?;
    events.push(event);

    // Target pays for the requester's lesson; shortfall here unwinds both
    let (_, event) = ledger::spend(
        conn,
        &swap.target_id,
        requester_offering.token_cost,
        &format!("Swap booking for {}", requester_offering.skill_name),
        now,
    )?;
    events.push(event);

    let booking_a = bookings::insert_booking(
        conn,
        &swap.requester_id,
        &swap.target_id,
        &swap.target_offering_id,
        target_offering.token_cost,
        now,
    )?;
    let booking_b = bookings::insert_booking(
        conn,
        &swap.target_id,
        &swap.requester_id,
        &swap.requester_offering_id,
        requester_offering.token_cost,
        now,
    )?;

    conn.execute(
        "UPDATE swap_requests SET status = 'accepted' WHERE id = ?1",
        params![swap_id],
    )?;

    for (booking, skill) in [
        (&booking_a, &target_offering.skill_name),
        (&booking_b, &requester_offering.skill_name),
    ] {
        events.push(notifications::notify(
            conn,
            &booking.provider_id,
            "New Booking Request",
            &format!("Swap accepted: you have a new request for {}.", skill),
            Some("/bookings"),
            now,
        )?);
        events.push(DomainEvent::BookingCreated {
            booking_id: booking.id.clone(),
            requester_id: booking.requester_id.clone(),
            provider_id: booking.provider_id.clone(),
            skill_name: skill.to_string(),
        });
    }

    info!(
        swap_id = %swap_id,
        booking_a = %booking_a.id,
        booking_b = %booking_b.id,
        "Swap accepted, paired bookings created"
    );

    Ok((booking_a, booking_b, events))
}

/// Decline a swap request
pub fn reject(
    conn: &Connection,
    swap_id: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<(SwapRequest, Vec<DomainEvent>), MarketError> {
    let swap = require_swap(conn, swap_id)?;
    if swap.target_id != actor_id {
        return Err(MarketError::Unauthorized(
            "only the swap target can reject".into(),
        ));
    }
    if swap.status != SwapStatus::Pending {
        return Err(MarketError::InvalidTransition {
            from: swap.status.as_str().to_string(),
            action: "reject".into(),
        });
    }

    conn.execute(
        "UPDATE swap_requests SET status = 'rejected' WHERE id = ?1",
        params![swap_id],
    )?;

    let events = vec![notifications::notify(
        conn,
        &swap.requester_id,
        "Swap Declined",
        "Your swap request was declined.",
        Some("/swaps"),
        now,
    )?];

    let swap = require_swap(conn, swap_id)?;
    Ok((swap, events))
}
