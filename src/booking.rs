//! Booking state machine
//!
//! Transitions run inside one rusqlite transaction owned by the service
//! layer: the ledger movement, the booking row change and the persistent
//! notifications commit together or not at all. Each transition returns
//! the domain events it produced; the service publishes them only after
//! the commit.
//!
//! Settlement is guarded by the `tokens_released` flag, flipped with a
//! compare-and-set UPDATE. Whoever loses that race (manual complete, a
//! review submission, the settlement sweep) sees a no-op, never a second
//! payout.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::db::bookings::{self, Booking, BookingStatus};
use crate::db::{accounts, notifications, offerings};
use crate::error::MarketError;
use crate::events::DomainEvent;
use crate::ledger::{self, EntryKind};
use crate::meeting::MeetingInfo;
use crate::progression;

/// Platform cut of a settled booking, rounded down
pub const COMMISSION_PERCENT: i64 = 30;

/// Minutes of session time after which a fully joined meeting settles
pub const SESSION_LENGTH_MINUTES: i64 = 45;

/// Commission withheld from a payout
pub fn commission(tokens_spent: i64) -> i64 {
    tokens_spent * COMMISSION_PERCENT / 100
}

/// Provider share after commission
pub fn provider_share(tokens_spent: i64) -> i64 {
    tokens_spent - commission(tokens_spent)
}

/// Links a client can act on in the booking's new status
fn action_urls(booking: &Booking, status: BookingStatus) -> BTreeMap<String, String> {
    let mut urls = BTreeMap::new();
    match status {
        BookingStatus::Accepted => {
            urls.insert(
                "schedule_url".to_string(),
                format!("/bookings/{}/schedule", booking.id),
            );
            urls.insert("chat_url".to_string(), format!("/bookings/{}", booking.id));
        }
        BookingStatus::Scheduled => {
            urls.insert(
                "start_meeting_url".to_string(),
                format!("/bookings/{}/start", booking.id),
            );
            urls.insert("chat_url".to_string(), format!("/bookings/{}", booking.id));
            if booking.meeting_link.is_some() {
                urls.insert(
                    "join_meeting_url".to_string(),
                    format!("/bookings/{}/start", booking.id),
                );
            }
        }
        _ => {}
    }
    urls
}

/// Notify both parties of a status change and emit the gateway event
fn transition_events(
    conn: &Connection,
    booking: &Booking,
    skill_name: &str,
    status: BookingStatus,
    now: DateTime<Utc>,
) -> Result<Vec<DomainEvent>, MarketError> {
    let mut events = Vec::new();
    let body = format!("Booking for {} is now {}.", skill_name, status);

    for party in [&booking.requester_id, &booking.provider_id] {
        events.push(notifications::notify(
            conn,
            party,
            "Booking Update",
            &body,
            Some("/bookings"),
            now,
        )?);
    }

    events.push(DomainEvent::BookingStatusChanged {
        booking_id: booking.id.clone(),
        new_status: status.to_string(),
        action_urls: action_urls(booking, status),
    });

    Ok(events)
}

/// Create a booking request, deducting the skill's cost in the same unit
/// of work. Any failure after the deduction rolls the whole thing back.
pub fn create(
    conn: &Connection,
    requester_id: &str,
    offering_id: &str,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<DomainEvent>), MarketError> {
    let offering = offerings::require_offering(conn, offering_id)?;
    let provider_id = offering.provider_id.clone();

    if requester_id == provider_id {
        return Err(MarketError::SelfBookingNotAllowed);
    }
    accounts::require_account(conn, requester_id)?;

    if bookings::open_booking_exists(conn, requester_id, &provider_id, offering_id)? {
        return Err(MarketError::DuplicateBooking);
    }

    let mut events = Vec::new();

    let (_, balance_event) = ledger::spend(
        conn,
        requester_id,
        offering.token_cost,
        &format!("Booking for {}", offering.skill_name),
        now,
    )?;
    events.push(balance_event);

    let booking = bookings::insert_booking(
        conn,
        requester_id,
        &provider_id,
        offering_id,
        offering.token_cost,
        now,
    )?;

    events.push(notifications::notify(
        conn,
        &provider_id,
        "New Booking Request",
        &format!("You have a new request for {}.", offering.skill_name),
        Some("/bookings"),
        now,
    )?);
    events.push(DomainEvent::BookingCreated {
        booking_id: booking.id.clone(),
        requester_id: requester_id.to_string(),
        provider_id,
        skill_name: offering.skill_name,
    });

    info!(booking_id = %booking.id, tokens = booking.tokens_spent, "Booking created");

    Ok((booking, events))
}

/// Provider accepts a pending request
pub fn accept(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<DomainEvent>), MarketError> {
    let booking = bookings::require_booking(conn, booking_id)?;
    if booking.provider_id != actor_id {
        return Err(MarketError::Unauthorized(
            "only the provider can accept a booking".into(),
        ));
    }
    if booking.status != BookingStatus::Pending {
        return Err(MarketError::InvalidTransition {
            from: booking.status.to_string(),
            action: "accept".into(),
        });
    }

    bookings::set_status(conn, booking_id, BookingStatus::Accepted, now)?;
    let offering = offerings::require_offering(conn, &booking.offering_id)?;
    let events = transition_events(
        conn,
        &booking,
        &offering.skill_name,
        BookingStatus::Accepted,
        now,
    )?;

    let booking = bookings::require_booking(conn, booking_id)?;
    Ok((booking, events))
}

/// Provider rejects, or the requester cancels. Both are terminal and
/// refund the full amount to the requester, exactly once.
pub fn close_with_refund(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    terminal: BookingStatus,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<DomainEvent>), MarketError> {
    let booking = bookings::require_booking(conn, booking_id)?;

    match terminal {
        BookingStatus::Rejected if booking.provider_id != actor_id => {
            return Err(MarketError::Unauthorized(
                "only the provider can reject a booking".into(),
            ));
        }
        BookingStatus::Cancelled if booking.requester_id != actor_id => {
            return Err(MarketError::Unauthorized(
                "only the requester can cancel a booking".into(),
            ));
        }
        BookingStatus::Rejected | BookingStatus::Cancelled => {}
        other => {
            return Err(MarketError::Internal(format!(
                "close_with_refund called with non-terminal status {}",
                other
            )));
        }
    }

    if booking.status.is_terminal() {
        return Err(MarketError::InvalidTransition {
            from: booking.status.to_string(),
            action: terminal.to_string(),
        });
    }

    bookings::set_status(conn, booking_id, terminal, now)?;
    let offering = offerings::require_offering(conn, &booking.offering_id)?;

    let mut events = Vec::new();
    let (_, balance_event) = ledger::append(
        conn,
        &booking.requester_id,
        booking.tokens_spent,
        EntryKind::Refund,
        &format!("Refund for {} booking {}", terminal, offering.skill_name),
        now,
    )?;
    events.push(balance_event);
    events.extend(transition_events(
        conn,
        &booking,
        &offering.skill_name,
        terminal,
        now,
    )?);

    info!(booking_id = %booking_id, status = %terminal, refund = booking.tokens_spent, "Booking closed with refund");

    let booking = bookings::require_booking(conn, booking_id)?;
    Ok((booking, events))
}

/// Provider proposes a time. The meeting itself is provisioned by the
/// service outside the database lock and attached afterwards; a provider
/// outage therefore never blocks this transition.
pub fn schedule(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    proposed_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<DomainEvent>), MarketError> {
    let booking = bookings::require_booking(conn, booking_id)?;
    if booking.provider_id != actor_id {
        return Err(MarketError::Unauthorized(
            "only the provider can schedule a booking".into(),
        ));
    }
    if booking.status != BookingStatus::Accepted {
        return Err(MarketError::InvalidTransition {
            from: booking.status.to_string(),
            action: "schedule".into(),
        });
    }

    bookings::insert_history(conn, booking_id, actor_id, proposed_time, now)?;
    bookings::set_proposed_time(conn, booking_id, proposed_time, now)?;
    bookings::set_status(conn, booking_id, BookingStatus::Scheduled, now)?;

    let offering = offerings::require_offering(conn, &booking.offering_id)?;
    let booking = bookings::require_booking(conn, booking_id)?;
    let events = transition_events(
        conn,
        &booking,
        &offering.skill_name,
        BookingStatus::Scheduled,
        now,
    )?;

    Ok((booking, events))
}

/// Attach an externally provisioned meeting to a booking
pub fn attach_meeting(
    conn: &Connection,
    booking_id: &str,
    info: &MeetingInfo,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    bookings::set_meeting(conn, booking_id, &info.meeting_id, &info.join_url, now)?;
    Ok(())
}

/// Record a party joining the session. Sets the start marker at most
/// once; repeated calls only re-surface the join link.
pub fn record_start(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    fresh_meeting: Option<&MeetingInfo>,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<DomainEvent>), MarketError> {
    let booking = bookings::require_booking(conn, booking_id)?;
    if !booking.is_party(actor_id) {
        return Err(MarketError::Unauthorized(
            "only a booking party can join the meeting".into(),
        ));
    }
    if booking.status != BookingStatus::Scheduled {
        return Err(MarketError::InvalidTransition {
            from: booking.status.to_string(),
            action: "start".into(),
        });
    }

    if let Some(info) = fresh_meeting {
        if booking.meeting_id.is_none() {
            attach_meeting(conn, booking_id, info, now)?;
        }
    }

    bookings::mark_joined(conn, booking_id, booking.requester_id == actor_id, now)?;
    bookings::mark_meeting_started(conn, booking_id, now)?;

    debug!(booking_id = %booking_id, actor_id = %actor_id, "Party joined meeting");

    let booking = bookings::require_booking(conn, booking_id)?;
    Ok((booking, Vec::new()))
}

/// Settle a booking: pay the provider their share, flip the release
/// guard, count the teach, and mark the booking completed.
///
/// Returns `(false, [])` when the tokens were already released; callers
/// treat that as a silent no-op.
pub fn settle(
    conn: &Connection,
    booking_id: &str,
    description: &str,
    now: DateTime<Utc>,
) -> Result<(bool, Vec<DomainEvent>), MarketError> {
    let booking = bookings::require_booking(conn, booking_id)?;

    // Compare-and-set on the release guard; a concurrent settler loses here
    if !bookings::mark_tokens_released(conn, booking_id, now)? {
        debug!(booking_id = %booking_id, "Settlement skipped, tokens already released");
        return Ok((false, Vec::new()));
    }

    let offering = offerings::require_offering(conn, &booking.offering_id)?;
    let payout = provider_share(booking.tokens_spent);

    let mut events = Vec::new();
    if payout > 0 {
        let (_, balance_event) = ledger::append(
            conn,
            &booking.provider_id,
            payout,
            EntryKind::Earned,
            &format!("Payment for booking {} ({})", offering.skill_name, description),
            now,
        )?;
        events.push(balance_event);
    }

    if bookings::claim_times_taught_increment(conn, booking_id)? {
        offerings::increment_times_taught(conn, &booking.offering_id)?;
    }

    events.extend(transition_events(
        conn,
        &booking,
        &offering.skill_name,
        BookingStatus::Completed,
        now,
    )?);

    info!(
        booking_id = %booking_id,
        provider_id = %booking.provider_id,
        payout,
        commission = commission(booking.tokens_spent),
        "Booking settled"
    );

    Ok((true, events))
}

/// Provider explicitly completes a scheduled session
pub fn complete(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<(bool, Vec<DomainEvent>), MarketError> {
    let booking = bookings::require_booking(conn, booking_id)?;
    if booking.provider_id != actor_id {
        return Err(MarketError::Unauthorized(
            "only the provider can complete a booking".into(),
        ));
    }

    // Already settled (e.g. by the sweep or a review): absorb quietly
    if booking.tokens_released {
        return Ok((false, Vec::new()));
    }

    if booking.status != BookingStatus::Scheduled {
        return Err(MarketError::InvalidTransition {
            from: booking.status.to_string(),
            action: "complete".into(),
        });
    }

    settle(conn, booking_id, "completed by provider", now)
}

/// Requester reviews a completed session.
///
/// The review row is unique per booking; a duplicate submission tolerates
/// the conflict but still re-applies the XP award defensively. A review
/// against a not-yet-settled booking settles it first.
pub fn submit_review(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    rating: i32,
    comment: &str,
    now: DateTime<Utc>,
) -> Result<Vec<DomainEvent>, MarketError> {
    if !(1..=5).contains(&rating) {
        return Err(MarketError::Validation(format!(
            "rating must be between 1 and 5, got {}",
            rating
        )));
    }

    let booking = bookings::require_booking(conn, booking_id)?;
    if booking.requester_id != actor_id {
        return Err(MarketError::Unauthorized(
            "only the requester can review a booking".into(),
        ));
    }

    let mut events = Vec::new();

    let inserted = conn.execute(
        "INSERT INTO reviews (booking_id, rating, comment, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (booking_id) DO NOTHING",
        params![booking_id, rating, comment, crate::db::to_ts(now)],
    )?;
    if inserted == 0 {
        debug!(booking_id = %booking_id, "Duplicate review tolerated, re-applying XP only");
    }

    bookings::clear_review_pending(conn, booking_id, now)?;

    // A review is also an implicit completion signal
    if !booking.tokens_released {
        let (_, settle_events) = settle(conn, booking_id, "review submitted", now)?;
        events.extend(settle_events);
    }

    // XP for the provider; applied once per submission, including the
    // duplicate path, to recover from a previously failed award
    events.extend(progression::add_experience(
        conn,
        &booking.provider_id,
        (rating as i64) * 10,
        now,
    )?);

    recompute_ratings(conn, &booking, now)?;

    Ok(events)
}

/// Recompute the per-skill and overall provider mean ratings from all
/// stored reviews
fn recompute_ratings(
    conn: &Connection,
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<(), MarketError> {
    let skill_avg: f64 = conn.query_row(
        "SELECT COALESCE(AVG(r.rating), 0.0)
         FROM reviews r JOIN bookings b ON r.booking_id = b.id
         WHERE b.provider_id = ?1 AND b.offering_id = ?2",
        params![booking.provider_id, booking.offering_id],
        |row| row.get(0),
    )?;
    offerings::set_average_rating(conn, &booking.offering_id, skill_avg)?;

    let overall_avg: f64 = conn.query_row(
        "SELECT COALESCE(AVG(r.rating), 0.0)
         FROM reviews r JOIN bookings b ON r.booking_id = b.id
         WHERE b.provider_id = ?1",
        params![booking.provider_id],
        |row| row.get(0),
    )?;
    accounts::set_rating(conn, &booking.provider_id, overall_avg, now)?;

    Ok(())
}
