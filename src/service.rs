//! Marketplace service facade
//!
//! `ExchangeService` owns the database handle, the meeting provider and
//! the event bus. Every operation runs its state changes inside one
//! rusqlite transaction and publishes the resulting domain events only
//! after the commit, so subscribers never see rolled-back state.
//!
//! Meeting-provider calls happen outside the database lock: scheduling
//! commits first and attaches the meeting afterwards, so a flaky external
//! dependency degrades a booking (empty link, retried on start) instead
//! of blocking the transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

use crate::db::accounts::{self, Account};
use crate::db::bookings::{self, Booking};
use crate::db::notifications::{self, Notification};
use crate::db::offerings::{self, Offering};
use crate::db::{DbStats, MarketDb};
use crate::error::MarketError;
use crate::events::{DomainEvent, EventBus};
use crate::ledger::{self, EntryKind, LedgerEntry};
use crate::meeting::{MeetingInfo, MeetingProvider};
use crate::swap::{self, SwapRequest};
use crate::{booking, trust};

pub struct ExchangeService {
    db: Arc<MarketDb>,
    meetings: Arc<dyn MeetingProvider>,
    events: EventBus,
}

impl ExchangeService {
    pub fn new(db: Arc<MarketDb>, meetings: Arc<dyn MeetingProvider>, events: EventBus) -> Self {
        Self {
            db,
            meetings,
            events,
        }
    }

    /// Subscribe to the domain event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    pub(crate) fn db(&self) -> &MarketDb {
        &self.db
    }

    pub(crate) fn meetings(&self) -> &dyn MeetingProvider {
        self.meetings.as_ref()
    }

    /// Run one transactional unit of work and publish its events after
    /// the commit
    fn transact<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection, DateTime<Utc>) -> Result<(T, Vec<DomainEvent>), MarketError>,
    ) -> Result<T, MarketError> {
        let now = Utc::now();
        let (value, events) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let out = f(&tx, now)?;
            tx.commit()?;
            Ok(out)
        })?;

        self.events.publish_all(events);
        Ok(value)
    }

    // ---------------- accounts & funding ----------------

    /// Explicit provisioning step, invoked once when the identity service
    /// registers a user
    pub fn provision_account(&self, display_name: &str) -> Result<Account, MarketError> {
        self.transact(|conn, now| {
            let account = accounts::insert_account(conn, display_name, now)?;
            Ok((account, Vec::new()))
        })
    }

    pub fn account(&self, account_id: &str) -> Result<Account, MarketError> {
        self.db
            .with_conn(|conn| accounts::require_account(conn, account_id))
    }

    /// Opaque token top-up (real-money purchase handled elsewhere)
    pub fn top_up(&self, account_id: &str, amount: i64) -> Result<i64, MarketError> {
        self.transact(|conn, now| {
            accounts::require_account(conn, account_id)?;
            let (_, event) = ledger::append(
                conn,
                account_id,
                amount,
                EntryKind::Purchased,
                "Purchased tokens",
                now,
            )?;
            let balance = ledger::balance(conn, account_id)?;
            Ok((balance, vec![event]))
        })
    }

    /// Authoritative balance, recomputed from the ledger
    pub fn balance(&self, account_id: &str) -> Result<i64, MarketError> {
        self.db
            .with_conn(|conn| ledger::balance(conn, account_id))
    }

    pub fn ledger_history(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, MarketError> {
        self.db
            .with_conn(|conn| ledger::history(conn, account_id, limit))
    }

    // ---------------- offerings ----------------

    pub fn add_offering(
        &self,
        provider_id: &str,
        skill_name: &str,
        token_cost: i64,
    ) -> Result<Offering, MarketError> {
        self.transact(|conn, now| {
            accounts::require_account(conn, provider_id)?;
            let offering =
                offerings::insert_offering(conn, provider_id, skill_name, token_cost, now)?;
            Ok((offering, Vec::new()))
        })
    }

    pub fn offerings_for(&self, provider_id: &str) -> Result<Vec<Offering>, MarketError> {
        self.db
            .with_conn(|conn| offerings::list_by_provider(conn, provider_id))
    }

    pub fn offering(&self, offering_id: &str) -> Result<Offering, MarketError> {
        self.db
            .with_conn(|conn| offerings::require_offering(conn, offering_id))
    }

    // ---------------- booking lifecycle ----------------

    pub fn create_booking(
        &self,
        requester_id: &str,
        offering_id: &str,
    ) -> Result<Booking, MarketError> {
        self.transact(|conn, now| booking::create(conn, requester_id, offering_id, now))
    }

    pub fn accept_booking(&self, booking_id: &str, actor_id: &str) -> Result<Booking, MarketError> {
        self.transact(|conn, now| booking::accept(conn, booking_id, actor_id, now))
    }

    pub fn reject_booking(&self, booking_id: &str, actor_id: &str) -> Result<Booking, MarketError> {
        self.transact(|conn, now| {
            booking::close_with_refund(
                conn,
                booking_id,
                actor_id,
                bookings::BookingStatus::Rejected,
                now,
            )
        })
    }

    pub fn cancel_booking(&self, booking_id: &str, actor_id: &str) -> Result<Booking, MarketError> {
        self.transact(|conn, now| {
            booking::close_with_refund(
                conn,
                booking_id,
                actor_id,
                bookings::BookingStatus::Cancelled,
                now,
            )
        })
    }

    /// Provider proposes a time and the booking moves to scheduled. The
    /// meeting is provisioned afterwards, best-effort.
    pub async fn schedule_booking(
        &self,
        booking_id: &str,
        actor_id: &str,
        proposed_time: DateTime<Utc>,
    ) -> Result<Booking, MarketError> {
        let scheduled = self.transact(|conn, now| {
            booking::schedule(conn, booking_id, actor_id, proposed_time, now)
        })?;

        match self.provision_meeting(&scheduled).await {
            Ok(info) => {
                let booking_id = scheduled.id.clone();
                self.transact(move |conn, now| {
                    booking::attach_meeting(conn, &booking_id, &info, now)?;
                    Ok(((), Vec::new()))
                })?;
            }
            Err(e) => {
                // Availability over consistency: the transition stands,
                // the link stays empty until a start call retries
                warn!(booking_id = %scheduled.id, error = %e, "Meeting provisioning failed during scheduling");
            }
        }

        self.booking(&scheduled.id)
    }

    /// Either party joins the session. Provisions the meeting if it is
    /// still missing and returns the join link.
    pub async fn start_meeting(
        &self,
        booking_id: &str,
        actor_id: &str,
    ) -> Result<Option<String>, MarketError> {
        let current = self.booking(booking_id)?;
        if !current.is_party(actor_id) {
            return Err(MarketError::Unauthorized(
                "only a booking party can join the meeting".into(),
            ));
        }

        let fresh = if current.meeting_id.is_none() {
            match self.provision_meeting(&current).await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(booking_id = %booking_id, error = %e, "Meeting provisioning failed on start");
                    None
                }
            }
        } else {
            None
        };

        let updated = self.transact(|conn, now| {
            booking::record_start(conn, booking_id, actor_id, fresh.as_ref(), now)
        })?;

        Ok(updated.meeting_link)
    }

    async fn provision_meeting(&self, target: &Booking) -> Result<MeetingInfo, MarketError> {
        let offering = self.offering(&target.offering_id)?;
        let provider = self.account(&target.provider_id)?;
        let topic = format!("{} with {}", offering.skill_name, provider.display_name);
        self.meetings.create_meeting(&topic, 60).await
    }

    /// Provider explicitly completes a session. Returns whether tokens
    /// were released by this call (false = already settled, no-op).
    pub fn complete_booking(&self, booking_id: &str, actor_id: &str) -> Result<bool, MarketError> {
        self.transact(|conn, now| booking::complete(conn, booking_id, actor_id, now))
    }

    /// Settle regardless of actor; used by the settlement sweep
    pub fn force_complete(&self, booking_id: &str, reason: &str) -> Result<bool, MarketError> {
        self.transact(|conn, now| booking::settle(conn, booking_id, reason, now))
    }

    pub fn submit_review(
        &self,
        booking_id: &str,
        actor_id: &str,
        rating: i32,
        comment: &str,
    ) -> Result<(), MarketError> {
        self.transact(|conn, now| {
            let events = booking::submit_review(conn, booking_id, actor_id, rating, comment, now)?;
            Ok(((), events))
        })
    }

    pub fn file_report(
        &self,
        reporter_id: &str,
        reported_id: &str,
        booking_id: Option<&str>,
        reason: &str,
    ) -> Result<(), MarketError> {
        self.transact(|conn, now| {
            let events =
                trust::file_report(conn, reporter_id, reported_id, booking_id, reason, now)?;
            Ok(((), events))
        })
    }

    pub fn booking(&self, booking_id: &str) -> Result<Booking, MarketError> {
        self.db
            .with_conn(|conn| bookings::require_booking(conn, booking_id))
    }

    pub fn bookings_for(&self, account_id: &str) -> Result<Vec<Booking>, MarketError> {
        self.db
            .with_conn(|conn| bookings::list_for_account(conn, account_id))
    }

    // ---------------- swaps ----------------

    pub fn create_swap(
        &self,
        requester_id: &str,
        target_offering_id: &str,
        requester_offering_id: &str,
    ) -> Result<SwapRequest, MarketError> {
        self.transact(|conn, now| {
            swap::create(
                conn,
                requester_id,
                target_offering_id,
                requester_offering_id,
                now,
            )
        })
    }

    /// Accept a swap: two deductions and two bookings, atomically
    pub fn accept_swap(
        &self,
        swap_id: &str,
        actor_id: &str,
    ) -> Result<(Booking, Booking), MarketError> {
        self.transact(|conn, now| {
            let (a, b, events) = swap::accept(conn, swap_id, actor_id, now)?;
            Ok(((a, b), events))
        })
    }

    pub fn reject_swap(&self, swap_id: &str, actor_id: &str) -> Result<SwapRequest, MarketError> {
        self.transact(|conn, now| swap::reject(conn, swap_id, actor_id, now))
    }

    pub fn swap(&self, swap_id: &str) -> Result<Option<SwapRequest>, MarketError> {
        self.db.with_conn(|conn| swap::get_swap(conn, swap_id))
    }

    // ---------------- notifications ----------------

    pub fn notifications(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<Notification>, MarketError> {
        self.db
            .with_conn(|conn| notifications::list_for_account(conn, account_id, limit))
    }

    pub fn unread_count(&self, account_id: &str) -> Result<i64, MarketError> {
        self.db
            .with_conn(|conn| notifications::unread_count(conn, account_id))
    }

    pub fn mark_notifications_read(&self, account_id: &str) -> Result<(), MarketError> {
        self.db
            .with_conn(|conn| notifications::mark_all_read(conn, account_id))
    }

    pub fn stats(&self) -> Result<DbStats, MarketError> {
        self.db.stats()
    }
}
