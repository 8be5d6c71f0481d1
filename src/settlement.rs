//! Settlement scheduler
//!
//! A background sweep that guarantees scheduled sessions eventually
//! settle even when nobody clicks "complete". Policy, in priority order,
//! for each scheduled booking with unreleased tokens:
//!
//! 1. both parties joined and 45 minutes have passed since the actual
//!    start time;
//! 2. the meeting provider reports the meeting finished, or the proposed
//!    time is more than two hours gone;
//! 3. no external meeting exists and the proposed time is more than one
//!    hour gone (legacy/no-video fallback).
//!
//! Provider lookups that fail are logged and that booking is skipped
//! until the next run. The sweep holds no cursor state: every run
//! re-scans all eligible bookings, and the `tokens_released`
//! compare-and-set makes concurrent sweeps settle each booking at most
//! once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::db::bookings::{self, Booking};
use crate::error::MarketError;
use crate::meeting::MeetingState;
use crate::service::ExchangeService;

/// Minutes after the actual start at which a fully joined session settles
const SESSION_COMPLETE_AFTER_MIN: i64 = 45;

/// Hours after the proposed time at which any scheduled meeting settles
const OVERDUE_AFTER_HOURS: i64 = 2;

/// Hours after the proposed time at which a no-video booking settles
const LEGACY_OVERDUE_AFTER_HOURS: i64 = 1;

/// Outcome of one sweep
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub scanned: usize,
    pub settled: usize,
    pub skipped_errors: usize,
}

/// Why a booking was force-completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleCause {
    SessionElapsed,
    MeetingFinished,
    Overdue,
    LegacyOverdue,
}

impl SettleCause {
    fn description(&self) -> &'static str {
        match self {
            SettleCause::SessionElapsed => "auto-completed, session time elapsed",
            SettleCause::MeetingFinished => "auto-completed, meeting finished",
            SettleCause::Overdue => "auto-completed, overdue",
            SettleCause::LegacyOverdue => "auto-completed, overdue without meeting",
        }
    }
}

/// 45-minute both-joined rule; checked first, needs no provider call
fn session_elapsed(booking: &Booking, now: DateTime<Utc>) -> bool {
    booking.requester_joined
        && booking.provider_joined
        && booking
            .actual_start_time
            .map(|start| now >= start + ChronoDuration::minutes(SESSION_COMPLETE_AFTER_MIN))
            .unwrap_or(false)
}

fn past_proposed(booking: &Booking, hours: i64, now: DateTime<Utc>) -> bool {
    booking
        .proposed_time
        .map(|proposed| now >= proposed + ChronoDuration::hours(hours))
        .unwrap_or(false)
}

/// Periodic settlement worker
pub struct SettlementScheduler {
    service: Arc<ExchangeService>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl SettlementScheduler {
    pub fn new(service: Arc<ExchangeService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// One full scan over all eligible bookings at the given instant
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, MarketError> {
        let candidates = self
            .service
            .db()
            .with_conn(|conn| bookings::list_unsettled_scheduled(conn))?;

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            match self.decide(&candidate, now).await {
                Ok(Some(cause)) => {
                    // The release guard absorbs races with manual
                    // completion between scan and settle
                    if self
                        .service
                        .force_complete(&candidate.id, cause.description())?
                    {
                        report.settled += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(booking_id = %candidate.id, error = %e, "Skipping booking this sweep");
                    report.skipped_errors += 1;
                }
            }
        }

        if report.settled > 0 || report.skipped_errors > 0 {
            info!(
                scanned = report.scanned,
                settled = report.settled,
                skipped = report.skipped_errors,
                "Settlement sweep finished"
            );
        }

        Ok(report)
    }

    /// Apply the completion policy to one booking
    async fn decide(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<Option<SettleCause>, MarketError> {
        if session_elapsed(booking, now) {
            return Ok(Some(SettleCause::SessionElapsed));
        }

        if let Some(meeting_id) = &booking.meeting_id {
            // Provider failure propagates; the caller logs and skips
            let state = self.service.meetings().meeting_status(meeting_id).await?;
            if state == MeetingState::Finished {
                return Ok(Some(SettleCause::MeetingFinished));
            }
            if past_proposed(booking, OVERDUE_AFTER_HOURS, now) {
                return Ok(Some(SettleCause::Overdue));
            }
            return Ok(None);
        }

        if past_proposed(booking, LEGACY_OVERDUE_AFTER_HOURS, now) {
            return Ok(Some(SettleCause::LegacyOverdue));
        }

        Ok(None)
    }

    /// Start the periodic sweep loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Settlement scheduler already running");
                return;
            }
            *running = true;
        }

        info!("Starting settlement scheduler (interval: {:?})", self.interval);

        let scheduler = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.interval);

            loop {
                interval.tick().await;

                if !*scheduler.running.read().await {
                    info!("Settlement scheduler stopped");
                    break;
                }

                if let Err(e) = scheduler.run_once(Utc::now()).await {
                    error!("Settlement sweep failed: {}", e);
                }
            }
        });
    }

    /// Stop the sweep loop after the current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping settlement scheduler");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
