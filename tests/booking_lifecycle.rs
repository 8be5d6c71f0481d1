//! End-to-end booking lifecycle
//!
//! Drives real bookings through the service facade against an in-memory
//! database and a fake meeting provider, and checks that token custody
//! follows the state machine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, member, FailingMeetingProvider, FakeMeetingProvider};
use skillmesh::db::bookings::{self, BookingStatus};
use skillmesh::{MarketError, SettlementScheduler};

// ============================================================
// Happy path
// ============================================================

#[tokio::test]
async fn booked_session_settles_after_full_lifecycle() {
    let meetings = Arc::new(FakeMeetingProvider::new());
    let (_db, service) = harness(meetings.clone());

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Guitar Basics", 40).unwrap();

    // Create: tokens move into escrow immediately
    let booking = service.create_booking(&requester, &offering.id).unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(service.balance(&requester).unwrap(), 60);
    assert_eq!(service.balance(&provider).unwrap(), 0);

    service.accept_booking(&booking.id, &provider).unwrap();

    let when = Utc::now() + ChronoDuration::hours(1);
    let scheduled = service
        .schedule_booking(&booking.id, &provider, when)
        .await
        .unwrap();
    assert_eq!(scheduled.status, BookingStatus::Scheduled);
    assert!(scheduled.meeting_link.is_some());
    assert_eq!(meetings.meetings_created(), 1);

    // Both parties join
    let link = service.start_meeting(&booking.id, &requester).await.unwrap();
    assert!(link.is_some());
    service.start_meeting(&booking.id, &provider).await.unwrap();

    let joined = service.booking(&booking.id).unwrap();
    assert!(joined.requester_joined);
    assert!(joined.provider_joined);
    assert!(joined.actual_start_time.is_some());

    // 45 minutes later the sweep settles without touching the provider API
    let scheduler = SettlementScheduler::new(Arc::clone(&service), Duration::from_secs(60));
    let report = scheduler
        .run_once(Utc::now() + ChronoDuration::minutes(45))
        .await
        .unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.skipped_errors, 0);

    // 40 spent: 28 to the provider, 12 commission withheld
    assert_eq!(service.balance(&provider).unwrap(), 28);
    assert_eq!(service.balance(&requester).unwrap(), 60);

    let done = service.booking(&booking.id).unwrap();
    assert_eq!(done.status, BookingStatus::Completed);
    assert!(done.tokens_released);
    assert!(done.review_pending);

    // A second sweep finds nothing to do
    let report = scheduler
        .run_once(Utc::now() + ChronoDuration::minutes(90))
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(service.balance(&provider).unwrap(), 28);
}

// ============================================================
// Settlement is at-most-once
// ============================================================

#[tokio::test]
async fn manual_complete_then_sweep_pays_exactly_once() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();

    let booking = service.create_booking(&requester, &offering.id).unwrap();
    service.accept_booking(&booking.id, &provider).unwrap();
    service
        .schedule_booking(&booking.id, &provider, Utc::now())
        .await
        .unwrap();

    assert!(service.complete_booking(&booking.id, &provider).unwrap());
    assert_eq!(service.balance(&provider).unwrap(), 28);

    // Every later completion path is a silent no-op
    assert!(!service.complete_booking(&booking.id, &provider).unwrap());
    assert!(!service.force_complete(&booking.id, "sweep").unwrap());
    assert_eq!(service.balance(&provider).unwrap(), 28);

    let offering = service.offering(&offering.id).unwrap();
    assert_eq!(offering.times_taught, 1);
}

// ============================================================
// Guards
// ============================================================

#[test]
fn duplicate_open_booking_is_rejected() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();

    let first = service.create_booking(&requester, &offering.id).unwrap();
    assert!(matches!(
        service.create_booking(&requester, &offering.id),
        Err(MarketError::DuplicateBooking)
    ));
    assert_eq!(service.balance(&requester).unwrap(), 60);

    // Once the open booking closes, a new one is allowed
    service.cancel_booking(&first.id, &requester).unwrap();
    assert_eq!(service.balance(&requester).unwrap(), 100);
    service.create_booking(&requester, &offering.id).unwrap();
    assert_eq!(service.balance(&requester).unwrap(), 60);
}

#[test]
fn underfunded_booking_leaves_no_trace() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let requester = member(&service, "rika", 30);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();

    match service.create_booking(&requester, &offering.id) {
        Err(MarketError::InsufficientTokens {
            needed, available, ..
        }) => {
            assert_eq!(needed, 40);
            assert_eq!(available, 30);
        }
        other => panic!("expected InsufficientTokens, got {:?}", other),
    }

    assert!(service.bookings_for(&requester).unwrap().is_empty());
    assert_eq!(service.balance(&requester).unwrap(), 30);
}

#[test]
fn self_booking_is_rejected() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let provider = member(&service, "tomas", 100);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();

    assert!(matches!(
        service.create_booking(&provider, &offering.id),
        Err(MarketError::SelfBookingNotAllowed)
    ));
}

#[test]
fn transitions_check_the_acting_party() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();

    assert!(matches!(
        service.accept_booking(&booking.id, &requester),
        Err(MarketError::Unauthorized(_))
    ));
    assert!(matches!(
        service.cancel_booking(&booking.id, &provider),
        Err(MarketError::Unauthorized(_))
    ));
    assert!(matches!(
        service.reject_booking(&booking.id, &requester),
        Err(MarketError::Unauthorized(_))
    ));

    // Terminal states admit nothing further
    service.reject_booking(&booking.id, &provider).unwrap();
    assert!(matches!(
        service.accept_booking(&booking.id, &provider),
        Err(MarketError::InvalidTransition { .. })
    ));
}

// ============================================================
// Meeting provider degradation
// ============================================================

#[tokio::test]
async fn scheduling_survives_meeting_outage() {
    let (_db, service) = harness(Arc::new(FailingMeetingProvider));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();
    service.accept_booking(&booking.id, &provider).unwrap();

    // The transition lands even though the provider is down
    let scheduled = service
        .schedule_booking(&booking.id, &provider, Utc::now() + ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(scheduled.status, BookingStatus::Scheduled);
    assert!(scheduled.meeting_link.is_none());

    // Joining still works; the link just stays empty
    let link = service.start_meeting(&booking.id, &requester).await.unwrap();
    assert!(link.is_none());
    assert!(service.booking(&booking.id).unwrap().requester_joined);
}

#[tokio::test]
async fn sweep_skips_bookings_whose_status_lookup_fails() {
    let (db, service) = harness(Arc::new(FailingMeetingProvider));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();
    service.accept_booking(&booking.id, &provider).unwrap();
    service
        .schedule_booking(&booking.id, &provider, Utc::now())
        .await
        .unwrap();

    // Pretend a meeting was attached before the provider went dark
    db.with_conn(|conn| bookings::set_meeting(conn, &booking.id, "m-1", "https://x", Utc::now()))
        .unwrap();

    let scheduler = SettlementScheduler::new(Arc::clone(&service), Duration::from_secs(60));
    let report = scheduler.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.settled, 0);
    assert_eq!(report.skipped_errors, 1);

    // Tokens stay in escrow until a later sweep succeeds
    assert_eq!(service.balance(&provider).unwrap(), 0);
    assert!(!service.booking(&booking.id).unwrap().tokens_released);
}

#[tokio::test]
async fn overdue_booking_without_meeting_settles_after_an_hour() {
    let (_db, service) = harness(Arc::new(FailingMeetingProvider));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();
    service.accept_booking(&booking.id, &provider).unwrap();

    let proposed = Utc::now();
    service
        .schedule_booking(&booking.id, &provider, proposed)
        .await
        .unwrap();

    let scheduler = SettlementScheduler::new(Arc::clone(&service), Duration::from_secs(60));

    // 30 minutes in: still within the grace window
    let report = scheduler
        .run_once(proposed + ChronoDuration::minutes(30))
        .await
        .unwrap();
    assert_eq!(report.settled, 0);

    // An hour past the proposed time the no-video fallback fires
    let report = scheduler
        .run_once(proposed + ChronoDuration::minutes(61))
        .await
        .unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(service.balance(&provider).unwrap(), 28);
}

#[tokio::test]
async fn finished_meeting_settles_regardless_of_clock() {
    let meetings = Arc::new(FakeMeetingProvider::new());
    let (_db, service) = harness(meetings.clone());

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();
    service.accept_booking(&booking.id, &provider).unwrap();
    service
        .schedule_booking(&booking.id, &provider, Utc::now() + ChronoDuration::hours(6))
        .await
        .unwrap();

    meetings.set_status(skillmesh::meeting::MeetingState::Finished);

    let scheduler = SettlementScheduler::new(Arc::clone(&service), Duration::from_secs(60));
    let report = scheduler.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(service.balance(&provider).unwrap(), 28);
}

// ============================================================
// Reviews
// ============================================================

#[tokio::test]
async fn review_settles_and_awards_experience() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();
    service.accept_booking(&booking.id, &provider).unwrap();
    service
        .schedule_booking(&booking.id, &provider, Utc::now())
        .await
        .unwrap();

    // Review before any explicit completion: implicit settlement
    service
        .submit_review(&booking.id, &requester, 5, "great session")
        .unwrap();

    assert_eq!(service.balance(&provider).unwrap(), 28);
    let provider_account = service.account(&provider).unwrap();
    assert_eq!(provider_account.experience_points, 50);
    assert!((provider_account.rating - 5.0).abs() < f64::EPSILON);

    let reviewed = service.booking(&booking.id).unwrap();
    assert_eq!(reviewed.status, BookingStatus::Completed);
    assert!(!reviewed.review_pending);

    let offering = service.offering(&offering.id).unwrap();
    assert!((offering.average_rating - 5.0).abs() < f64::EPSILON);

    // Duplicate submission: no second payout, XP re-applied
    service
        .submit_review(&booking.id, &requester, 5, "again")
        .unwrap();
    assert_eq!(service.balance(&provider).unwrap(), 28);
    assert_eq!(service.account(&provider).unwrap().experience_points, 100);
}

#[test]
fn review_rating_bounds_and_author_are_enforced() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let requester = member(&service, "rika", 100);
    let provider = member(&service, "tomas", 0);
    let offering = service.add_offering(&provider, "Chess", 40).unwrap();
    let booking = service.create_booking(&requester, &offering.id).unwrap();

    assert!(matches!(
        service.submit_review(&booking.id, &requester, 0, ""),
        Err(MarketError::Validation(_))
    ));
    assert!(matches!(
        service.submit_review(&booking.id, &requester, 6, ""),
        Err(MarketError::Validation(_))
    ));
    assert!(matches!(
        service.submit_review(&booking.id, &provider, 4, ""),
        Err(MarketError::Unauthorized(_))
    ));
}
