//! Report escalation and account suspension

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, member, FakeMeetingProvider};
use skillmesh::MarketError;

fn reporters(service: &skillmesh::ExchangeService, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| member(service, &format!("reporter-{}", i), 0))
        .collect()
}

#[test]
fn third_report_blocks_for_one_day() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let reported = member(&service, "mallory", 0);

    for reporter in reporters(&service, 3) {
        service
            .file_report(&reporter, &reported, None, "no-show")
            .unwrap();
    }

    let account = service.account(&reported).unwrap();
    assert!(!account.is_active);

    let blocked_until = account.blocked_until.unwrap();
    let hours = (blocked_until - Utc::now()).num_hours();
    assert!((23..=24).contains(&hours), "expected ~1 day, got {}h", hours);
}

#[test]
fn thirteenth_report_blocks_for_thirty_days() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let reported = member(&service, "mallory", 0);

    for reporter in reporters(&service, 13) {
        service
            .file_report(&reporter, &reported, None, "abusive behavior")
            .unwrap();
    }

    let account = service.account(&reported).unwrap();
    assert!(!account.is_active);

    let blocked_until = account.blocked_until.unwrap();
    assert!(blocked_until > Utc::now() + ChronoDuration::days(29));
    assert!(blocked_until <= Utc::now() + ChronoDuration::days(30));
}

#[test]
fn skipped_threshold_never_triggers() {
    let (db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let reported = member(&service, "mallory", 0);
    let reporter = member(&service, "victor", 0);

    // Three pre-existing rows, inserted out of band, put the next filed
    // report at count 4: past the 3-report tier without ever matching it
    db.with_conn(|conn| {
        for i in 0..3 {
            conn.execute(
                "INSERT INTO reports (reporter_id, reported_id, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    format!("ghost-{}", i),
                    reported,
                    "imported",
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    })
    .unwrap();

    service
        .file_report(&reporter, &reported, None, "late report")
        .unwrap();

    let account = service.account(&reported).unwrap();
    assert!(account.is_active);
    assert!(account.blocked_until.is_none());
}

#[test]
fn suspension_leaves_a_notification_behind() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let reported = member(&service, "mallory", 0);
    for reporter in reporters(&service, 3) {
        service
            .file_report(&reporter, &reported, None, "no-show")
            .unwrap();
    }

    assert_eq!(service.unread_count(&reported).unwrap(), 1);
    let posted = service.notifications(&reported, 10).unwrap();
    assert!(posted[0].title.contains("Blocked"));

    service.mark_notifications_read(&reported).unwrap();
    assert_eq!(service.unread_count(&reported).unwrap(), 0);
}

#[test]
fn report_validation_rules() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let rika = member(&service, "rika", 100);
    let tomas = member(&service, "tomas", 0);

    assert!(matches!(
        service.file_report(&rika, &rika, None, "self"),
        Err(MarketError::Validation(_))
    ));
    assert!(matches!(
        service.file_report(&rika, &tomas, None, "   "),
        Err(MarketError::Validation(_))
    ));
}

#[test]
fn booking_tied_report_must_come_from_its_requester() {
    let (_db, service) = harness(Arc::new(FakeMeetingProvider::new()));

    let rika = member(&service, "rika", 100);
    let tomas = member(&service, "tomas", 0);
    let outsider = member(&service, "oscar", 0);
    let offering = service.add_offering(&tomas, "Chess", 40).unwrap();
    let booking = service.create_booking(&rika, &offering.id).unwrap();

    assert!(matches!(
        service.file_report(&outsider, &tomas, Some(&booking.id), "bad"),
        Err(MarketError::Unauthorized(_))
    ));
    // Reported party must be the booking's provider
    assert!(matches!(
        service.file_report(&rika, &outsider, Some(&booking.id), "bad"),
        Err(MarketError::Validation(_))
    ));

    service
        .file_report(&rika, &tomas, Some(&booking.id), "provider never showed")
        .unwrap();
}
