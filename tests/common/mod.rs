//! Shared fixtures for the integration suites

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skillmesh::meeting::{MeetingInfo, MeetingProvider, MeetingState};
use skillmesh::{EventBus, ExchangeService, MarketDb, MarketError};

/// In-process meeting provider with a settable status
pub struct FakeMeetingProvider {
    counter: AtomicU64,
    status: Mutex<MeetingState>,
}

impl FakeMeetingProvider {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            status: Mutex::new(MeetingState::Waiting),
        }
    }

    pub fn set_status(&self, state: MeetingState) {
        *self.status.lock().unwrap() = state;
    }

    pub fn meetings_created(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeetingProvider for FakeMeetingProvider {
    async fn create_meeting(
        &self,
        _topic: &str,
        _duration_minutes: u32,
    ) -> Result<MeetingInfo, MarketError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(MeetingInfo {
            meeting_id: format!("meet-{}", n),
            join_url: format!("https://meet.test/{}", n),
        })
    }

    async fn meeting_status(&self, _meeting_id: &str) -> Result<MeetingState, MarketError> {
        Ok(*self.status.lock().unwrap())
    }
}

/// Meeting provider that is always down
pub struct FailingMeetingProvider;

#[async_trait]
impl MeetingProvider for FailingMeetingProvider {
    async fn create_meeting(
        &self,
        _topic: &str,
        _duration_minutes: u32,
    ) -> Result<MeetingInfo, MarketError> {
        Err(MarketError::MeetingProvider("provider is down".into()))
    }

    async fn meeting_status(&self, _meeting_id: &str) -> Result<MeetingState, MarketError> {
        Err(MarketError::MeetingProvider("provider is down".into()))
    }
}

/// In-memory service wired to the given meeting provider. The database
/// handle comes back too so assertions can inspect rows directly.
pub fn harness(provider: Arc<dyn MeetingProvider>) -> (Arc<MarketDb>, Arc<ExchangeService>) {
    let db = Arc::new(MarketDb::open_in_memory().unwrap());
    let service = Arc::new(ExchangeService::new(
        Arc::clone(&db),
        provider,
        EventBus::new(64),
    ));
    (db, service)
}

/// Provision an account and optionally fund it
pub fn member(service: &ExchangeService, name: &str, tokens: i64) -> String {
    let account = service.provision_account(name).unwrap();
    if tokens > 0 {
        service.top_up(&account.id, tokens).unwrap();
    }
    account.id
}
