//! Domain events emitted by state-machine transitions
//!
//! Every operation that changes booking, ledger or account state returns
//! the list of events it produced. The service publishes them on a
//! broadcast channel after the enclosing transaction commits, so the
//! realtime gateway (a downstream subscriber) never observes state that
//! was rolled back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events consumed by the realtime gateway and other downstream listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    /// A new booking request was created
    BookingCreated {
        booking_id: String,
        requester_id: String,
        provider_id: String,
        skill_name: String,
    },

    /// A booking moved to a new status
    BookingStatusChanged {
        booking_id: String,
        new_status: String,
        /// Links the client can act on in the new status
        /// (schedule, chat, start/join meeting)
        action_urls: BTreeMap<String, String>,
    },

    /// An account's derived token balance changed
    TokenBalanceChanged { account_id: String, balance: i64 },

    /// A swap request was created and awaits the target's decision
    SwapCreated {
        swap_id: String,
        requester_id: String,
        target_id: String,
    },

    /// An account reached a new level
    LevelUp {
        account_id: String,
        old_level: i32,
        new_level: i32,
    },

    /// All of the account's sessions must be terminated
    ForceLogout { account_id: String, message: String },

    /// A persistent notification was stored for an account
    NotificationPosted {
        account_id: String,
        title: String,
        body: String,
        link: Option<String>,
    },
}

/// Broadcast bus handing events to connected gateway subscribers
///
/// Delivery is fire-and-forget: publishing with no subscribers is not an
/// error, and a slow subscriber lags rather than blocking the publisher.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish a batch of events produced by one committed transaction
    pub fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            debug!(?event, "Publishing domain event");
            // No receivers connected is fine
            let _ = self.tx.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
