//! Skillmesh - booking lifecycle and token-ledger engine
//!
//! The exchange engine behind a peer-to-peer skill marketplace: members
//! spend tokens to book sessions with each other, token custody follows
//! the booking state machine, and a background sweep settles sessions
//! that nobody closed by hand.
//!
//! ## Architecture
//!
//! - **SQLite ledger**: every token movement is an append-only ledger
//!   row; balances are sums over it, never stored authority
//! - **Booking state machine**: pending, accepted, scheduled, then one
//!   terminal state, with refunds on the cancel/reject paths
//! - **Settlement sweep**: a periodic worker that releases provider
//!   payouts for finished or overdue sessions, at most once per booking
//! - **Event bus**: state changes publish domain events on a broadcast
//!   channel after their transaction commits
//!
//! ## Token flow
//!
//! ```text
//! requester ──spend──▶ escrow (booking row) ──release──▶ provider
//!                          │                              (minus 30%
//!                          └──refund──▶ requester          commission)
//! ```

pub mod booking;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ledger;
pub mod meeting;
pub mod progression;
pub mod service;
pub mod settlement;
pub mod swap;
pub mod trust;

// Re-export the main types
pub use config::Config;
pub use db::MarketDb;
pub use error::MarketError;
pub use events::{DomainEvent, EventBus};
pub use meeting::{HttpMeetingProvider, MeetingProvider};
pub use service::ExchangeService;
pub use settlement::{SettlementScheduler, SweepReport};
