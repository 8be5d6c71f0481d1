//! Error types for skillmesh

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("You cannot book your own skill")]
    SelfBookingNotAllowed,

    #[error("Provider does not offer this skill: {0}")]
    SkillNotOffered(String),

    #[error("An open booking already exists for this skill")]
    DuplicateBooking,

    #[error("Insufficient tokens for account {account}: need {needed}, have {available}")]
    InsufficientTokens {
        account: String,
        needed: i64,
        available: i64,
    },

    #[error("Ledger amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid transition: cannot {action} a {from} booking")]
    InvalidTransition { from: String, action: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Meeting provider error: {0}")]
    MeetingProvider(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
