//! Experience points, levels and milestone rewards
//!
//! XP only ever goes up. Levels derive from fixed thresholds; crossing
//! one emits a notification, and every fifth level additionally grants a
//! flat 50-token bonus through the ledger. The bonus applies once per
//! XP award, not retroactively per level skipped.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::db::{accounts, notifications};
use crate::error::MarketError;
use crate::events::DomainEvent;
use crate::ledger::{self, EntryKind};

/// XP required to reach each level, index 0 = level 1
const LEVEL_THRESHOLDS: [i64; 10] = [0, 100, 250, 500, 1000, 2000, 3500, 5500, 8500, 12500];

/// Maximum reachable level
pub const MAX_LEVEL: i32 = 10;

/// Tokens granted at every fifth level
const MILESTONE_BONUS: i64 = 50;

/// Level for a given XP total
pub fn level_for_xp(xp: i64) -> i32 {
    let mut level = 1;
    for (idx, threshold) in LEVEL_THRESHOLDS.iter().enumerate() {
        if xp >= *threshold {
            level = idx as i32 + 1;
        }
    }
    level
}

/// XP needed to reach the given level (level 1 = 0)
pub fn xp_for_level(level: i32) -> i64 {
    if level < 1 || level > MAX_LEVEL {
        return 0;
    }
    LEVEL_THRESHOLDS[(level - 1) as usize]
}

/// Award XP to an account and apply any level-up side effects.
///
/// Runs inside the caller's transaction. Returns the events produced;
/// empty when no level boundary was crossed.
pub fn add_experience(
    conn: &Connection,
    account_id: &str,
    xp_amount: i64,
    now: DateTime<Utc>,
) -> Result<Vec<DomainEvent>, MarketError> {
    if xp_amount <= 0 {
        return Err(MarketError::Validation(format!(
            "XP award must be positive, got {}",
            xp_amount
        )));
    }

    let account = accounts::require_account(conn, account_id)?;
    let old_level = account.level;
    let new_xp = account.experience_points + xp_amount;
    let new_level = level_for_xp(new_xp);

    accounts::set_experience(conn, account_id, new_xp, new_level, now)?;

    let mut events = Vec::new();

    if new_level > old_level {
        info!(
            account_id = %account_id,
            old_level,
            new_level,
            "Account leveled up"
        );

        events.push(notifications::notify(
            conn,
            account_id,
            &format!("Level Up! You're now Level {}!", new_level),
            &format!("Congratulations! You've reached Level {}.", new_level),
            Some("/dashboard"),
            now,
        )?);
        events.push(DomainEvent::LevelUp {
            account_id: account_id.to_string(),
            old_level,
            new_level,
        });

        // Milestone reward every 5th level
        if new_level % 5 == 0 {
            let (_, balance_event) = ledger::append(
                conn,
                account_id,
                MILESTONE_BONUS,
                EntryKind::Earned,
                &format!("Level {} milestone reward", new_level),
                now,
            )?;
            events.push(balance_event);
            events.push(notifications::notify(
                conn,
                account_id,
                "Milestone Reward!",
                &format!(
                    "You've received {} tokens for reaching Level {}!",
                    MILESTONE_BONUS, new_level
                ),
                Some("/dashboard"),
                now,
            )?);
        }
    }

    Ok(events)
}
