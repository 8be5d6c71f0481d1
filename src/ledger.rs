//! Append-only token ledger
//!
//! Every token movement is an immutable row; an account's balance is the
//! kind-grouped sum over its rows. The `accounts.token_balance` column is
//! a cached projection rewritten here inside the same transaction as the
//! append, so readers of the cache can never observe a value the ledger
//! does not back.
//!
//! Callers run `spend` inside the transaction that performs the dependent
//! state change (booking insert, swap acceptance), so the deduction and
//! the state change commit or roll back as one unit. The connection mutex
//! in [`crate::db::MarketDb`] serializes the balance re-read against
//! concurrent appends.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{accounts, parse_ts, to_ts};
use crate::error::MarketError;
use crate::events::DomainEvent;

/// Kinds of token movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Earned,
    Spent,
    Purchased,
    Refund,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Earned => "earned",
            EntryKind::Spent => "spent",
            EntryKind::Purchased => "purchased",
            EntryKind::Refund => "refund",
        }
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: String,
    pub amount: i64,
    pub kind: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let created: String = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            amount: row.get("amount")?,
            kind: row.get("kind")?,
            description: row.get("description")?,
            created_at: parse_ts(&created).unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Authoritative balance, recomputed from the ledger
pub fn balance(conn: &Connection, account_id: &str) -> Result<i64, MarketError> {
    let balance: i64 = conn.query_row(
        "SELECT COALESCE(SUM(CASE
             WHEN kind = 'spent' THEN -amount
             ELSE amount
         END), 0)
         FROM ledger WHERE account_id = ?1",
        params![account_id],
        |row| row.get(0),
    )?;

    Ok(balance)
}

/// Append a movement and refresh the cached balance in the same unit of work.
///
/// Returns the new entry id and the balance-changed event to publish after
/// the enclosing transaction commits.
pub fn append(
    conn: &Connection,
    account_id: &str,
    amount: i64,
    kind: EntryKind,
    description: &str,
    now: DateTime<Utc>,
) -> Result<(i64, DomainEvent), MarketError> {
    if amount <= 0 {
        return Err(MarketError::InvalidAmount(amount));
    }

    conn.execute(
        "INSERT INTO ledger (account_id, amount, kind, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![account_id, amount, kind.as_str(), description, to_ts(now)],
    )?;
    let entry_id = conn.last_insert_rowid();

    let new_balance = balance(conn, account_id)?;
    accounts::set_cached_balance(conn, account_id, new_balance, now)?;

    debug!(
        account_id = %account_id,
        amount,
        kind = kind.as_str(),
        balance = new_balance,
        "Appended ledger entry"
    );

    Ok((
        entry_id,
        DomainEvent::TokenBalanceChanged {
            account_id: account_id.to_string(),
            balance: new_balance,
        },
    ))
}

/// Spend tokens if the authoritative balance allows it.
///
/// The balance is re-read here, immediately before the append, so a stale
/// cached value can never over-draw an account.
pub fn spend(
    conn: &Connection,
    account_id: &str,
    amount: i64,
    description: &str,
    now: DateTime<Utc>,
) -> Result<(i64, DomainEvent), MarketError> {
    if amount <= 0 {
        return Err(MarketError::InvalidAmount(amount));
    }

    let available = balance(conn, account_id)?;
    if available < amount {
        return Err(MarketError::InsufficientTokens {
            account: account_id.to_string(),
            needed: amount,
            available,
        });
    }

    append(conn, account_id, amount, EntryKind::Spent, description, now)
}

/// Recent movements for an account, newest first
pub fn history(
    conn: &Connection,
    account_id: &str,
    limit: u32,
) -> Result<Vec<LedgerEntry>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM ledger WHERE account_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;

    let entries = stmt
        .query_map(params![account_id, limit], |row| LedgerEntry::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Kind-grouped totals, for audit views
pub fn totals_by_kind(
    conn: &Connection,
    account_id: &str,
) -> Result<Vec<(String, i64)>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT kind, COALESCE(SUM(amount), 0) FROM ledger
         WHERE account_id = ?1 GROUP BY kind",
    )?;

    let totals = stmt
        .query_map(params![account_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{accounts, MarketDb};

    fn account(conn: &Connection) -> String {
        accounts::insert_account(conn, "vik", Utc::now()).unwrap().id
    }

    #[test]
    fn balance_is_kind_grouped_sum() {
        let db = MarketDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = account(conn);
            append(conn, &id, 100, EntryKind::Purchased, "top-up", Utc::now())?;
            append(conn, &id, 30, EntryKind::Earned, "session", Utc::now())?;
            append(conn, &id, 25, EntryKind::Spent, "booking", Utc::now())?;
            append(conn, &id, 10, EntryKind::Refund, "cancelled", Utc::now())?;

            // purchased + earned + refund - spent
            assert_eq!(balance(conn, &id)?, 100 + 30 + 10 - 25);

            // Cached column tracks the derived value
            let cached = accounts::require_account(conn, &id)?.token_balance;
            assert_eq!(cached, 115);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let db = MarketDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = account(conn);
            assert!(matches!(
                append(conn, &id, 0, EntryKind::Earned, "", Utc::now()),
                Err(MarketError::InvalidAmount(0))
            ));
            assert!(matches!(
                spend(conn, &id, -5, "", Utc::now()),
                Err(MarketError::InvalidAmount(-5))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn spend_rereads_authoritative_balance() {
        let db = MarketDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = account(conn);
            append(conn, &id, 50, EntryKind::Purchased, "top-up", Utc::now())?;

            spend(conn, &id, 40, "first", Utc::now())?;
            let short = spend(conn, &id, 40, "second", Utc::now());
            match short {
                Err(MarketError::InsufficientTokens {
                    needed, available, ..
                }) => {
                    assert_eq!(needed, 40);
                    assert_eq!(available, 10);
                }
                other => panic!("expected InsufficientTokens, got {:?}", other),
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn history_is_newest_first() {
        let db = MarketDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = account(conn);
            append(conn, &id, 10, EntryKind::Purchased, "a", Utc::now())?;
            append(conn, &id, 20, EntryKind::Purchased, "b", Utc::now())?;

            let entries = history(conn, &id, 10)?;
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].description, "b");
            Ok(())
        })
        .unwrap();
    }
}
