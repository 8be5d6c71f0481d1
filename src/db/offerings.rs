//! Skill offering row operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::to_ts;
use crate::error::MarketError;

/// A skill a provider teaches, with its listed token cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub id: String,
    pub provider_id: String,
    pub skill_name: String,
    pub token_cost: i64,
    pub times_taught: i64,
    pub average_rating: f64,
}

impl Offering {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            provider_id: row.get("provider_id")?,
            skill_name: row.get("skill_name")?,
            token_cost: row.get("token_cost")?,
            times_taught: row.get("times_taught")?,
            average_rating: row.get("average_rating")?,
        })
    }
}

/// Register a skill a provider teaches
pub fn insert_offering(
    conn: &Connection,
    provider_id: &str,
    skill_name: &str,
    token_cost: i64,
    now: DateTime<Utc>,
) -> Result<Offering, MarketError> {
    if token_cost < 0 {
        return Err(MarketError::Validation(format!(
            "token_cost must be non-negative, got {}",
            token_cost
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO offerings (id, provider_id, skill_name, token_cost, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, provider_id, skill_name, token_cost, to_ts(now)],
    )?;

    get_offering(conn, &id)?
        .ok_or_else(|| MarketError::Internal("Offering vanished after insert".into()))
}

/// Fetch an offering by id
pub fn get_offering(conn: &Connection, id: &str) -> Result<Option<Offering>, MarketError> {
    let offering = conn
        .query_row(
            "SELECT * FROM offerings WHERE id = ?1",
            params![id],
            |row| Offering::from_row(row),
        )
        .optional()?;

    Ok(offering)
}

/// Fetch an offering or fail with SkillNotOffered
pub fn require_offering(conn: &Connection, id: &str) -> Result<Offering, MarketError> {
    get_offering(conn, id)?.ok_or_else(|| MarketError::SkillNotOffered(id.to_string()))
}

/// List the skills a provider teaches
pub fn list_by_provider(
    conn: &Connection,
    provider_id: &str,
) -> Result<Vec<Offering>, MarketError> {
    let mut stmt =
        conn.prepare("SELECT * FROM offerings WHERE provider_id = ?1 ORDER BY skill_name")?;

    let offerings = stmt
        .query_map(params![provider_id], |row| Offering::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(offerings)
}

/// Bump the usage counter after a first-time completion
pub fn increment_times_taught(conn: &Connection, id: &str) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE offerings SET times_taught = times_taught + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Persist the recomputed per-skill mean review rating
pub fn set_average_rating(
    conn: &Connection,
    id: &str,
    average_rating: f64,
) -> Result<(), MarketError> {
    conn.execute(
        "UPDATE offerings SET average_rating = ?2 WHERE id = ?1",
        params![id, average_rating],
    )?;
    Ok(())
}
