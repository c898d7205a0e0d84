//! Activity events and unlock records
//!
//! Activity events are the input achievement criteria are evaluated against.

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::db::LoyaltyDb;
use crate::error::LoyaltyResult;

/// A member activity that may count toward achievements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub member_id: String,
    pub event_type: String,
    pub value: i64,
    pub dedup_key: String,
    pub occurred_at: i64,
}

/// Per-member unlock record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementUnlock {
    pub member_id: String,
    pub achievement_id: String,
    pub earned_at: i64,
    pub transaction_id: String,
}

/// Aggregates over a member's events of one type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    pub count: u64,
    pub max_value: i64,
    pub total_value: i64,
}

/// Reads and writes `activity_events` and `member_achievements`
#[derive(Clone)]
pub struct AchievementRecords {
    db: LoyaltyDb,
}

impl AchievementRecords {
    pub fn new(db: LoyaltyDb) -> Self {
        Self { db }
    }

    /// Record an event. Returns `false` if its dedup key was already seen.
    pub fn record_event(&self, event: &ActivityEvent) -> LoyaltyResult<bool> {
        let conn = self.db.conn();
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO activity_events
               (member_id, event_type, value, dedup_key, occurred_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                event.member_id,
                event.event_type,
                event.value,
                event.dedup_key,
                event.occurred_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Aggregate a member's events of `event_type` at or after `since`
    pub fn event_stats(
        &self,
        member_id: &str,
        event_type: &str,
        since: Option<i64>,
    ) -> LoyaltyResult<EventStats> {
        let conn = self.db.conn();
        let stats = conn.query_row(
            r#"SELECT COUNT(*), COALESCE(MAX(value), 0), COALESCE(SUM(value), 0)
               FROM activity_events
               WHERE member_id = ?1 AND event_type = ?2 AND occurred_at >= ?3"#,
            params![member_id, event_type, since.unwrap_or(i64::MIN)],
            |r| {
                Ok(EventStats {
                    count: r.get::<_, i64>(0)?.max(0) as u64,
                    max_value: r.get(1)?,
                    total_value: r.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub fn unlocked_ids(&self, member_id: &str) -> LoyaltyResult<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT achievement_id FROM member_achievements WHERE member_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![member_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Unlock records, earliest first
    pub fn unlocked(&self, member_id: &str) -> LoyaltyResult<Vec<AchievementUnlock>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            r#"SELECT member_id, achievement_id, earned_at, transaction_id
               FROM member_achievements WHERE member_id = ?1
               ORDER BY earned_at, achievement_id"#,
        )?;
        let rows = stmt
            .query_map(params![member_id], Self::row_to_unlock)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn unlock(
        &self,
        member_id: &str,
        achievement_id: &str,
    ) -> LoyaltyResult<Option<AchievementUnlock>> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                r#"SELECT member_id, achievement_id, earned_at, transaction_id
                   FROM member_achievements WHERE member_id = ?1 AND achievement_id = ?2"#,
                params![member_id, achievement_id],
                Self::row_to_unlock,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert an unlock record unless one exists; returns the stored record
    pub fn insert_unlock(&self, unlock: &AchievementUnlock) -> LoyaltyResult<AchievementUnlock> {
        {
            let conn = self.db.conn();
            conn.execute(
                r#"INSERT OR IGNORE INTO member_achievements
                   (member_id, achievement_id, earned_at, transaction_id)
                   VALUES (?1, ?2, ?3, ?4)"#,
                params![
                    unlock.member_id,
                    unlock.achievement_id,
                    unlock.earned_at,
                    unlock.transaction_id,
                ],
            )?;
        }
        Ok(self
            .unlock(&unlock.member_id, &unlock.achievement_id)?
            .unwrap_or_else(|| unlock.clone()))
    }

    fn row_to_unlock(row: &rusqlite::Row<'_>) -> rusqlite::Result<AchievementUnlock> {
        Ok(AchievementUnlock {
            member_id: row.get(0)?,
            achievement_id: row.get(1)?,
            earned_at: row.get(2)?,
            transaction_id: row.get(3)?,
        })
    }
}
