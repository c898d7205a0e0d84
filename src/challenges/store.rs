//! Challenge participation storage

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::db::LoyaltyDb;
use crate::error::{LoyaltyError, LoyaltyResult};

/// A member's participation in one challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub challenge_id: String,
    pub member_id: String,
    pub joined_at: i64,
    pub progress: i64,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl Participation {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Storage seam for participation records
pub trait ChallengeStore: Send + Sync {
    /// Create a participation. Returns the stored record and whether it was
    /// created by this call.
    fn join(
        &self,
        challenge_id: &str,
        member_id: &str,
        now: i64,
    ) -> LoyaltyResult<(Participation, bool)>;

    fn participation(
        &self,
        challenge_id: &str,
        member_id: &str,
    ) -> LoyaltyResult<Option<Participation>>;

    /// Add `delta` to progress and return the updated record
    fn add_progress(
        &self,
        challenge_id: &str,
        member_id: &str,
        delta: i64,
        now: i64,
    ) -> LoyaltyResult<Participation>;

    /// Set `completed_at` unless already set
    fn mark_completed(&self, challenge_id: &str, member_id: &str, at: i64) -> LoyaltyResult<()>;

    /// Participants in leaderboard order: progress desc, earliest completion
    /// first (uncompleted last), then member id
    fn ranked(&self, challenge_id: &str) -> LoyaltyResult<Vec<Participation>>;

    fn any_completed(&self, challenge_id: &str) -> LoyaltyResult<bool>;
}

const PARTICIPATION_COLUMNS: &str =
    "challenge_id, member_id, joined_at, progress, completed_at, updated_at";

/// Participation stored in `challenge_participants`
#[derive(Clone)]
pub struct SqliteChallenges {
    db: LoyaltyDb,
}

impl SqliteChallenges {
    pub fn new(db: LoyaltyDb) -> Self {
        Self { db }
    }

    fn row_to_participation(row: &Row<'_>) -> rusqlite::Result<Participation> {
        Ok(Participation {
            challenge_id: row.get(0)?,
            member_id: row.get(1)?,
            joined_at: row.get(2)?,
            progress: row.get(3)?,
            completed_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl ChallengeStore for SqliteChallenges {
    fn join(
        &self,
        challenge_id: &str,
        member_id: &str,
        now: i64,
    ) -> LoyaltyResult<(Participation, bool)> {
        let inserted = {
            let conn = self.db.conn();
            conn.execute(
                r#"INSERT OR IGNORE INTO challenge_participants
                   (challenge_id, member_id, joined_at, progress, completed_at, updated_at)
                   VALUES (?1, ?2, ?3, 0, NULL, ?3)"#,
                params![challenge_id, member_id, now],
            )?
        };
        let participation = self
            .participation(challenge_id, member_id)?
            .ok_or_else(|| LoyaltyError::ChallengeNotJoined {
                member_id: member_id.to_string(),
                challenge_id: challenge_id.to_string(),
            })?;
        Ok((participation, inserted > 0))
    }

    fn participation(
        &self,
        challenge_id: &str,
        member_id: &str,
    ) -> LoyaltyResult<Option<Participation>> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {PARTICIPATION_COLUMNS} FROM challenge_participants
             WHERE challenge_id = ?1 AND member_id = ?2"
        );
        let row = conn
            .query_row(&sql, params![challenge_id, member_id], Self::row_to_participation)
            .optional()?;
        Ok(row)
    }

    fn add_progress(
        &self,
        challenge_id: &str,
        member_id: &str,
        delta: i64,
        now: i64,
    ) -> LoyaltyResult<Participation> {
        let changed = {
            let conn = self.db.conn();
            conn.execute(
                r#"UPDATE challenge_participants
                   SET progress = progress + ?3, updated_at = ?4
                   WHERE challenge_id = ?1 AND member_id = ?2"#,
                params![challenge_id, member_id, delta, now],
            )?
        };
        if changed == 0 {
            return Err(LoyaltyError::ChallengeNotJoined {
                member_id: member_id.to_string(),
                challenge_id: challenge_id.to_string(),
            });
        }
        self.participation(challenge_id, member_id)?
            .ok_or_else(|| LoyaltyError::ChallengeNotJoined {
                member_id: member_id.to_string(),
                challenge_id: challenge_id.to_string(),
            })
    }

    fn mark_completed(&self, challenge_id: &str, member_id: &str, at: i64) -> LoyaltyResult<()> {
        let conn = self.db.conn();
        conn.execute(
            r#"UPDATE challenge_participants
               SET completed_at = ?3, updated_at = ?3
               WHERE challenge_id = ?1 AND member_id = ?2 AND completed_at IS NULL"#,
            params![challenge_id, member_id, at],
        )?;
        Ok(())
    }

    fn ranked(&self, challenge_id: &str) -> LoyaltyResult<Vec<Participation>> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {PARTICIPATION_COLUMNS} FROM challenge_participants
             WHERE challenge_id = ?1
             ORDER BY progress DESC, completed_at IS NULL, completed_at ASC, member_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![challenge_id], Self::row_to_participation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn any_completed(&self, challenge_id: &str) -> LoyaltyResult<bool> {
        let conn = self.db.conn();
        let found: bool = conn.query_row(
            r#"SELECT EXISTS(
                   SELECT 1 FROM challenge_participants
                   WHERE challenge_id = ?1 AND completed_at IS NOT NULL)"#,
            params![challenge_id],
            |r| r.get(0),
        )?;
        Ok(found)
    }
}
