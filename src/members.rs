//! Member repository

use rusqlite::{ErrorCode, OptionalExtension, Row, params};

use crate::db::LoyaltyDb;
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::models::{Member, MemberStatus};

const MEMBER_COLUMNS: &str =
    "id, user_id, tier_id, referral_code, status, preferences_json, created_at, updated_at";

/// Storage seam for member records
pub trait MemberStore: Send + Sync {
    /// Insert a new member. Returns `false` when `user_id` or
    /// `referral_code` is already taken.
    fn insert(&self, member: &Member) -> LoyaltyResult<bool>;

    fn get(&self, member_id: &str) -> LoyaltyResult<Option<Member>>;

    fn by_user_id(&self, user_id: &str) -> LoyaltyResult<Option<Member>>;

    fn by_referral_code(&self, code: &str) -> LoyaltyResult<Option<Member>>;

    fn set_tier(&self, member_id: &str, tier_id: &str, now: i64) -> LoyaltyResult<()>;

    fn set_status(&self, member_id: &str, status: MemberStatus, now: i64) -> LoyaltyResult<()>;

    /// All member ids, oldest first
    fn list_ids(&self) -> LoyaltyResult<Vec<String>>;

    /// Like [`MemberStore::get`], but a missing member is an error
    fn require(&self, member_id: &str) -> LoyaltyResult<Member> {
        self.get(member_id)?
            .ok_or_else(|| LoyaltyError::MemberNotFound(member_id.to_string()))
    }
}

/// Members stored in the `members` table
#[derive(Clone)]
pub struct SqliteMembers {
    db: LoyaltyDb,
}

impl SqliteMembers {
    pub fn new(db: LoyaltyDb) -> Self {
        Self { db }
    }

    fn row_to_member(row: &Row<'_>) -> rusqlite::Result<Member> {
        Ok(Member {
            id: row.get(0)?,
            user_id: row.get(1)?,
            tier_id: row.get(2)?,
            referral_code: row.get(3)?,
            status: row.get(4)?,
            preferences: row
                .get::<_, String>(5)
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn find_by(&self, column: &str, value: &str) -> LoyaltyResult<Option<Member>> {
        let conn = self.db.conn();
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE {column} = ?1");
        let member = conn
            .query_row(&sql, params![value], Self::row_to_member)
            .optional()?;
        Ok(member)
    }
}

impl MemberStore for SqliteMembers {
    fn insert(&self, member: &Member) -> LoyaltyResult<bool> {
        let preferences = serde_json::to_string(&member.preferences)?;
        let conn = self.db.conn();
        let result = conn.execute(
            r#"INSERT INTO members
               (id, user_id, tier_id, referral_code, status, preferences_json, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                member.id,
                member.user_id,
                member.tier_id,
                member.referral_code,
                member.status,
                preferences,
                member.created_at,
                member.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, member_id: &str) -> LoyaltyResult<Option<Member>> {
        self.find_by("id", member_id)
    }

    fn by_user_id(&self, user_id: &str) -> LoyaltyResult<Option<Member>> {
        self.find_by("user_id", user_id)
    }

    fn by_referral_code(&self, code: &str) -> LoyaltyResult<Option<Member>> {
        self.find_by("referral_code", code)
    }

    fn set_tier(&self, member_id: &str, tier_id: &str, now: i64) -> LoyaltyResult<()> {
        let conn = self.db.conn();
        let changed = conn.execute(
            "UPDATE members SET tier_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![member_id, tier_id, now],
        )?;
        if changed == 0 {
            return Err(LoyaltyError::MemberNotFound(member_id.to_string()));
        }
        Ok(())
    }

    fn set_status(&self, member_id: &str, status: MemberStatus, now: i64) -> LoyaltyResult<()> {
        let conn = self.db.conn();
        let changed = conn.execute(
            "UPDATE members SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![member_id, status, now],
        )?;
        if changed == 0 {
            return Err(LoyaltyError::MemberNotFound(member_id.to_string()));
        }
        Ok(())
    }

    fn list_ids(&self) -> LoyaltyResult<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT id FROM members ORDER BY created_at, rowid")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}
