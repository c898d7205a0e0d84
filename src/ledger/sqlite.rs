//! SQLite implementation of the ledger

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use super::store::{AppendOutcome, Expiry, LedgerStore};
use crate::db::LoyaltyDb;
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::models::{Metadata, NewTransaction, Totals, Transaction, TransactionKind};

const TX_COLUMNS: &str = "id, member_id, kind, points, source, source_id, dedup_key, \
     metadata_json, created_at, expires_at, expired_at";

/// Source tag for the audit entries written by [`LedgerStore::expire`]
pub const EXPIRY_SOURCE: &str = "expiry";

/// Ledger backed by the `transactions` and `member_balances` tables
#[derive(Clone)]
pub struct SqliteLedger {
    db: LoyaltyDb,
}

impl SqliteLedger {
    pub fn new(db: LoyaltyDb) -> Self {
        Self { db }
    }

    fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
        let metadata: Metadata = row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Ok(Transaction {
            id: row.get(0)?,
            member_id: row.get(1)?,
            kind: row.get(2)?,
            points: row.get(3)?,
            source: row.get(4)?,
            source_id: row.get(5)?,
            dedup_key: row.get(6)?,
            metadata,
            created_at: row.get(8)?,
            expires_at: row.get(9)?,
            expired_at: row.get(10)?,
        })
    }

    fn get_in(conn: &Connection, transaction_id: &str) -> LoyaltyResult<Option<Transaction>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM transactions WHERE id = ?1");
        let tx = conn
            .query_row(&sql, params![transaction_id], Self::row_to_transaction)
            .optional()?;
        Ok(tx)
    }

    fn find_in(
        conn: &Connection,
        member_id: &str,
        dedup_key: &str,
    ) -> LoyaltyResult<Option<Transaction>> {
        let sql =
            format!("SELECT {TX_COLUMNS} FROM transactions WHERE member_id = ?1 AND dedup_key = ?2");
        let tx = conn
            .query_row(&sql, params![member_id, dedup_key], Self::row_to_transaction)
            .optional()?;
        Ok(tx)
    }

    fn totals_in(conn: &Connection, member_id: &str) -> LoyaltyResult<Totals> {
        let totals = conn
            .query_row(
                "SELECT balance, lifetime_points FROM member_balances WHERE member_id = ?1",
                params![member_id],
                |r| {
                    Ok(Totals {
                        balance: r.get(0)?,
                        lifetime_points: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(totals.unwrap_or_default())
    }

    /// Insert a new row and bump the running totals. Caller checks dedup first
    /// and owns the surrounding SQL transaction.
    fn insert_in(conn: &Connection, entry: NewTransaction, now: i64) -> LoyaltyResult<Transaction> {
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        conn.execute(
            r#"INSERT INTO transactions
               (id, member_id, kind, points, source, source_id, dedup_key,
                metadata_json, created_at, expires_at, expired_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)"#,
            params![
                id,
                entry.member_id,
                entry.kind,
                entry.points,
                entry.source,
                entry.source_id,
                entry.dedup_key,
                metadata_json,
                now,
                entry.expires_at,
            ],
        )?;

        let lifetime_delta = if entry.kind.counts_toward_lifetime() && entry.points > 0 {
            entry.points
        } else {
            0
        };
        conn.execute(
            r#"INSERT INTO member_balances (member_id, balance, lifetime_points, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(member_id) DO UPDATE SET
                   balance = balance + ?2,
                   lifetime_points = lifetime_points + ?3,
                   updated_at = ?4"#,
            params![entry.member_id, entry.points, lifetime_delta, now],
        )?;

        Ok(Transaction {
            id,
            member_id: entry.member_id,
            kind: entry.kind,
            points: entry.points,
            source: entry.source,
            source_id: entry.source_id,
            dedup_key: entry.dedup_key,
            metadata: entry.metadata,
            created_at: now,
            expires_at: entry.expires_at,
            expired_at: None,
        })
    }

    fn append_in(conn: &Connection, entry: NewTransaction, now: i64) -> LoyaltyResult<AppendOutcome> {
        if let Some(existing) = Self::find_in(conn, &entry.member_id, &entry.dedup_key)? {
            debug!(
                member_id = %entry.member_id,
                dedup_key = %entry.dedup_key,
                "Duplicate transaction, returning existing"
            );
            return Ok(AppendOutcome::Duplicate(existing));
        }
        Ok(AppendOutcome::Appended(Self::insert_in(conn, entry, now)?))
    }
}

impl LedgerStore for SqliteLedger {
    fn append(&self, entry: NewTransaction, now: i64) -> LoyaltyResult<AppendOutcome> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let outcome = Self::append_in(&tx, entry, now)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn append_group(
        &self,
        entries: Vec<NewTransaction>,
        now: i64,
    ) -> LoyaltyResult<Vec<AppendOutcome>> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let mut existing = Vec::with_capacity(entries.len());
        for entry in &entries {
            existing.push(Self::find_in(&tx, &entry.member_id, &entry.dedup_key)?);
        }

        let found = existing.iter().filter(|e| e.is_some()).count();
        if found == entries.len() {
            return Ok(existing
                .into_iter()
                .flatten()
                .map(AppendOutcome::Duplicate)
                .collect());
        }
        if found > 0 {
            // Groups are written atomically, so a half-present group means a
            // dedup key was reused by an unrelated operation
            let (entry, _) = entries
                .iter()
                .zip(&existing)
                .find(|(_, e)| e.is_some())
                .ok_or_else(|| LoyaltyError::LedgerConflict {
                    dedup_key: String::new(),
                })?;
            return Err(LoyaltyError::LedgerConflict {
                dedup_key: entry.dedup_key.clone(),
            });
        }

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(AppendOutcome::Appended(Self::insert_in(&tx, entry, now)?));
        }
        tx.commit()?;
        Ok(outcomes)
    }

    fn totals(&self, member_id: &str) -> LoyaltyResult<Totals> {
        let conn = self.db.conn();
        Self::totals_in(&conn, member_id)
    }

    fn expire(&self, transaction_id: &str, at: i64) -> LoyaltyResult<Expiry> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let mut original = Self::get_in(&tx, transaction_id)?
            .ok_or_else(|| LoyaltyError::TransactionNotFound(transaction_id.to_string()))?;
        let audit_key = format!("expire:{}", original.id);

        if original.is_expired() {
            let audit = Self::find_in(&tx, &original.member_id, &audit_key)?;
            return Ok(Expiry {
                original,
                audit,
                already_expired: true,
            });
        }
        if original.points <= 0 {
            return Err(LoyaltyError::InvalidPoints(original.points));
        }

        let totals = Self::totals_in(&tx, &original.member_id)?;
        // Points already spent from this credit are not clawed back
        let spent = (original.points - totals.balance).max(0);

        tx.execute(
            "UPDATE transactions SET expired_at = ?2 WHERE id = ?1",
            params![original.id, at],
        )?;
        tx.execute(
            "UPDATE member_balances SET balance = balance - ?2, updated_at = ?3 WHERE member_id = ?1",
            params![original.member_id, original.points, at],
        )?;

        let entry = NewTransaction::new(
            original.member_id.clone(),
            TransactionKind::Expire,
            spent,
            EXPIRY_SOURCE,
            audit_key,
        )
        .source_id(original.id.clone())
        .meta("expired_transaction_id", original.id.clone())
        .meta("expired_points", original.points);
        let audit = Self::append_in(&tx, entry, at)?.into_transaction();
        tx.commit()?;

        original.expired_at = Some(at);
        Ok(Expiry {
            original,
            audit: Some(audit),
            already_expired: false,
        })
    }

    fn transaction(&self, transaction_id: &str) -> LoyaltyResult<Option<Transaction>> {
        let conn = self.db.conn();
        Self::get_in(&conn, transaction_id)
    }

    fn find_by_dedup_key(
        &self,
        member_id: &str,
        dedup_key: &str,
    ) -> LoyaltyResult<Option<Transaction>> {
        let conn = self.db.conn();
        Self::find_in(&conn, member_id, dedup_key)
    }

    fn transactions(&self, member_id: &str) -> LoyaltyResult<Vec<Transaction>> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE member_id = ?1 ORDER BY created_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![member_id], Self::row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count_by_source(
        &self,
        member_id: &str,
        source: &str,
        since: Option<i64>,
    ) -> LoyaltyResult<u64> {
        let conn = self.db.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE member_id = ?1 AND source = ?2 AND created_at >= ?3",
            params![member_id, source, since.unwrap_or(i64::MIN)],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn due_for_expiry(&self, now: i64, limit: usize) -> LoyaltyResult<Vec<Transaction>> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM transactions
             WHERE expired_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?1 AND points > 0
             ORDER BY expires_at, rowid LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![now, limit as i64], Self::row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn recompute(&self, member_id: &str) -> LoyaltyResult<Totals> {
        let conn = self.db.conn();
        let totals = conn.query_row(
            r#"SELECT
                   COALESCE(SUM(CASE WHEN expired_at IS NULL THEN points ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN kind IN ('earn', 'bonus') AND points > 0 THEN points ELSE 0 END), 0)
               FROM transactions WHERE member_id = ?1"#,
            params![member_id],
            |r| {
                Ok(Totals {
                    balance: r.get(0)?,
                    lifetime_points: r.get(1)?,
                })
            },
        )?;
        Ok(totals)
    }

    fn restore_totals(&self, member_id: &str, now: i64) -> LoyaltyResult<Totals> {
        let totals = self.recompute(member_id)?;
        let conn = self.db.conn();
        conn.execute(
            r#"INSERT INTO member_balances (member_id, balance, lifetime_points, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(member_id) DO UPDATE SET
                   balance = ?2, lifetime_points = ?3, updated_at = ?4"#,
            params![member_id, totals.balance, totals.lifetime_points, now],
        )?;
        Ok(totals)
    }
}
