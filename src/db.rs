//! SQLite database connection and schema management for the ledger
//!
//! Manages the `~/.loyalty/ledger.db` database with automatic schema migration.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::config::LoyaltyConfig;

/// Shared database handle. Clones share one connection.
#[derive(Clone)]
pub struct LoyaltyDb {
    conn: Arc<Mutex<Connection>>,
}

impl LoyaltyDb {
    /// Open or create the ledger database at the default location (~/.loyalty/ledger.db)
    pub fn open_default() -> Result<Self> {
        let db_path = LoyaltyConfig::global_config_dir().join("ledger.db");
        Self::open(&db_path)
    }

    /// Open or create the ledger database at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger db: {}", path.display()))?;

        // WAL lets the sweep job read while the engine writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory ledger db")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Lock the connection. A poisoned lock is recovered: every multi-row
    /// write runs inside an SQL transaction, so a panic mid-write rolls back.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to create ledger schema")?;
        drop(conn);
        self.run_migrations()?;
        Ok(())
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn();
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )?;
        Ok(version)
    }

    /// Run any pending migrations
    fn run_migrations(&self) -> Result<()> {
        let version = self.schema_version()?;
        let conn = self.conn();

        // Migration 2: gamification tables
        if version < 2 {
            conn.execute_batch(
                r#"
                -- Member activity feeding achievement criteria
                CREATE TABLE IF NOT EXISTS activity_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    member_id TEXT NOT NULL REFERENCES members(id),
                    event_type TEXT NOT NULL,
                    value INTEGER NOT NULL DEFAULT 1,
                    dedup_key TEXT NOT NULL,
                    occurred_at INTEGER NOT NULL,
                    UNIQUE(member_id, dedup_key)
                );
                CREATE INDEX IF NOT EXISTS idx_activity_member_type
                    ON activity_events(member_id, event_type, occurred_at);

                -- One unlock per (member, achievement)
                CREATE TABLE IF NOT EXISTS member_achievements (
                    member_id TEXT NOT NULL REFERENCES members(id),
                    achievement_id TEXT NOT NULL,
                    earned_at INTEGER NOT NULL,
                    transaction_id TEXT NOT NULL,
                    PRIMARY KEY (member_id, achievement_id)
                );

                -- Challenge participation and progress (leaderboard source)
                CREATE TABLE IF NOT EXISTS challenge_participants (
                    challenge_id TEXT NOT NULL,
                    member_id TEXT NOT NULL REFERENCES members(id),
                    joined_at INTEGER NOT NULL,
                    progress INTEGER NOT NULL DEFAULT 0,
                    completed_at INTEGER,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (challenge_id, member_id)
                );
                CREATE INDEX IF NOT EXISTS idx_challenge_rank
                    ON challenge_participants(challenge_id, progress DESC);
                "#,
            )?;
            conn.execute("INSERT OR REPLACE INTO schema_version VALUES (2)", [])?;
        }

        // Migration 3: reward stock ledger
        if version < 3 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reward_stock (
                    reward_id TEXT PRIMARY KEY,
                    remaining INTEGER NOT NULL CHECK (remaining >= 0),
                    updated_at INTEGER NOT NULL
                );
                "#,
            )?;
            conn.execute("INSERT OR REPLACE INTO schema_version VALUES (3)", [])?;
        }

        Ok(())
    }
}

/// SQL schema for the ledger database (version 1)
const SCHEMA_SQL: &str = r#"
-- Members (never deleted, soft-deactivated via status)
CREATE TABLE IF NOT EXISTS members (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE,
    tier_id TEXT NOT NULL,
    referral_code TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active',
    preferences_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Running totals, updated in the same SQL transaction as each append
CREATE TABLE IF NOT EXISTS member_balances (
    member_id TEXT PRIMARY KEY REFERENCES members(id),
    balance INTEGER NOT NULL DEFAULT 0,
    lifetime_points INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

-- Append-only transaction log (source of truth)
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    member_id TEXT NOT NULL REFERENCES members(id),
    kind TEXT NOT NULL,
    points INTEGER NOT NULL,
    source TEXT NOT NULL,
    source_id TEXT,
    dedup_key TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    expired_at INTEGER,
    UNIQUE(member_id, dedup_key)
);
CREATE INDEX IF NOT EXISTS idx_tx_member ON transactions(member_id, created_at);
CREATE INDEX IF NOT EXISTS idx_tx_source ON transactions(member_id, source, created_at);
CREATE INDEX IF NOT EXISTS idx_tx_expiry ON transactions(expires_at) WHERE expired_at IS NULL;

-- Schema version
CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);
INSERT OR IGNORE INTO schema_version VALUES (1);
"#;
