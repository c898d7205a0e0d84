//! Storage seam for the ledger

use crate::error::LoyaltyResult;
use crate::models::{NewTransaction, Totals, Transaction};

/// Result of an append. A repeated dedup key is not an error: the existing
/// transaction is returned so the call is safely retryable.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended(Transaction),
    Duplicate(Transaction),
}

impl AppendOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Appended(tx) | Self::Duplicate(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            Self::Appended(tx) | Self::Duplicate(tx) => tx,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Result of expiring a transaction
#[derive(Debug, Clone)]
pub struct Expiry {
    /// The expired credit, with `expired_at` set
    pub original: Transaction,
    /// The `expire` audit entry; carries the re-credit of any already-spent part
    pub audit: Option<Transaction>,
    pub already_expired: bool,
}

/// Authoritative transaction log.
///
/// Implementations must make each call atomic. Callers serialize mutations
/// per member through [`super::MemberLocks`].
pub trait LedgerStore: Send + Sync {
    /// Append one transaction, or return the existing one for its dedup key
    fn append(&self, entry: NewTransaction, now: i64) -> LoyaltyResult<AppendOutcome>;

    /// Append several transactions as one unit: all are written or none.
    /// If the group was already applied every entry comes back `Duplicate`.
    fn append_group(
        &self,
        entries: Vec<NewTransaction>,
        now: i64,
    ) -> LoyaltyResult<Vec<AppendOutcome>>;

    /// Running totals for a member (zero if the member has no transactions)
    fn totals(&self, member_id: &str) -> LoyaltyResult<Totals>;

    fn balance(&self, member_id: &str) -> LoyaltyResult<i64> {
        Ok(self.totals(member_id)?.balance)
    }

    fn lifetime_points(&self, member_id: &str) -> LoyaltyResult<i64> {
        Ok(self.totals(member_id)?.lifetime_points)
    }

    /// Mark a positive transaction expired as of `at`
    fn expire(&self, transaction_id: &str, at: i64) -> LoyaltyResult<Expiry>;

    fn transaction(&self, transaction_id: &str) -> LoyaltyResult<Option<Transaction>>;

    fn find_by_dedup_key(
        &self,
        member_id: &str,
        dedup_key: &str,
    ) -> LoyaltyResult<Option<Transaction>>;

    /// Full history for a member, oldest first
    fn transactions(&self, member_id: &str) -> LoyaltyResult<Vec<Transaction>>;

    /// Number of transactions from `source` created at or after `since`
    fn count_by_source(
        &self,
        member_id: &str,
        source: &str,
        since: Option<i64>,
    ) -> LoyaltyResult<u64>;

    /// Unexpired credits whose `expires_at` is at or before `now`
    fn due_for_expiry(&self, now: i64, limit: usize) -> LoyaltyResult<Vec<Transaction>>;

    /// Totals recomputed from the log by full scan
    fn recompute(&self, member_id: &str) -> LoyaltyResult<Totals>;

    /// Overwrite the running totals with values recomputed from the log
    fn restore_totals(&self, member_id: &str, now: i64) -> LoyaltyResult<Totals>;
}
