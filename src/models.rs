//! Data models for the loyalty ledger
//!
//! These structures represent the rows stored in and queried from the ledger
//! database. Timestamps are milliseconds since the Unix epoch.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Opaque key-value bag attached to transactions for audit purposes
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Member lifecycle status. Members are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loyalty program member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    /// Identity reference from the member directory
    pub user_id: String,
    pub tier_id: String,
    pub referral_code: String,
    pub status: MemberStatus,
    pub preferences: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

/// Ledger transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earn,
    Redeem,
    Expire,
    Adjust,
    Bonus,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Redeem => "redeem",
            Self::Expire => "expire",
            Self::Adjust => "adjust",
            Self::Bonus => "bonus",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "earn" => Some(Self::Earn),
            "redeem" => Some(Self::Redeem),
            "expire" => Some(Self::Expire),
            "adjust" => Some(Self::Adjust),
            "bonus" => Some(Self::Bonus),
            _ => None,
        }
    }

    /// Only earned and bonus points feed lifetime totals (and therefore tiers)
    pub fn counts_toward_lifetime(&self) -> bool {
        matches!(self, Self::Earn | Self::Bonus)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for TransactionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::from_str(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown transaction kind: {s}").into()))
    }
}

impl ToSql for MemberStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MemberStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::from_str(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown member status: {s}").into()))
    }
}

/// Immutable ledger record.
///
/// The serialized shape is the durable contract audit and reconciliation
/// tooling relies on; do not rename fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub member_id: String,
    pub kind: TransactionKind,
    pub points: i64,
    pub source: String,
    pub source_id: Option<String>,
    pub dedup_key: String,
    pub metadata: Metadata,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    /// Set once when the transaction is expired
    #[serde(default)]
    pub expired_at: Option<i64>,
}

impl Transaction {
    pub fn is_expired(&self) -> bool {
        self.expired_at.is_some()
    }

    /// Points this transaction adds to lifetime totals
    pub fn lifetime_contribution(&self) -> i64 {
        if self.kind.counts_toward_lifetime() && self.points > 0 {
            self.points
        } else {
            0
        }
    }

    /// Points this transaction currently contributes to the balance
    pub fn balance_contribution(&self) -> i64 {
        if self.is_expired() { 0 } else { self.points }
    }
}

/// A transaction to be appended
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub member_id: String,
    pub kind: TransactionKind,
    pub points: i64,
    pub source: String,
    pub source_id: Option<String>,
    pub dedup_key: String,
    pub metadata: Metadata,
    pub expires_at: Option<i64>,
}

impl NewTransaction {
    pub fn new(
        member_id: impl Into<String>,
        kind: TransactionKind,
        points: i64,
        source: impl Into<String>,
        dedup_key: impl Into<String>,
    ) -> Self {
        Self {
            member_id: member_id.into(),
            kind,
            points,
            source: source.into(),
            source_id: None,
            dedup_key: dedup_key.into(),
            metadata: Metadata::new(),
            expires_at: None,
        }
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn expires_at(mut self, expires_at: Option<i64>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// Balance summary returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub member_id: String,
    pub balance: i64,
    pub lifetime_points: i64,
    pub tier: String,
}

/// Running totals maintained alongside the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub balance: i64,
    pub lifetime_points: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in [
            TransactionKind::Earn,
            TransactionKind::Redeem,
            TransactionKind::Expire,
            TransactionKind::Adjust,
            TransactionKind::Bonus,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::from_str("refund"), None);
    }

    #[test]
    fn test_lifetime_contribution() {
        let mut tx = Transaction {
            id: "t1".to_string(),
            member_id: "m1".to_string(),
            kind: TransactionKind::Earn,
            points: 40,
            source: "purchase".to_string(),
            source_id: None,
            dedup_key: "order-1".to_string(),
            metadata: Metadata::new(),
            created_at: 0,
            expires_at: None,
            expired_at: None,
        };
        assert_eq!(tx.lifetime_contribution(), 40);

        tx.kind = TransactionKind::Adjust;
        assert_eq!(tx.lifetime_contribution(), 0);

        tx.kind = TransactionKind::Bonus;
        tx.expired_at = Some(10);
        // Expiry never reduces lifetime points
        assert_eq!(tx.lifetime_contribution(), 40);
        assert_eq!(tx.balance_contribution(), 0);
    }

    #[test]
    fn test_transaction_serializes_with_snake_case_kind() {
        let tx = NewTransaction::new("m1", TransactionKind::Bonus, 5, "tier", "k");
        assert_eq!(tx.kind.to_string(), "bonus");
        let json = serde_json::to_value(TransactionKind::Redeem).unwrap();
        assert_eq!(json, serde_json::json!("redeem"));
    }
}
