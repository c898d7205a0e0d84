//! Error taxonomy for the loyalty engine
//!
//! Every variant carries structured context so callers can map it to their
//! own user-facing messages. Duplicate transactions are not errors; see
//! [`crate::ledger::AppendOutcome`].

use serde::{Deserialize, Serialize};

use crate::models::MemberStatus;

/// Result alias used throughout the engine
pub type LoyaltyResult<T> = std::result::Result<T, LoyaltyError>;

/// Machine-readable reason a referral was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralRejection {
    UnknownCode,
    SelfReferral,
    ReferrerInactive,
    AlreadyReferred,
    DailyLimitReached,
    TotalLimitReached,
    ProgramInactive,
    ProgramNotStarted,
    ProgramExpired,
}

impl ReferralRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCode => "unknown_code",
            Self::SelfReferral => "self_referral",
            Self::ReferrerInactive => "referrer_inactive",
            Self::AlreadyReferred => "already_referred",
            Self::DailyLimitReached => "daily_limit_reached",
            Self::TotalLimitReached => "total_limit_reached",
            Self::ProgramInactive => "program_inactive",
            Self::ProgramNotStarted => "program_not_started",
            Self::ProgramExpired => "program_expired",
        }
    }
}

impl std::fmt::Display for ReferralRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by engine operations
#[derive(Debug, thiserror::Error)]
pub enum LoyaltyError {
    #[error("insufficient points for {member_id}: balance {balance}, required {required}")]
    InsufficientPoints {
        member_id: String,
        balance: i64,
        required: i64,
        shortfall: i64,
    },

    #[error("reward {reward_id} is not available to tier {tier_id}")]
    TierRestriction { reward_id: String, tier_id: String },

    #[error("reward {reward_id} is out of stock")]
    OutOfStock { reward_id: String },

    #[error("invalid referral: {0}")]
    InvalidReferral(ReferralRejection),

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("member {member_id} is {status}")]
    MemberInactive {
        member_id: String,
        status: MemberStatus,
    },

    #[error("challenge {challenge_id} is {status}, not active")]
    ChallengeNotActive {
        challenge_id: String,
        status: String,
    },

    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("member {member_id} has not joined challenge {challenge_id}")]
    ChallengeNotJoined {
        member_id: String,
        challenge_id: String,
    },

    #[error("reward not found: {0}")]
    RewardNotFound(String),

    #[error("achievement not found: {0}")]
    AchievementNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("invalid point amount: {0}")]
    InvalidPoints(i64),

    #[error("dedup key {dedup_key} belongs to a different operation")]
    LedgerConflict { dedup_key: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("member {member_id} is busy, retry later")]
    Busy { member_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LoyaltyError {
    /// Transient errors that are safe to retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Busy { .. } => true,
            Self::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Stable machine-readable kind for callers that map errors to messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientPoints { .. } => "insufficient_points",
            Self::TierRestriction { .. } => "tier_restriction",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::InvalidReferral(_) => "invalid_referral",
            Self::MemberNotFound(_) => "member_not_found",
            Self::MemberInactive { .. } => "member_inactive",
            Self::ChallengeNotActive { .. } => "challenge_not_active",
            Self::ChallengeNotFound(_) => "challenge_not_found",
            Self::ChallengeNotJoined { .. } => "challenge_not_joined",
            Self::RewardNotFound(_) => "reward_not_found",
            Self::AchievementNotFound(_) => "achievement_not_found",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::InvalidPoints(_) => "invalid_points",
            Self::LedgerConflict { .. } => "ledger_conflict",
            Self::Configuration(_) => "configuration_error",
            Self::Busy { .. } => "busy",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
        }
    }
}
