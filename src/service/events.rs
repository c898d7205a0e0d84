//! Results and side-effect events returned by the façade

use serde::Serialize;

use crate::achievements::UnlockedAchievement;
use crate::challenges::ProgressOutcome;
use crate::error::ReferralRejection;
use crate::models::{Member, Metadata, Totals, Transaction};
use crate::referral::ReferralCredit;
use crate::tiers::TierChange;

/// Something the engine did as a consequence of an operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoyaltyEvent {
    PointsAwarded {
        member_id: String,
        transaction_id: String,
        points: i64,
    },
    TierChanged {
        member_id: String,
        from: String,
        to: String,
    },
    BonusAwarded {
        member_id: String,
        transaction_id: String,
        tier_id: String,
        points: i64,
    },
    AchievementUnlocked {
        member_id: String,
        achievement_id: String,
        points: i64,
    },
    ChallengeCompleted {
        member_id: String,
        challenge_id: String,
        points: i64,
    },
}

impl LoyaltyEvent {
    pub(crate) fn from_tier_changes(changes: Vec<TierChange>) -> Vec<Self> {
        let mut events = Vec::with_capacity(changes.len());
        for change in changes {
            events.push(Self::TierChanged {
                member_id: change.member_id.clone(),
                from: change.from,
                to: change.to.clone(),
            });
            if let Some(bonus) = change.bonus {
                events.push(Self::BonusAwarded {
                    member_id: change.member_id,
                    transaction_id: bonus.id,
                    tier_id: change.to,
                    points: bonus.points,
                });
            }
        }
        events
    }

    pub(crate) fn from_unlocks(unlocked: Vec<UnlockedAchievement>) -> Vec<Self> {
        unlocked
            .into_iter()
            .map(|u| Self::AchievementUnlocked {
                member_id: u.unlock.member_id,
                achievement_id: u.unlock.achievement_id,
                points: u.achievement.points_reward,
            })
            .collect()
    }
}

/// Input for [`crate::service::LoyaltyService::award_points`]
#[derive(Debug, Clone)]
pub struct AwardRequest {
    pub member_id: String,
    /// Points before the tier multiplier; must be positive
    pub raw_points: i64,
    /// Also used as the activity event type for achievements
    pub source: String,
    pub source_id: Option<String>,
    pub dedup_key: String,
    pub metadata: Option<Metadata>,
}

impl AwardRequest {
    pub fn new(
        member_id: impl Into<String>,
        raw_points: i64,
        source: impl Into<String>,
        dedup_key: impl Into<String>,
    ) -> Self {
        Self {
            member_id: member_id.into(),
            raw_points,
            source: source.into(),
            source_id: None,
            dedup_key: dedup_key.into(),
            metadata: None,
        }
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Result of awarding points
#[derive(Debug, Clone, Serialize)]
pub struct Award {
    pub transaction: Transaction,
    /// The dedup key was already used; nothing changed
    pub duplicate: bool,
    pub balance: i64,
    pub events: Vec<LoyaltyEvent>,
}

/// Result of enrolling a user
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub member: Member,
    /// `false` when the user was already enrolled
    pub created: bool,
    /// Outcome of the referral code, when one was given. Rejections other
    /// than an unknown code do not fail the enrollment.
    pub referral: Option<Result<ReferralCredit, ReferralRejection>>,
    pub events: Vec<LoyaltyEvent>,
}

/// Challenge progress plus what completing it triggered
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    #[serde(flatten)]
    pub outcome: ProgressOutcome,
    pub events: Vec<LoyaltyEvent>,
}

/// Result of a manual adjustment
#[derive(Debug, Clone, Serialize)]
pub struct Adjustment {
    pub transaction: Transaction,
    pub duplicate: bool,
    pub balance: i64,
}

/// Stored totals compared with totals rebuilt from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub stored: Totals,
    pub recomputed: Totals,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.recomputed
    }
}

/// Totals for one expiry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    pub expired: usize,
    /// Points written back to cover already-spent credit
    pub recredited: i64,
}
