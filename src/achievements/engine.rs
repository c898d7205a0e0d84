//! Achievement engine
//!
//! Evaluates criteria against recorded activity and unlocks achievements
//! exactly once per member. The unlock transaction's dedup key is what makes
//! concurrent evaluations safe; the engine itself takes no locks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::checker::{is_satisfied, progress, window_start};
use super::definitions::{Achievement, AchievementCatalog};
use super::records::{AchievementRecords, AchievementUnlock, ActivityEvent, EventStats};
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::ledger::LedgerStore;
use crate::models::{NewTransaction, Transaction, TransactionKind};

/// Source tag for achievement rewards
pub const ACHIEVEMENT_SOURCE: &str = "achievement";

/// An achievement that was just unlocked
#[derive(Debug, Clone)]
pub struct UnlockedAchievement {
    pub achievement: Achievement,
    pub unlock: AchievementUnlock,
    /// The reward transaction; `None` if it was already credited
    pub transaction: Option<Transaction>,
}

/// Result of [`AchievementEngine::award`]
#[derive(Debug, Clone)]
pub struct AwardOutcome {
    pub unlock: AchievementUnlock,
    /// `false` when the member had already unlocked the achievement
    pub newly_unlocked: bool,
    pub transaction: Option<Transaction>,
}

/// Progress toward one achievement
#[derive(Debug, Clone, Serialize)]
pub struct AchievementProgress {
    pub achievement_id: String,
    pub name: String,
    pub current: i64,
    pub target: i64,
    pub unlocked: bool,
}

pub struct AchievementEngine {
    catalog: Arc<AchievementCatalog>,
    records: AchievementRecords,
    ledger: Arc<dyn LedgerStore>,
}

impl AchievementEngine {
    pub fn new(
        catalog: Arc<AchievementCatalog>,
        records: AchievementRecords,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            catalog,
            records,
            ledger,
        }
    }

    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// Record an activity event. Returns `false` for a repeated dedup key.
    pub fn record(&self, event: &ActivityEvent) -> LoyaltyResult<bool> {
        let recorded = self.records.record_event(event)?;
        if !recorded {
            debug!(
                member_id = %event.member_id,
                dedup_key = %event.dedup_key,
                "Duplicate activity event"
            );
        }
        Ok(recorded)
    }

    /// Unlock every not-yet-unlocked achievement listening to `event_type`
    /// whose criteria are now met
    pub fn evaluate(
        &self,
        member_id: &str,
        event_type: &str,
        now: i64,
    ) -> LoyaltyResult<Vec<UnlockedAchievement>> {
        let candidates = self.catalog.for_event(event_type);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let unlocked = self.records.unlocked_ids(member_id)?;
        let mut stats_by_window: HashMap<Option<i64>, EventStats> = HashMap::new();
        let mut newly_unlocked = Vec::new();

        for achievement in candidates {
            if unlocked.contains(&achievement.id) {
                continue;
            }

            let since = window_start(&achievement.criteria, now);
            let stats = match stats_by_window.get(&since) {
                Some(stats) => *stats,
                None => {
                    let stats = self.records.event_stats(member_id, event_type, since)?;
                    stats_by_window.insert(since, stats);
                    stats
                }
            };
            if !is_satisfied(&achievement.criteria, &stats) {
                continue;
            }

            let outcome = self.award(member_id, &achievement.id, now)?;
            if outcome.newly_unlocked {
                newly_unlocked.push(UnlockedAchievement {
                    achievement: achievement.clone(),
                    unlock: outcome.unlock,
                    transaction: outcome.transaction,
                });
            }
        }

        Ok(newly_unlocked)
    }

    /// Unlock an achievement and credit its reward. Idempotent: an existing
    /// unlock is returned unchanged.
    pub fn award(
        &self,
        member_id: &str,
        achievement_id: &str,
        now: i64,
    ) -> LoyaltyResult<AwardOutcome> {
        let achievement = self
            .catalog
            .get(achievement_id)
            .ok_or_else(|| LoyaltyError::AchievementNotFound(achievement_id.to_string()))?;

        if let Some(unlock) = self.records.unlock(member_id, achievement_id)? {
            return Ok(AwardOutcome {
                unlock,
                newly_unlocked: false,
                transaction: None,
            });
        }

        let entry = NewTransaction::new(
            member_id,
            TransactionKind::Earn,
            achievement.points_reward,
            ACHIEVEMENT_SOURCE,
            format!("achievement:{member_id}:{achievement_id}"),
        )
        .source_id(achievement_id)
        .meta("rarity", achievement.rarity.as_str());
        let outcome = self.ledger.append(entry, now)?;
        let duplicate = outcome.is_duplicate();
        let tx = outcome.into_transaction();

        let unlock = self.records.insert_unlock(&AchievementUnlock {
            member_id: member_id.to_string(),
            achievement_id: achievement_id.to_string(),
            earned_at: tx.created_at,
            transaction_id: tx.id.clone(),
        })?;

        if duplicate {
            return Ok(AwardOutcome {
                unlock,
                newly_unlocked: false,
                transaction: None,
            });
        }

        info!(
            member_id,
            achievement_id,
            points = achievement.points_reward,
            "Achievement unlocked"
        );
        Ok(AwardOutcome {
            unlock,
            newly_unlocked: true,
            transaction: Some(tx),
        })
    }

    pub fn unlocked(&self, member_id: &str) -> LoyaltyResult<Vec<AchievementUnlock>> {
        self.records.unlocked(member_id)
    }

    /// Progress toward every achievement in the catalog
    pub fn progress(&self, member_id: &str, now: i64) -> LoyaltyResult<Vec<AchievementProgress>> {
        let unlocked = self.records.unlocked_ids(member_id)?;
        let mut out = Vec::with_capacity(self.catalog.len());
        for achievement in self.catalog.all() {
            let criteria = &achievement.criteria;
            let stats =
                self.records
                    .event_stats(member_id, criteria.event(), window_start(criteria, now))?;
            let (current, target) = progress(criteria, &stats);
            out.push(AchievementProgress {
                achievement_id: achievement.id.clone(),
                name: achievement.name.clone(),
                current: current.min(target),
                target,
                unlocked: unlocked.contains(&achievement.id),
            });
        }
        Ok(out)
    }
}
