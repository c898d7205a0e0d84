//! Challenge participation, progress and completion

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::catalog::{Challenge, ChallengeCatalog, ChallengeStatus};
use super::store::{ChallengeStore, Participation};
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::ledger::LedgerStore;
use crate::models::{NewTransaction, Transaction, TransactionKind};

/// Source tag for challenge rewards
pub const CHALLENGE_SOURCE: &str = "challenge";

#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub participation: Participation,
    pub already_joined: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressOutcome {
    pub participation: Participation,
    /// This report pushed progress over the target
    pub completed_now: bool,
    /// Reward credited by this report
    pub reward: Option<Transaction>,
}

/// One leaderboard row. Ranks are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub member_id: String,
    pub progress: i64,
    pub completed_at: Option<i64>,
}

/// Callers must hold the member's lock for `join` and `report_progress`
pub struct ChallengeTracker {
    catalog: Arc<ChallengeCatalog>,
    store: Arc<dyn ChallengeStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl ChallengeTracker {
    pub fn new(
        catalog: Arc<ChallengeCatalog>,
        store: Arc<dyn ChallengeStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            catalog,
            store,
            ledger,
        }
    }

    pub fn catalog(&self) -> &ChallengeCatalog {
        &self.catalog
    }

    pub fn status(&self, challenge_id: &str, now: i64) -> LoyaltyResult<ChallengeStatus> {
        let challenge = self.catalog.get(challenge_id)?;
        self.status_of(challenge, now)
    }

    fn status_of(&self, challenge: &Challenge, now: i64) -> LoyaltyResult<ChallengeStatus> {
        let any_completed = if now >= challenge.ends_at {
            self.store.any_completed(&challenge.id)?
        } else {
            false
        };
        Ok(challenge.status(now, any_completed))
    }

    fn require_active(&self, challenge: &Challenge, now: i64) -> LoyaltyResult<()> {
        let status = self.status_of(challenge, now)?;
        if status != ChallengeStatus::Active {
            return Err(LoyaltyError::ChallengeNotActive {
                challenge_id: challenge.id.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    pub fn join(&self, member_id: &str, challenge_id: &str, now: i64) -> LoyaltyResult<JoinOutcome> {
        let challenge = self.catalog.get(challenge_id)?;

        if let Some(participation) = self.store.participation(challenge_id, member_id)? {
            return Ok(JoinOutcome {
                participation,
                already_joined: true,
            });
        }
        self.require_active(challenge, now)?;

        let (participation, created) = self.store.join(challenge_id, member_id, now)?;
        if created {
            info!(member_id, challenge_id, "Joined challenge");
        }
        Ok(JoinOutcome {
            participation,
            already_joined: !created,
        })
    }

    /// Add progress; the first report reaching the target pays the reward
    pub fn report_progress(
        &self,
        member_id: &str,
        challenge_id: &str,
        delta: i64,
        now: i64,
        expires_at: Option<i64>,
    ) -> LoyaltyResult<ProgressOutcome> {
        let challenge = self.catalog.get(challenge_id)?;
        self.require_active(challenge, now)?;
        if delta <= 0 {
            return Err(LoyaltyError::InvalidPoints(delta));
        }
        let Some(current) = self.store.participation(challenge_id, member_id)? else {
            return Err(LoyaltyError::ChallengeNotJoined {
                member_id: member_id.to_string(),
                challenge_id: challenge_id.to_string(),
            });
        };

        // Callers serialize per member, so `current` stays valid until the
        // writes below
        if current.is_completed() || current.progress.saturating_add(delta) < challenge.target {
            let participation = self.store.add_progress(challenge_id, member_id, delta, now)?;
            return Ok(ProgressOutcome {
                participation,
                completed_now: false,
                reward: None,
            });
        }

        // Reward before progress: a failed append leaves nothing behind, and
        // a retry after a crash between the writes finds the reward by dedup
        // key and only records progress and completed_at
        let entry = NewTransaction::new(
            member_id,
            TransactionKind::Earn,
            challenge.points_reward,
            CHALLENGE_SOURCE,
            format!("challenge:{member_id}:{challenge_id}:completion"),
        )
        .source_id(challenge_id)
        .expires_at(expires_at);
        let entry = match &challenge.badge {
            Some(badge) => entry.meta("badge", badge.clone()),
            None => entry,
        };
        let outcome = self.ledger.append(entry, now)?;
        let mut participation = self.store.add_progress(challenge_id, member_id, delta, now)?;
        self.store.mark_completed(challenge_id, member_id, now)?;
        participation.completed_at = Some(now);

        let reward = if outcome.is_duplicate() {
            None
        } else {
            info!(
                member_id,
                challenge_id,
                points = challenge.points_reward,
                "Challenge completed"
            );
            Some(outcome.into_transaction())
        };

        Ok(ProgressOutcome {
            participation,
            completed_now: true,
            reward,
        })
    }

    /// Ranked participants, computed from participation records on read
    pub fn leaderboard(&self, challenge_id: &str) -> LoyaltyResult<Vec<LeaderboardEntry>> {
        self.catalog.get(challenge_id)?;
        let ranked = self.store.ranked(challenge_id)?;
        Ok(ranked
            .into_iter()
            .zip(1u32..)
            .map(|(p, rank)| LeaderboardEntry {
                rank,
                member_id: p.member_id,
                progress: p.progress,
                completed_at: p.completed_at,
            })
            .collect())
    }
}
