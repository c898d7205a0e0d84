//! `LoyaltyService`: the engine's single entry point
//!
//! Composes the ledger, tier, achievement, referral, challenge and reward
//! components. Every mutating operation runs under the affected members'
//! locks and is retried on `Busy`; dedup keys make the retries safe.

mod events;

pub use events::{
    Adjustment, Award, AwardRequest, Enrollment, ExpirySummary, LoyaltyEvent, ProgressReport,
    Reconciliation,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::achievements::{
    AchievementCatalog, AchievementEngine, AchievementProgress, AchievementRecords,
    AchievementUnlock, ActivityEvent,
};
use crate::challenges::{
    ChallengeCatalog, ChallengeStatus, ChallengeTracker, JoinOutcome, LeaderboardEntry,
    SqliteChallenges,
};
use crate::clock::Clock;
use crate::config::{EngineSettings, LoyaltyConfig};
use crate::db::LoyaltyDb;
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::ledger::{LedgerStore, MemberLocks, SqliteLedger};
use crate::members::{MemberStore, SqliteMembers};
use crate::models::{BalanceView, Member, MemberStatus, NewTransaction, Transaction, TransactionKind};
use crate::referral::{ReferralCredit, ReferralProcessor, ReferralProgram};
use crate::rewards::{Redemption, RewardCatalog, RewardInventory, RewardRedeemer};
use crate::tiers::{TierEngine, TierTable};
use crate::time_bucket::add_days;

/// Source tag for the enrollment welcome bonus
pub const ENROLLMENT_SOURCE: &str = "enrollment";
/// Source tag for manual adjustments
pub const ADJUSTMENT_SOURCE: &str = "adjustment";
/// Activity event type recorded for the referrer of a credited referral
pub const REFERRAL_EVENT: &str = "referral";

const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

pub struct LoyaltyService {
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    locks: MemberLocks,
    ledger: Arc<dyn LedgerStore>,
    members: Arc<dyn MemberStore>,
    tiers: TierEngine,
    achievements: AchievementEngine,
    referrals: ReferralProcessor,
    challenges: ChallengeTracker,
    rewards: RewardRedeemer,
}

impl LoyaltyService {
    /// Validate the configuration and wire every component onto `db`.
    ///
    /// Fails with `Configuration` on any malformed definition, so a running
    /// service always has a consistent tier table.
    pub fn new(config: &LoyaltyConfig, db: LoyaltyDb, clock: Arc<dyn Clock>) -> LoyaltyResult<Self> {
        config.validate()?;

        let tiers = Arc::new(TierTable::new(&config.tiers)?);
        let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(db.clone()));
        let members: Arc<dyn MemberStore> = Arc::new(SqliteMembers::new(db.clone()));

        let achievements = AchievementEngine::new(
            Arc::new(AchievementCatalog::new(&config.achievements)?),
            AchievementRecords::new(db.clone()),
            ledger.clone(),
        );
        let referrals = ReferralProcessor::new(
            Arc::new(ReferralProgram::from_config(&config.referral)?),
            tiers.clone(),
            ledger.clone(),
            members.clone(),
        );
        let challenges = ChallengeTracker::new(
            Arc::new(ChallengeCatalog::new(&config.challenges)?),
            Arc::new(SqliteChallenges::new(db.clone())),
            ledger.clone(),
        );

        let catalog = Arc::new(RewardCatalog::new(&config.rewards, &tiers)?);
        let inventory = RewardInventory::new(db);
        inventory.seed(&catalog, clock.now_ms())?;
        let rewards = RewardRedeemer::new(
            catalog,
            inventory,
            tiers.clone(),
            ledger.clone(),
            members.clone(),
        );

        info!(
            tiers = tiers.tiers().len(),
            achievements = config.achievements.len(),
            challenges = config.challenges.len(),
            rewards = config.rewards.len(),
            "Loyalty engine ready"
        );

        Ok(Self {
            settings: config.engine.clone(),
            clock,
            locks: MemberLocks::new(config.engine.lock_timeout()),
            tiers: TierEngine::new(tiers, ledger.clone(), members.clone()),
            ledger,
            members,
            achievements,
            referrals,
            challenges,
            rewards,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn tier_table(&self) -> &TierTable {
        self.tiers.table()
    }

    pub fn rewards(&self) -> &RewardCatalog {
        self.rewards.catalog()
    }

    pub fn challenge_catalog(&self) -> &ChallengeCatalog {
        self.challenges.catalog()
    }

    /// Run `op`, retrying transient failures up to `busy_retries` times
    fn with_retry<T>(&self, op: &str, mut f: impl FnMut() -> LoyaltyResult<T>) -> LoyaltyResult<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < self.settings.busy_retries => {
                    attempt += 1;
                    debug!(op, attempt, error = %e, "Retrying transient failure");
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                }
                result => return result,
            }
        }
    }

    fn require_active(&self, member_id: &str) -> LoyaltyResult<Member> {
        let member = self.members.require(member_id)?;
        if !member.is_active() {
            return Err(LoyaltyError::MemberInactive {
                member_id: member.id,
                status: member.status,
            });
        }
        Ok(member)
    }

    /// Expiry stamp for credits earned at `now`
    fn credit_expiry(&self, now: i64) -> Option<i64> {
        self.settings
            .points_validity_days
            .map(|days| add_days(now, days))
    }

    // ========================================================================
    // Members
    // ========================================================================

    /// Enroll a user, optionally through a referral code.
    ///
    /// Repeating the call for the same user returns the existing member and
    /// ignores the code. An unknown code fails the call; other referral
    /// rejections are reported in [`Enrollment::referral`].
    pub fn enroll(&self, user_id: &str, referral_code: Option<&str>) -> LoyaltyResult<Enrollment> {
        let user_id = user_id.trim();
        let referrer = match referral_code {
            Some(code) => Some(self.referrals.resolve_code(code)?),
            None => None,
        };

        let (member, created, mut events) =
            self.with_retry("enroll", || self.enroll_member(user_id))?;

        let referral = match referrer {
            Some(referrer) if !created => {
                debug!(
                    referrer_id = %referrer.id,
                    member_id = %member.id,
                    "Ignoring referral code for an existing member"
                );
                None
            }
            Some(referrer) => match self.credit_referral(&referrer.id, &member.id) {
                Ok((credit, referral_events)) => {
                    events.extend(referral_events);
                    Some(Ok(credit))
                }
                Err(LoyaltyError::InvalidReferral(reason)) => {
                    warn!(
                        referrer_id = %referrer.id,
                        member_id = %member.id,
                        reason = %reason,
                        "Referral rejected at enrollment"
                    );
                    Some(Err(reason))
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let member = self.members.require(&member.id)?;
        Ok(Enrollment {
            member,
            created,
            referral,
            events,
        })
    }

    fn enroll_member(&self, user_id: &str) -> LoyaltyResult<(Member, bool, Vec<LoyaltyEvent>)> {
        let _guard = self.locks.acquire(&format!("enroll:{user_id}"))?;
        if let Some(existing) = self.members.by_user_id(user_id)? {
            debug!(user_id, member_id = %existing.id, "User already enrolled");
            return Ok((existing, false, Vec::new()));
        }

        let now = self.clock.now_ms();
        let base = self.tiers.table().base();
        let mut member = Member {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tier_id: base.id.clone(),
            referral_code: String::new(),
            status: MemberStatus::Active,
            preferences: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };

        let mut inserted = false;
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            member.referral_code = new_referral_code();
            if self.members.insert(&member)? {
                inserted = true;
                break;
            }
            // Lost a race with another process enrolling the same user
            if let Some(existing) = self.members.by_user_id(user_id)? {
                return Ok((existing, false, Vec::new()));
            }
        }
        if !inserted {
            return Err(LoyaltyError::Configuration(
                "could not allocate a unique referral code".to_string(),
            ));
        }

        let _member_guard = self.locks.acquire(&member.id)?;
        let mut events = Vec::new();

        if self.settings.welcome_bonus > 0 {
            let entry = NewTransaction::new(
                &member.id,
                TransactionKind::Bonus,
                self.settings.welcome_bonus,
                ENROLLMENT_SOURCE,
                format!("enroll:{}", member.id),
            );
            let tx = self.ledger.append(entry, now)?.into_transaction();
            events.push(LoyaltyEvent::PointsAwarded {
                member_id: member.id.clone(),
                transaction_id: tx.id,
                points: tx.points,
            });
        }
        if let Some(bonus) = self.tiers.pay_welcome_bonus(&member.id, base, now)? {
            events.push(LoyaltyEvent::BonusAwarded {
                member_id: member.id.clone(),
                transaction_id: bonus.id,
                tier_id: base.id.clone(),
                points: bonus.points,
            });
        }
        events.extend(LoyaltyEvent::from_tier_changes(
            self.tiers.check_and_promote(&member.id, now)?,
        ));

        info!(member_id = %member.id, user_id, "Member enrolled");
        Ok((member, true, events))
    }

    pub fn member(&self, member_id: &str) -> LoyaltyResult<Member> {
        self.members.require(member_id)
    }

    pub fn member_by_user(&self, user_id: &str) -> LoyaltyResult<Option<Member>> {
        self.members.by_user_id(user_id)
    }

    /// Soft deactivation or suspension. Members are never deleted.
    pub fn set_member_status(&self, member_id: &str, status: MemberStatus) -> LoyaltyResult<Member> {
        self.with_retry("set_member_status", || {
            let _guard = self.locks.acquire(member_id)?;
            let member = self.members.require(member_id)?;
            if member.status != status {
                self.members.set_status(member_id, status, self.clock.now_ms())?;
                info!(member_id, from = %member.status, to = %status, "Member status changed");
            }
            self.members.require(member_id)
        })
    }

    // ========================================================================
    // Points
    // ========================================================================

    /// Credit points for an external event, scaled by the member's tier
    /// multiplier
    pub fn award_points(&self, request: AwardRequest) -> LoyaltyResult<Award> {
        if request.raw_points <= 0 {
            return Err(LoyaltyError::InvalidPoints(request.raw_points));
        }
        self.with_retry("award_points", || self.award_locked(&request))
    }

    fn award_locked(&self, request: &AwardRequest) -> LoyaltyResult<Award> {
        let member_id = request.member_id.as_str();
        let _guard = self.locks.acquire(member_id)?;
        let member = self.require_active(member_id)?;
        let now = self.clock.now_ms();

        let table = self.tiers.table();
        let tier = match table.get(&member.tier_id) {
            Some(tier) => tier,
            None => table.resolve(self.ledger.lifetime_points(member_id)?)?,
        };
        let points = table.apply_multiplier(tier, request.raw_points);

        let mut entry = NewTransaction::new(
            member_id,
            TransactionKind::Earn,
            points,
            request.source.clone(),
            request.dedup_key.clone(),
        )
        .metadata(request.metadata.clone().unwrap_or_default())
        .meta("raw_points", request.raw_points)
        .meta("multiplier", tier.multiplier)
        .meta("tier", tier.id.clone())
        .expires_at(self.credit_expiry(now));
        if let Some(source_id) = &request.source_id {
            entry = entry.source_id(source_id.clone());
        }

        let outcome = self.ledger.append(entry, now)?;
        if outcome.is_duplicate() {
            return Ok(Award {
                transaction: outcome.into_transaction(),
                duplicate: true,
                balance: self.ledger.balance(member_id)?,
                events: Vec::new(),
            });
        }
        let tx = outcome.into_transaction();
        let mut events = vec![LoyaltyEvent::PointsAwarded {
            member_id: member_id.to_string(),
            transaction_id: tx.id.clone(),
            points: tx.points,
        }];

        // Already stored only when replaying an award whose event outlived
        // its ledger row; evaluation below is idempotent either way.
        self.achievements.record(&ActivityEvent {
            member_id: member_id.to_string(),
            event_type: request.source.clone(),
            value: tx.points,
            dedup_key: award_event_key(&request.dedup_key),
            occurred_at: now,
        })?;
        events.extend(LoyaltyEvent::from_unlocks(
            self.achievements.evaluate(member_id, &request.source, now)?,
        ));
        events.extend(LoyaltyEvent::from_tier_changes(
            self.tiers.check_and_promote(member_id, now)?,
        ));

        info!(
            member_id,
            source = %request.source,
            raw_points = request.raw_points,
            points = tx.points,
            "Points awarded"
        );
        Ok(Award {
            transaction: tx,
            duplicate: false,
            balance: self.ledger.balance(member_id)?,
            events,
        })
    }

    /// Spend points on a reward
    pub fn redeem_points(
        &self,
        member_id: &str,
        reward_id: &str,
        dedup_key: Option<&str>,
    ) -> LoyaltyResult<Redemption> {
        self.with_retry("redeem_points", || {
            let _guard = self.locks.acquire(member_id)?;
            self.rewards
                .redeem(member_id, reward_id, dedup_key, self.clock.now_ms())
        })
    }

    /// Manual correction. Negative amounts cannot take the balance below
    /// zero; positive amounts do not count toward lifetime points.
    pub fn adjust_points(
        &self,
        member_id: &str,
        points: i64,
        reason: &str,
        dedup_key: &str,
    ) -> LoyaltyResult<Adjustment> {
        if points == 0 {
            return Err(LoyaltyError::InvalidPoints(points));
        }
        self.with_retry("adjust_points", || {
            let _guard = self.locks.acquire(member_id)?;
            self.members.require(member_id)?;
            let now = self.clock.now_ms();

            if let Some(existing) = self.ledger.find_by_dedup_key(member_id, dedup_key)? {
                return Ok(Adjustment {
                    transaction: existing,
                    duplicate: true,
                    balance: self.ledger.balance(member_id)?,
                });
            }

            let balance = self.ledger.balance(member_id)?;
            if balance + points < 0 {
                return Err(LoyaltyError::InsufficientPoints {
                    member_id: member_id.to_string(),
                    balance,
                    required: -points,
                    shortfall: -points - balance,
                });
            }

            let entry = NewTransaction::new(
                member_id,
                TransactionKind::Adjust,
                points,
                ADJUSTMENT_SOURCE,
                dedup_key,
            )
            .meta("reason", reason);
            let outcome = self.ledger.append(entry, now)?;
            let duplicate = outcome.is_duplicate();
            if !duplicate {
                info!(member_id, points, reason, "Points adjusted");
            }
            Ok(Adjustment {
                transaction: outcome.into_transaction(),
                duplicate,
                balance: self.ledger.balance(member_id)?,
            })
        })
    }

    pub fn get_balance(&self, member_id: &str) -> LoyaltyResult<BalanceView> {
        let member = self.members.require(member_id)?;
        let totals = self.ledger.totals(member_id)?;
        Ok(BalanceView {
            member_id: member.id,
            balance: totals.balance,
            lifetime_points: totals.lifetime_points,
            tier: member.tier_id,
        })
    }

    /// The member's transaction log, oldest first
    pub fn history(&self, member_id: &str) -> LoyaltyResult<Vec<Transaction>> {
        self.members.require(member_id)?;
        self.ledger.transactions(member_id)
    }

    // ========================================================================
    // Referrals
    // ========================================================================

    /// Credit the owner of `referral_code` and `new_member_id`
    pub fn process_referral(
        &self,
        referral_code: &str,
        new_member_id: &str,
    ) -> LoyaltyResult<ReferralCredit> {
        let referrer = self.referrals.resolve_code(referral_code)?;
        let (credit, _events) = self.credit_referral(&referrer.id, new_member_id)?;
        Ok(credit)
    }

    fn credit_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
    ) -> LoyaltyResult<(ReferralCredit, Vec<LoyaltyEvent>)> {
        self.with_retry("process_referral", || {
            let _guard = self.locks.acquire_pair(referrer_id, referee_id)?;
            let now = self.clock.now_ms();
            let credit = self
                .referrals
                .process(referrer_id, referee_id, now, self.credit_expiry(now))?;
            if credit.duplicate {
                return Ok((credit, Vec::new()));
            }

            let mut events = Vec::new();
            for tx in [&credit.referrer_transaction, &credit.referee_transaction] {
                events.push(LoyaltyEvent::PointsAwarded {
                    member_id: tx.member_id.clone(),
                    transaction_id: tx.id.clone(),
                    points: tx.points,
                });
            }

            self.achievements.record(&ActivityEvent {
                member_id: referrer_id.to_string(),
                event_type: REFERRAL_EVENT.to_string(),
                value: 1,
                dedup_key: credit.referrer_transaction.dedup_key.clone(),
                occurred_at: now,
            })?;
            events.extend(LoyaltyEvent::from_unlocks(
                self.achievements.evaluate(referrer_id, REFERRAL_EVENT, now)?,
            ));
            for member_id in [referrer_id, referee_id] {
                events.extend(LoyaltyEvent::from_tier_changes(
                    self.tiers.check_and_promote(member_id, now)?,
                ));
            }
            Ok((credit, events))
        })
    }

    // ========================================================================
    // Achievements
    // ========================================================================

    /// Record an activity (a share, a review...) and unlock what it earns.
    /// A repeated dedup key is a no-op.
    pub fn record_activity(
        &self,
        member_id: &str,
        event_type: &str,
        value: i64,
        dedup_key: &str,
    ) -> LoyaltyResult<Vec<LoyaltyEvent>> {
        self.with_retry("record_activity", || {
            let _guard = self.locks.acquire(member_id)?;
            self.require_active(member_id)?;
            let now = self.clock.now_ms();

            let recorded = self.achievements.record(&ActivityEvent {
                member_id: member_id.to_string(),
                event_type: event_type.to_string(),
                value,
                dedup_key: activity_event_key(dedup_key),
                occurred_at: now,
            })?;
            if !recorded {
                return Ok(Vec::new());
            }

            let mut events = LoyaltyEvent::from_unlocks(
                self.achievements.evaluate(member_id, event_type, now)?,
            );
            events.extend(LoyaltyEvent::from_tier_changes(
                self.tiers.check_and_promote(member_id, now)?,
            ));
            Ok(events)
        })
    }

    pub fn unlocked_achievements(&self, member_id: &str) -> LoyaltyResult<Vec<AchievementUnlock>> {
        self.members.require(member_id)?;
        self.achievements.unlocked(member_id)
    }

    pub fn achievement_progress(&self, member_id: &str) -> LoyaltyResult<Vec<AchievementProgress>> {
        self.members.require(member_id)?;
        self.achievements.progress(member_id, self.clock.now_ms())
    }

    // ========================================================================
    // Challenges
    // ========================================================================

    pub fn challenge_status(&self, challenge_id: &str) -> LoyaltyResult<ChallengeStatus> {
        self.challenges.status(challenge_id, self.clock.now_ms())
    }

    pub fn join_challenge(&self, member_id: &str, challenge_id: &str) -> LoyaltyResult<JoinOutcome> {
        self.with_retry("join_challenge", || {
            let _guard = self.locks.acquire(member_id)?;
            self.require_active(member_id)?;
            self.challenges
                .join(member_id, challenge_id, self.clock.now_ms())
        })
    }

    pub fn report_challenge_progress(
        &self,
        member_id: &str,
        challenge_id: &str,
        delta: i64,
    ) -> LoyaltyResult<ProgressReport> {
        self.with_retry("report_challenge_progress", || {
            let _guard = self.locks.acquire(member_id)?;
            self.require_active(member_id)?;
            let now = self.clock.now_ms();
            let outcome = self.challenges.report_progress(
                member_id,
                challenge_id,
                delta,
                now,
                self.credit_expiry(now),
            )?;

            let mut events = Vec::new();
            if let Some(reward) = &outcome.reward {
                events.push(LoyaltyEvent::ChallengeCompleted {
                    member_id: member_id.to_string(),
                    challenge_id: challenge_id.to_string(),
                    points: reward.points,
                });
                events.extend(LoyaltyEvent::from_tier_changes(
                    self.tiers.check_and_promote(member_id, now)?,
                ));
            }
            Ok(ProgressReport { outcome, events })
        })
    }

    pub fn get_leaderboard(&self, challenge_id: &str) -> LoyaltyResult<Vec<LeaderboardEntry>> {
        self.challenges.leaderboard(challenge_id)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Expire every credit whose `expires_at` has passed
    pub fn expire_due(&self) -> LoyaltyResult<ExpirySummary> {
        let batch_size = self.settings.sweep_batch_size.max(1);
        let mut summary = ExpirySummary::default();

        loop {
            let now = self.clock.now_ms();
            let due = self.ledger.due_for_expiry(now, batch_size)?;
            let full_batch = due.len() == batch_size;
            let mut progressed = false;

            for tx in due {
                let expiry = self.with_retry("expire", || {
                    let _guard = self.locks.acquire(&tx.member_id)?;
                    self.ledger.expire(&tx.id, now)
                })?;
                if expiry.already_expired {
                    continue;
                }
                progressed = true;
                summary.expired += 1;
                summary.recredited += expiry.audit.map(|a| a.points).unwrap_or(0);
            }

            if !full_batch || !progressed {
                break;
            }
        }

        if summary.expired > 0 {
            info!(
                expired = summary.expired,
                recredited = summary.recredited,
                "Expired due credits"
            );
        }
        Ok(summary)
    }

    /// Compare stored totals with totals rebuilt from the log
    pub fn reconcile(&self, member_id: &str) -> LoyaltyResult<Reconciliation> {
        let _guard = self.locks.acquire(member_id)?;
        self.members.require(member_id)?;
        Ok(Reconciliation {
            stored: self.ledger.totals(member_id)?,
            recomputed: self.ledger.recompute(member_id)?,
        })
    }

    /// Reconcile every member and rewrite drifted totals from the log.
    /// Returns the members that were repaired.
    pub fn reconcile_all(&self) -> LoyaltyResult<Vec<String>> {
        let mut repaired = Vec::new();
        for member_id in self.members.list_ids()? {
            let report = self.with_retry("reconcile", || self.reconcile(&member_id))?;
            if report.is_consistent() {
                continue;
            }
            warn!(
                member_id = %member_id,
                stored_balance = report.stored.balance,
                log_balance = report.recomputed.balance,
                stored_lifetime = report.stored.lifetime_points,
                log_lifetime = report.recomputed.lifetime_points,
                "Running totals drifted from the ledger, restoring"
            );
            self.with_retry("restore_totals", || {
                let _guard = self.locks.acquire(&member_id)?;
                let now = self.clock.now_ms();
                self.ledger.restore_totals(&member_id, now)?;
                self.tiers.check_and_promote(&member_id, now)
            })?;
            repaired.push(member_id);
        }
        Ok(repaired)
    }

    /// Re-run the tier table integrity check
    pub fn verify_tiers(&self) -> LoyaltyResult<()> {
        self.tiers.table().verify()
    }
}

/// Activity keys for awards live apart from caller-supplied activity keys
fn award_event_key(dedup_key: &str) -> String {
    format!("award:{dedup_key}")
}

fn activity_event_key(dedup_key: &str) -> String {
    format!("activity:{dedup_key}")
}

fn new_referral_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    raw.chars().take(REFERRAL_CODE_LEN).collect()
}
