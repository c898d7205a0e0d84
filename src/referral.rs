//! Referral program
//!
//! A referral credits the referrer and the referee as one atomic ledger group.
//! Rate limits are counted from committed ledger rows, never from in-memory
//! counters, so they hold across restarts and processes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ReferralConfig;
use crate::error::{LoyaltyError, LoyaltyResult, ReferralRejection};
use crate::ledger::LedgerStore;
use crate::members::MemberStore;
use crate::models::{Member, NewTransaction, Transaction, TransactionKind};
use crate::tiers::TierTable;
use crate::time_bucket::day_start_ms;

/// Source tag on the referrer's credit
pub const REFERRER_SOURCE: &str = "referral.referrer";
/// Source tag on the referee's credit
pub const REFEREE_SOURCE: &str = "referral.referee";

/// Validated referral program rules. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralProgram {
    pub active: bool,
    pub referrer_reward: i64,
    pub referee_reward: i64,
    pub max_per_day: u32,
    pub max_total: u32,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
}

impl ReferralProgram {
    pub fn from_config(config: &ReferralConfig) -> LoyaltyResult<Self> {
        if config.referrer_reward < 0 || config.referee_reward < 0 {
            return Err(LoyaltyError::Configuration(
                "referral rewards must not be negative".to_string(),
            ));
        }
        let valid_from = config.valid_from.map(|t| t.timestamp_millis());
        let valid_until = config.valid_until.map(|t| t.timestamp_millis());
        if matches!((valid_from, valid_until), (Some(from), Some(until)) if from >= until) {
            return Err(LoyaltyError::Configuration(
                "referral.valid_from must be before referral.valid_until".to_string(),
            ));
        }

        Ok(Self {
            active: config.active,
            referrer_reward: config.referrer_reward,
            referee_reward: config.referee_reward,
            max_per_day: config.max_per_day,
            max_total: config.max_total,
            valid_from,
            valid_until,
        })
    }

    /// Whether referrals can be credited at `now`
    pub fn check_open(&self, now: i64) -> Result<(), ReferralRejection> {
        if !self.active {
            return Err(ReferralRejection::ProgramInactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(ReferralRejection::ProgramNotStarted);
        }
        if self.valid_until.is_some_and(|until| now >= until) {
            return Err(ReferralRejection::ProgramExpired);
        }
        Ok(())
    }
}

/// A credited referral pair
#[derive(Debug, Clone, Serialize)]
pub struct ReferralCredit {
    pub referrer_id: String,
    pub referee_id: String,
    pub referrer_transaction: Transaction,
    pub referee_transaction: Transaction,
    /// The pair had already been credited; nothing new was written
    pub duplicate: bool,
}

/// Validates and credits referral pairs.
///
/// Callers must hold both members' locks.
pub struct ReferralProcessor {
    program: Arc<ReferralProgram>,
    tiers: Arc<TierTable>,
    ledger: Arc<dyn LedgerStore>,
    members: Arc<dyn MemberStore>,
}

fn dedup_key(referrer_id: &str, referee_id: &str, side: &str) -> String {
    format!("referral:{referrer_id}:{referee_id}:{side}")
}

impl ReferralProcessor {
    pub fn new(
        program: Arc<ReferralProgram>,
        tiers: Arc<TierTable>,
        ledger: Arc<dyn LedgerStore>,
        members: Arc<dyn MemberStore>,
    ) -> Self {
        Self {
            program,
            tiers,
            ledger,
            members,
        }
    }

    pub fn program(&self) -> &ReferralProgram {
        &self.program
    }

    /// Look up the member owning a referral code
    pub fn resolve_code(&self, referral_code: &str) -> LoyaltyResult<Member> {
        let code = referral_code.trim().to_uppercase();
        self.members
            .by_referral_code(&code)?
            .ok_or(LoyaltyError::InvalidReferral(ReferralRejection::UnknownCode))
    }

    /// Validate the pair and credit both sides atomically.
    ///
    /// `expires_at` is stamped on both credits.
    pub fn process(
        &self,
        referrer_id: &str,
        referee_id: &str,
        now: i64,
        expires_at: Option<i64>,
    ) -> LoyaltyResult<ReferralCredit> {
        let referrer_key = dedup_key(referrer_id, referee_id, "referrer");
        let referee_key = dedup_key(referrer_id, referee_id, "referee");

        // A retried pair answers with the original credits before any
        // limit check, since those limits now include this very pair
        if let (Some(referrer_tx), Some(referee_tx)) = (
            self.ledger.find_by_dedup_key(referrer_id, &referrer_key)?,
            self.ledger.find_by_dedup_key(referee_id, &referee_key)?,
        ) {
            debug!(referrer_id, referee_id, "Referral pair already credited");
            return Ok(ReferralCredit {
                referrer_id: referrer_id.to_string(),
                referee_id: referee_id.to_string(),
                referrer_transaction: referrer_tx,
                referee_transaction: referee_tx,
                duplicate: true,
            });
        }

        let reject = |reason| Err(LoyaltyError::InvalidReferral(reason));

        if referrer_id == referee_id {
            return reject(ReferralRejection::SelfReferral);
        }
        let referrer = self.members.require(referrer_id)?;
        self.members.require(referee_id)?;
        if !referrer.is_active() {
            return reject(ReferralRejection::ReferrerInactive);
        }
        if self.ledger.count_by_source(referee_id, REFEREE_SOURCE, None)? > 0 {
            return reject(ReferralRejection::AlreadyReferred);
        }
        if let Err(reason) = self.program.check_open(now) {
            return reject(reason);
        }

        let today = self
            .ledger
            .count_by_source(referrer_id, REFERRER_SOURCE, Some(day_start_ms(now)))?;
        if today >= u64::from(self.program.max_per_day) {
            return reject(ReferralRejection::DailyLimitReached);
        }
        let total = self.ledger.count_by_source(referrer_id, REFERRER_SOURCE, None)?;
        if total >= u64::from(self.program.max_total) {
            return reject(ReferralRejection::TotalLimitReached);
        }

        let tier = self
            .tiers
            .resolve(self.ledger.lifetime_points(referrer_id)?)?;
        let referrer_points = self
            .tiers
            .apply_multiplier(tier, self.program.referrer_reward);

        let group = vec![
            NewTransaction::new(
                referrer_id,
                TransactionKind::Earn,
                referrer_points,
                REFERRER_SOURCE,
                referrer_key,
            )
            .source_id(referee_id)
            .meta("referee_id", referee_id)
            .meta("tier", tier.id.clone())
            .expires_at(expires_at),
            NewTransaction::new(
                referee_id,
                TransactionKind::Earn,
                self.program.referee_reward,
                REFEREE_SOURCE,
                referee_key,
            )
            .source_id(referrer_id)
            .meta("referrer_id", referrer_id)
            .expires_at(expires_at),
        ];

        let mut outcomes = self.ledger.append_group(group, now)?.into_iter();
        let (Some(referrer_out), Some(referee_out)) = (outcomes.next(), outcomes.next()) else {
            return Err(LoyaltyError::Configuration(
                "ledger returned an incomplete referral group".to_string(),
            ));
        };
        let duplicate = referrer_out.is_duplicate();

        if !duplicate {
            info!(
                referrer_id,
                referee_id,
                referrer_points,
                referee_points = self.program.referee_reward,
                "Referral credited"
            );
        }

        Ok(ReferralCredit {
            referrer_id: referrer_id.to_string(),
            referee_id: referee_id.to_string(),
            referrer_transaction: referrer_out.into_transaction(),
            referee_transaction: referee_out.into_transaction(),
            duplicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DAY_MS;
    use crate::config::default_tiers;
    use crate::db::LoyaltyDb;
    use crate::ledger::SqliteLedger;
    use crate::members::SqliteMembers;
    use crate::models::MemberStatus;

    struct Fixture {
        processor: ReferralProcessor,
        ledger: Arc<dyn LedgerStore>,
        members: Arc<dyn MemberStore>,
    }

    fn fixture(config: ReferralConfig, ids: &[&str]) -> Fixture {
        let db = LoyaltyDb::open_in_memory().unwrap();
        let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(db.clone()));
        let members: Arc<dyn MemberStore> = Arc::new(SqliteMembers::new(db));
        for id in ids {
            members
                .insert(&Member {
                    id: id.to_string(),
                    user_id: format!("user-{id}"),
                    tier_id: "bronze".to_string(),
                    referral_code: id.to_uppercase(),
                    status: MemberStatus::Active,
                    preferences: serde_json::json!({}),
                    created_at: 0,
                    updated_at: 0,
                })
                .unwrap();
        }
        let processor = ReferralProcessor::new(
            Arc::new(ReferralProgram::from_config(&config).unwrap()),
            Arc::new(TierTable::new(&default_tiers()).unwrap()),
            ledger.clone(),
            members.clone(),
        );
        Fixture {
            processor,
            ledger,
            members,
        }
    }

    fn rejection(result: LoyaltyResult<ReferralCredit>) -> ReferralRejection {
        match result {
            Err(LoyaltyError::InvalidReferral(reason)) => reason,
            other => panic!("expected referral rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_credits_both_sides_once() {
        let f = fixture(ReferralConfig::default(), &["alice", "bob"]);
        let credit = f.processor.process("alice", "bob", 10, None).unwrap();
        assert!(!credit.duplicate);
        assert_eq!(credit.referrer_transaction.points, 500);
        assert_eq!(credit.referee_transaction.points, 250);

        let again = f.processor.process("alice", "bob", 20, None).unwrap();
        assert!(again.duplicate);
        assert_eq!(again.referrer_transaction.id, credit.referrer_transaction.id);
        assert_eq!(f.ledger.balance("alice").unwrap(), 500);
        assert_eq!(f.ledger.balance("bob").unwrap(), 250);
    }

    #[test]
    fn test_referrer_multiplier_applies() {
        let f = fixture(ReferralConfig::default(), &["alice", "bob"]);
        f.ledger
            .append(
                NewTransaction::new("alice", TransactionKind::Earn, 1_200, "purchase", "o1"),
                1,
            )
            .unwrap();
        let credit = f.processor.process("alice", "bob", 2, None).unwrap();
        // Silver: floor(500 * 1.25)
        assert_eq!(credit.referrer_transaction.points, 625);
    }

    #[test]
    fn test_resolve_code() {
        let f = fixture(ReferralConfig::default(), &["alice"]);
        assert_eq!(f.processor.resolve_code(" alice ").unwrap().id, "alice");
        assert!(matches!(
            f.processor.resolve_code("NOPE").unwrap_err(),
            LoyaltyError::InvalidReferral(ReferralRejection::UnknownCode)
        ));
    }

    #[test]
    fn test_rejections() {
        let f = fixture(ReferralConfig::default(), &["alice", "bob", "carol"]);
        assert_eq!(
            rejection(f.processor.process("alice", "alice", 1, None)),
            ReferralRejection::SelfReferral
        );

        f.processor.process("alice", "bob", 1, None).unwrap();
        assert_eq!(
            rejection(f.processor.process("carol", "bob", 2, None)),
            ReferralRejection::AlreadyReferred
        );

        f.members
            .set_status("carol", MemberStatus::Suspended, 3)
            .unwrap();
        assert_eq!(
            rejection(f.processor.process("carol", "alice", 4, None)),
            ReferralRejection::ReferrerInactive
        );
    }

    #[test]
    fn test_daily_and_total_limits() {
        let config = ReferralConfig {
            max_per_day: 1,
            max_total: 2,
            ..ReferralConfig::default()
        };
        let f = fixture(config, &["alice", "b1", "b2", "b3"]);

        f.processor.process("alice", "b1", 100, None).unwrap();
        assert_eq!(
            rejection(f.processor.process("alice", "b2", 200, None)),
            ReferralRejection::DailyLimitReached
        );

        // Next UTC day
        f.processor.process("alice", "b2", DAY_MS + 1, None).unwrap();
        assert_eq!(
            rejection(f.processor.process("alice", "b3", 2 * DAY_MS + 1, None)),
            ReferralRejection::TotalLimitReached
        );
    }

    #[test]
    fn test_program_window() {
        let config = ReferralConfig {
            valid_from: chrono::DateTime::from_timestamp_millis(1_000),
            valid_until: chrono::DateTime::from_timestamp_millis(2_000),
            ..ReferralConfig::default()
        };
        let f = fixture(config, &["alice", "bob"]);
        assert_eq!(
            rejection(f.processor.process("alice", "bob", 999, None)),
            ReferralRejection::ProgramNotStarted
        );
        assert_eq!(
            rejection(f.processor.process("alice", "bob", 2_000, None)),
            ReferralRejection::ProgramExpired
        );
        assert!(f.processor.process("alice", "bob", 1_500, None).is_ok());

        let inactive = fixture(
            ReferralConfig {
                active: false,
                ..ReferralConfig::default()
            },
            &["alice", "bob"],
        );
        assert_eq!(
            rejection(inactive.processor.process("alice", "bob", 1, None)),
            ReferralRejection::ProgramInactive
        );
    }

    #[test]
    fn test_invalid_window_config() {
        let config = ReferralConfig {
            valid_from: chrono::DateTime::from_timestamp_millis(2_000),
            valid_until: chrono::DateTime::from_timestamp_millis(1_000),
            ..ReferralConfig::default()
        };
        assert!(ReferralProgram::from_config(&config).is_err());
    }
}
