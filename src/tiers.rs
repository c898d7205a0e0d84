//! Membership tiers
//!
//! Tiers are resolved from lifetime points against a validated, contiguous
//! tier table. Promotion pays each tier's welcome bonus at most once.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::TierConfig;
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::ledger::LedgerStore;
use crate::members::MemberStore;
use crate::models::{NewTransaction, Transaction, TransactionKind};

/// Source tag for tier welcome bonuses
pub const TIER_BONUS_SOURCE: &str = "tier.welcome";

/// Tier definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tier {
    pub id: String,
    pub name: String,
    pub min_points: i64,
    pub max_points: Option<i64>,
    pub multiplier: f64,
    pub welcome_bonus: i64,
}

impl Tier {
    pub fn contains(&self, lifetime_points: i64) -> bool {
        lifetime_points >= self.min_points && self.max_points.is_none_or(|max| lifetime_points < max)
    }
}

impl From<&TierConfig> for Tier {
    fn from(config: &TierConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            min_points: config.min_points,
            max_points: config.max_points,
            multiplier: config.multiplier,
            welcome_bonus: config.welcome_bonus,
        }
    }
}

/// Validated tier ladder (sorted, contiguous, unbounded at the top)
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: Vec<Tier>,
}

impl TierTable {
    pub fn new(configs: &[TierConfig]) -> LoyaltyResult<Self> {
        let tiers: Vec<Tier> = configs.iter().map(Tier::from).collect();
        Self::check(&tiers)?;
        Ok(Self { tiers })
    }

    fn check(tiers: &[Tier]) -> LoyaltyResult<()> {
        let err = |msg: String| Err(LoyaltyError::Configuration(msg));

        let Some(first) = tiers.first() else {
            return err("tier table is empty".to_string());
        };
        if first.min_points != 0 {
            return err(format!("first tier {} must start at 0", first.id));
        }

        for (i, tier) in tiers.iter().enumerate() {
            if tier.id.trim().is_empty() {
                return err("tier id must not be empty".to_string());
            }
            if tiers[..i].iter().any(|t| t.id == tier.id) {
                return err(format!("duplicate tier id: {}", tier.id));
            }
            if !(tier.multiplier.is_finite() && tier.multiplier > 0.0) {
                return err(format!("tier {} has invalid multiplier {}", tier.id, tier.multiplier));
            }
            if tier.welcome_bonus < 0 {
                return err(format!("tier {} has a negative welcome bonus", tier.id));
            }

            match (tier.max_points, tiers.get(i + 1)) {
                (Some(max), Some(next)) => {
                    if max <= tier.min_points {
                        return err(format!("tier {} has an empty range", tier.id));
                    }
                    if next.min_points != max {
                        return err(format!(
                            "tiers {} and {} are not contiguous ({} != {})",
                            tier.id, next.id, max, next.min_points
                        ));
                    }
                }
                (None, Some(next)) => {
                    return err(format!(
                        "tier {} has no upper bound but is followed by {}",
                        tier.id, next.id
                    ));
                }
                (Some(_), None) => {
                    return err(format!("last tier {} must have no upper bound", tier.id));
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    /// Re-run the table checks (used by the sweep job)
    pub fn verify(&self) -> LoyaltyResult<()> {
        Self::check(&self.tiers)
    }

    /// Tier whose range contains `lifetime_points`
    pub fn resolve(&self, lifetime_points: i64) -> LoyaltyResult<&Tier> {
        if lifetime_points < 0 {
            return Err(LoyaltyError::Configuration(format!(
                "negative lifetime points: {lifetime_points}"
            )));
        }
        self.tiers
            .iter()
            .rev()
            .find(|t| lifetime_points >= t.min_points)
            .ok_or_else(|| {
                LoyaltyError::Configuration(format!("no tier covers {lifetime_points} points"))
            })
    }

    /// Entry tier for new members
    pub fn base(&self) -> &Tier {
        &self.tiers[0]
    }

    pub fn get(&self, tier_id: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.id == tier_id)
    }

    /// Position in the ladder, 0 for the base tier
    pub fn rank(&self, tier_id: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.id == tier_id)
    }

    /// Next tier up (None at the top)
    pub fn next(&self, tier_id: &str) -> Option<&Tier> {
        self.rank(tier_id).and_then(|i| self.tiers.get(i + 1))
    }

    /// `floor(raw_points * multiplier)`
    pub fn apply_multiplier(&self, tier: &Tier, raw_points: i64) -> i64 {
        (raw_points as f64 * tier.multiplier).floor() as i64
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}

/// A stored tier change produced by promotion
#[derive(Debug, Clone)]
pub struct TierChange {
    pub member_id: String,
    pub from: String,
    pub to: String,
    /// Welcome bonus paid for entering `to`, if any
    pub bonus: Option<Transaction>,
}

/// Keeps stored tiers in line with lifetime points.
///
/// Callers must hold the member's lock.
pub struct TierEngine {
    table: Arc<TierTable>,
    ledger: Arc<dyn LedgerStore>,
    members: Arc<dyn MemberStore>,
}

impl TierEngine {
    pub fn new(
        table: Arc<TierTable>,
        ledger: Arc<dyn LedgerStore>,
        members: Arc<dyn MemberStore>,
    ) -> Self {
        Self {
            table,
            ledger,
            members,
        }
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    /// Re-resolve the member's tier after a lifetime change.
    ///
    /// Each pass jumps straight to the highest reachable tier. Entering a
    /// higher tier pays that tier's welcome bonus (dedup per member and tier),
    /// which may lift lifetime points into yet another tier; passes stop once
    /// the tier no longer rises.
    pub fn check_and_promote(&self, member_id: &str, now: i64) -> LoyaltyResult<Vec<TierChange>> {
        let member = self.members.require(member_id)?;
        let mut current = member.tier_id;
        let mut lifetime = self.ledger.lifetime_points(member_id)?;
        let mut changes = Vec::new();

        loop {
            let resolved = self.table.resolve(lifetime)?;
            if resolved.id == current {
                break;
            }

            self.members.set_tier(member_id, &resolved.id, now)?;
            let rising = match (self.table.rank(&current), self.table.rank(&resolved.id)) {
                (Some(old), Some(new)) => new > old,
                // Stored tier no longer exists in config
                (None, _) => {
                    warn!(member_id, tier = %current, "Stored tier missing from tier table");
                    true
                }
                (_, None) => false,
            };

            let bonus = if rising {
                self.pay_welcome_bonus(member_id, resolved, now)?
            } else {
                None
            };
            info!(
                member_id,
                from = %current,
                to = %resolved.id,
                lifetime,
                "Tier changed"
            );

            let paid = bonus.as_ref().map(|tx| tx.points).unwrap_or(0);
            changes.push(TierChange {
                member_id: member_id.to_string(),
                from: std::mem::replace(&mut current, resolved.id.clone()),
                to: resolved.id.clone(),
                bonus,
            });

            if !rising || paid == 0 {
                break;
            }
            lifetime += paid;
        }

        Ok(changes)
    }

    /// Pay the tier's welcome bonus once. Returns the transaction only when it
    /// was newly appended.
    pub fn pay_welcome_bonus(
        &self,
        member_id: &str,
        tier: &Tier,
        now: i64,
    ) -> LoyaltyResult<Option<Transaction>> {
        if tier.welcome_bonus <= 0 {
            return Ok(None);
        }
        let entry = NewTransaction::new(
            member_id,
            TransactionKind::Bonus,
            tier.welcome_bonus,
            TIER_BONUS_SOURCE,
            format!("tier-bonus:{member_id}:{}", tier.id),
        )
        .source_id(tier.id.clone());

        let outcome = self.ledger.append(entry, now)?;
        if outcome.is_duplicate() {
            return Ok(None);
        }
        Ok(Some(outcome.into_transaction()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tiers;
    use crate::db::LoyaltyDb;
    use crate::ledger::SqliteLedger;
    use crate::members::SqliteMembers;
    use crate::models::{Member, MemberStatus};

    fn table() -> TierTable {
        TierTable::new(&default_tiers()).unwrap()
    }

    #[test]
    fn test_resolve_boundaries() {
        let t = table();
        assert_eq!(t.resolve(0).unwrap().id, "bronze");
        assert_eq!(t.resolve(999).unwrap().id, "bronze");
        assert_eq!(t.resolve(1_000).unwrap().id, "silver");
        assert_eq!(t.resolve(19_999).unwrap().id, "gold");
        assert_eq!(t.resolve(1_000_000).unwrap().id, "platinum");
        assert!(matches!(
            t.resolve(-1).unwrap_err(),
            LoyaltyError::Configuration(_)
        ));
    }

    #[test]
    fn test_resolve_agrees_with_contains() {
        let t = table();
        for points in [0, 1, 999, 1_000, 4_999, 5_000, 20_000, 123_456] {
            let tier = t.resolve(points).unwrap();
            assert!(tier.contains(points));
            assert_eq!(t.tiers().iter().filter(|x| x.contains(points)).count(), 1);
        }
    }

    #[test]
    fn test_apply_multiplier_floors() {
        let t = table();
        let silver = t.get("silver").unwrap();
        assert_eq!(t.apply_multiplier(silver, 10), 12);
        assert_eq!(t.apply_multiplier(t.base(), 7), 7);
        assert_eq!(t.apply_multiplier(t.get("gold").unwrap(), 3), 4);
    }

    #[test]
    fn test_table_validation() {
        let mut overlapping = default_tiers();
        overlapping[1].min_points = 900;
        assert!(TierTable::new(&overlapping).is_err());

        let mut bounded_top = default_tiers();
        bounded_top[3].max_points = Some(50_000);
        assert!(TierTable::new(&bounded_top).is_err());

        let mut zero_multiplier = default_tiers();
        zero_multiplier[0].multiplier = 0.0;
        assert!(TierTable::new(&zero_multiplier).is_err());

        assert!(TierTable::new(&[]).is_err());
        assert_eq!(table().next("gold").unwrap().id, "platinum");
        assert!(table().next("platinum").is_none());
    }

    fn engine_with_member() -> (TierEngine, Arc<dyn LedgerStore>, Arc<dyn MemberStore>) {
        let db = LoyaltyDb::open_in_memory().unwrap();
        let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(db.clone()));
        let members: Arc<dyn MemberStore> = Arc::new(SqliteMembers::new(db));
        members
            .insert(&Member {
                id: "m1".to_string(),
                user_id: "u1".to_string(),
                tier_id: "bronze".to_string(),
                referral_code: "CODE1".to_string(),
                status: MemberStatus::Active,
                preferences: serde_json::json!({}),
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        let engine = TierEngine::new(Arc::new(table()), ledger.clone(), members.clone());
        (engine, ledger, members)
    }

    fn earn(points: i64, key: &str) -> NewTransaction {
        NewTransaction::new("m1", TransactionKind::Earn, points, "purchase", key)
    }

    #[test]
    fn test_promotion_pays_bonus_once() {
        let (engine, ledger, members) = engine_with_member();
        ledger.append(earn(900, "a"), 1).unwrap();
        assert!(engine.check_and_promote("m1", 1).unwrap().is_empty());

        ledger.append(earn(150, "b"), 2).unwrap();
        let changes = engine.check_and_promote("m1", 2).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, "silver");
        assert_eq!(changes[0].bonus.as_ref().unwrap().points, 50);

        assert_eq!(ledger.balance("m1").unwrap(), 1_100);
        assert_eq!(members.get("m1").unwrap().unwrap().tier_id, "silver");

        // Re-running is a no-op
        assert!(engine.check_and_promote("m1", 3).unwrap().is_empty());
        assert_eq!(ledger.balance("m1").unwrap(), 1_100);
    }

    #[test]
    fn test_jump_skips_intermediate_bonuses() {
        let (engine, ledger, _) = engine_with_member();
        ledger.append(earn(6_000, "big"), 1).unwrap();

        let changes = engine.check_and_promote("m1", 1).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, "bronze");
        assert_eq!(changes[0].to, "gold");
        // Only gold's bonus, not silver's
        assert_eq!(ledger.balance("m1").unwrap(), 6_200);
    }

    #[test]
    fn test_bonus_can_cascade_into_next_tier() {
        let (engine, ledger, members) = engine_with_member();
        // 4_990 -> silver; silver bonus of 50 lifts lifetime to 5_040 -> gold
        ledger.append(earn(4_990, "a"), 1).unwrap();

        let changes = engine.check_and_promote("m1", 1).unwrap();
        let path: Vec<_> = changes.iter().map(|c| c.to.as_str()).collect();
        assert_eq!(path, ["silver", "gold"]);
        assert_eq!(ledger.lifetime_points("m1").unwrap(), 4_990 + 50 + 200);
        assert_eq!(members.get("m1").unwrap().unwrap().tier_id, "gold");
        assert_eq!(
            engine.table().resolve(ledger.lifetime_points("m1").unwrap()).unwrap().id,
            "gold"
        );
    }
}
