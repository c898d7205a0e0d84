//! Reward catalog, stock inventory and redemption

use std::sync::Arc;

use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RewardConfig;
use crate::db::LoyaltyDb;
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::ledger::LedgerStore;
use crate::members::MemberStore;
use crate::models::{NewTransaction, Transaction, TransactionKind};
use crate::tiers::TierTable;

/// Source tag for redemptions
pub const REDEEM_SOURCE: &str = "reward";

/// A redeemable reward
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reward {
    pub id: String,
    pub name: String,
    pub points_cost: i64,
    /// Initial stock; `None` is unlimited
    pub stock: Option<u32>,
    pub allowed_tiers: Vec<String>,
}

impl Reward {
    pub fn allows_tier(&self, tier_id: &str) -> bool {
        self.allowed_tiers.is_empty() || self.allowed_tiers.iter().any(|t| t == tier_id)
    }
}

impl From<&RewardConfig> for Reward {
    fn from(config: &RewardConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            points_cost: config.points_cost,
            stock: config.stock,
            allowed_tiers: config.allowed_tiers.clone(),
        }
    }
}

/// Read-only reward definitions
#[derive(Debug, Clone, Default)]
pub struct RewardCatalog {
    rewards: Vec<Reward>,
}

impl RewardCatalog {
    pub fn new(configs: &[RewardConfig], tiers: &TierTable) -> LoyaltyResult<Self> {
        let mut rewards: Vec<Reward> = Vec::with_capacity(configs.len());
        for config in configs {
            if config.id.trim().is_empty() {
                return Err(LoyaltyError::Configuration(
                    "reward id must not be empty".to_string(),
                ));
            }
            if rewards.iter().any(|r| r.id == config.id) {
                return Err(LoyaltyError::Configuration(format!(
                    "duplicate reward id: {}",
                    config.id
                )));
            }
            if config.points_cost <= 0 {
                return Err(LoyaltyError::Configuration(format!(
                    "reward {} must cost a positive number of points",
                    config.id
                )));
            }
            if let Some(unknown) = config.allowed_tiers.iter().find(|t| tiers.get(t).is_none()) {
                return Err(LoyaltyError::Configuration(format!(
                    "reward {} allows unknown tier {}",
                    config.id, unknown
                )));
            }
            rewards.push(Reward::from(config));
        }
        Ok(Self { rewards })
    }

    pub fn get(&self, reward_id: &str) -> LoyaltyResult<&Reward> {
        self.rewards
            .iter()
            .find(|r| r.id == reward_id)
            .ok_or_else(|| LoyaltyError::RewardNotFound(reward_id.to_string()))
    }

    pub fn all(&self) -> &[Reward] {
        &self.rewards
    }
}

/// Remaining stock per limited reward, in `reward_stock`
#[derive(Clone)]
pub struct RewardInventory {
    db: LoyaltyDb,
}

impl RewardInventory {
    pub fn new(db: LoyaltyDb) -> Self {
        Self { db }
    }

    /// Create stock rows for limited rewards that have none yet. Existing
    /// rows keep their remaining count.
    pub fn seed(&self, catalog: &RewardCatalog, now: i64) -> LoyaltyResult<()> {
        let conn = self.db.conn();
        for reward in catalog.all() {
            if let Some(stock) = reward.stock {
                conn.execute(
                    "INSERT OR IGNORE INTO reward_stock (reward_id, remaining, updated_at) VALUES (?1, ?2, ?3)",
                    params![reward.id, i64::from(stock), now],
                )?;
            }
        }
        Ok(())
    }

    /// Remaining units; `None` means unlimited
    pub fn remaining(&self, reward: &Reward) -> LoyaltyResult<Option<i64>> {
        if reward.stock.is_none() {
            return Ok(None);
        }
        let conn = self.db.conn();
        let remaining = conn
            .query_row(
                "SELECT remaining FROM reward_stock WHERE reward_id = ?1",
                params![reward.id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(Some(remaining.unwrap_or(0)))
    }

    /// Take one unit. Returns `false` when none are left.
    pub fn reserve(&self, reward: &Reward, now: i64) -> LoyaltyResult<bool> {
        if reward.stock.is_none() {
            return Ok(true);
        }
        let conn = self.db.conn();
        let changed = conn.execute(
            r#"UPDATE reward_stock SET remaining = remaining - 1, updated_at = ?2
               WHERE reward_id = ?1 AND remaining > 0"#,
            params![reward.id, now],
        )?;
        Ok(changed > 0)
    }

    /// Return a reserved unit
    pub fn release(&self, reward: &Reward, now: i64) -> LoyaltyResult<()> {
        if reward.stock.is_none() {
            return Ok(());
        }
        let conn = self.db.conn();
        conn.execute(
            "UPDATE reward_stock SET remaining = remaining + 1, updated_at = ?2 WHERE reward_id = ?1",
            params![reward.id, now],
        )?;
        Ok(())
    }
}

/// Result of a redemption
#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub reward_id: String,
    pub transaction: Transaction,
    /// Opaque token handed to fulfillment
    pub fulfillment_token: String,
    /// Balance after the redemption
    pub balance: i64,
    pub duplicate: bool,
}

impl Redemption {
    fn from_existing(tx: Transaction, balance: i64) -> Self {
        let token = tx
            .metadata
            .get("fulfillment_token")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let reward_id = tx.source_id.clone().unwrap_or_default();
        Self {
            reward_id,
            transaction: tx,
            fulfillment_token: token,
            balance,
            duplicate: true,
        }
    }
}

/// Validates and books redemptions.
///
/// Callers must hold the member's lock.
pub struct RewardRedeemer {
    catalog: Arc<RewardCatalog>,
    inventory: RewardInventory,
    tiers: Arc<TierTable>,
    ledger: Arc<dyn LedgerStore>,
    members: Arc<dyn MemberStore>,
}

impl RewardRedeemer {
    pub fn new(
        catalog: Arc<RewardCatalog>,
        inventory: RewardInventory,
        tiers: Arc<TierTable>,
        ledger: Arc<dyn LedgerStore>,
        members: Arc<dyn MemberStore>,
    ) -> Self {
        Self {
            catalog,
            inventory,
            tiers,
            ledger,
            members,
        }
    }

    pub fn catalog(&self) -> &RewardCatalog {
        &self.catalog
    }

    pub fn inventory(&self) -> &RewardInventory {
        &self.inventory
    }

    pub fn redeem(
        &self,
        member_id: &str,
        reward_id: &str,
        dedup_key: Option<&str>,
        now: i64,
    ) -> LoyaltyResult<Redemption> {
        let member = self.members.require(member_id)?;
        if !member.is_active() {
            return Err(LoyaltyError::MemberInactive {
                member_id: member.id,
                status: member.status,
            });
        }

        // A retried redemption answers with the original booking
        if let Some(key) = dedup_key {
            if let Some(existing) = self.ledger.find_by_dedup_key(member_id, key)? {
                debug!(member_id, dedup_key = key, "Redemption already booked");
                let balance = self.ledger.balance(member_id)?;
                return Ok(Redemption::from_existing(existing, balance));
            }
        }

        let reward = self.catalog.get(reward_id)?;
        let tier_id = self
            .tiers
            .get(&member.tier_id)
            .map(|t| t.id.as_str())
            .unwrap_or(member.tier_id.as_str());
        if !reward.allows_tier(tier_id) {
            return Err(LoyaltyError::TierRestriction {
                reward_id: reward.id.clone(),
                tier_id: tier_id.to_string(),
            });
        }

        let balance = self.ledger.balance(member_id)?;
        if balance < reward.points_cost {
            return Err(LoyaltyError::InsufficientPoints {
                member_id: member_id.to_string(),
                balance,
                required: reward.points_cost,
                shortfall: reward.points_cost - balance,
            });
        }

        if !self.inventory.reserve(reward, now)? {
            return Err(LoyaltyError::OutOfStock {
                reward_id: reward.id.clone(),
            });
        }

        let token = Uuid::new_v4().to_string();
        let key = dedup_key
            .map(str::to_string)
            .unwrap_or_else(|| format!("redeem:{}", Uuid::new_v4()));
        let entry = NewTransaction::new(
            member_id,
            TransactionKind::Redeem,
            -reward.points_cost,
            REDEEM_SOURCE,
            key,
        )
        .source_id(reward.id.clone())
        .meta("reward_id", reward.id.clone())
        .meta("fulfillment_token", token.clone());

        let outcome = match self.ledger.append(entry, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inventory.release(reward, now)?;
                return Err(e);
            }
        };
        if outcome.is_duplicate() {
            self.inventory.release(reward, now)?;
            return Ok(Redemption::from_existing(
                outcome.into_transaction(),
                self.ledger.balance(member_id)?,
            ));
        }

        let balance = self.ledger.balance(member_id)?;
        info!(
            member_id,
            reward_id = %reward.id,
            cost = reward.points_cost,
            balance,
            "Reward redeemed"
        );
        Ok(Redemption {
            reward_id: reward.id.clone(),
            transaction: outcome.into_transaction(),
            fulfillment_token: token,
            balance,
            duplicate: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_rewards, default_tiers};
    use crate::ledger::SqliteLedger;
    use crate::members::SqliteMembers;
    use crate::models::{Member, MemberStatus};

    struct Fixture {
        redeemer: RewardRedeemer,
        ledger: Arc<dyn LedgerStore>,
        members: Arc<dyn MemberStore>,
    }

    fn fixture(rewards: Vec<RewardConfig>) -> Fixture {
        let db = LoyaltyDb::open_in_memory().unwrap();
        let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(db.clone()));
        let members: Arc<dyn MemberStore> = Arc::new(SqliteMembers::new(db.clone()));
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
        let tiers = Arc::new(TierTable::new(&default_tiers()).unwrap());
        let catalog = Arc::new(RewardCatalog::new(&rewards, &tiers).unwrap());
        let inventory = RewardInventory::new(db);
        inventory.seed(&catalog, 0).unwrap();
        Fixture {
            redeemer: RewardRedeemer::new(catalog, inventory, tiers, ledger.clone(), members.clone()),
            ledger,
            members,
        }
    }

    fn credit(f: &Fixture, points: i64) {
        f.ledger
            .append(
                NewTransaction::new("m1", TransactionKind::Earn, points, "purchase", "seed"),
                0,
            )
            .unwrap();
    }

    #[test]
    fn test_insufficient_points_changes_nothing() {
        let f = fixture(default_rewards());
        credit(&f, 100);
        let err = f.redeemer.redeem("m1", "coffee", None, 1).unwrap_err();
        match err {
            LoyaltyError::InsufficientPoints {
                balance,
                required,
                shortfall,
                ..
            } => {
                assert_eq!((balance, required, shortfall), (100, 150, 50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.ledger.balance("m1").unwrap(), 100);
        assert_eq!(f.ledger.transactions("m1").unwrap().len(), 1);
    }

    #[test]
    fn test_redeem_books_negative_transaction() {
        let f = fixture(default_rewards());
        credit(&f, 1_000);
        let r = f.redeemer.redeem("m1", "tote-bag", Some("order-9"), 1).unwrap();
        assert!(!r.duplicate);
        assert_eq!(r.transaction.points, -800);
        assert_eq!(r.balance, 200);
        assert!(Uuid::parse_str(&r.fulfillment_token).is_ok());

        let tote = f.redeemer.catalog().get("tote-bag").unwrap();
        assert_eq!(f.redeemer.inventory().remaining(tote).unwrap(), Some(199));

        // Retried with the same key: same token, no second charge
        let again = f.redeemer.redeem("m1", "tote-bag", Some("order-9"), 2).unwrap();
        assert!(again.duplicate);
        assert_eq!(again.fulfillment_token, r.fulfillment_token);
        assert_eq!(again.balance, 200);
        assert_eq!(f.redeemer.inventory().remaining(tote).unwrap(), Some(199));
    }

    #[test]
    fn test_tier_restriction() {
        let f = fixture(default_rewards());
        credit(&f, 10_000);
        let err = f.redeemer.redeem("m1", "lounge-pass", None, 1).unwrap_err();
        assert!(matches!(err, LoyaltyError::TierRestriction { .. }));

        f.members.set_tier("m1", "gold", 2).unwrap();
        assert!(f.redeemer.redeem("m1", "lounge-pass", None, 3).is_ok());
    }

    #[test]
    fn test_out_of_stock() {
        let f = fixture(vec![RewardConfig {
            id: "rare".to_string(),
            name: "Rare".to_string(),
            points_cost: 10,
            stock: Some(1),
            allowed_tiers: vec![],
        }]);
        credit(&f, 100);
        f.redeemer.redeem("m1", "rare", None, 1).unwrap();
        let err = f.redeemer.redeem("m1", "rare", None, 2).unwrap_err();
        assert!(matches!(err, LoyaltyError::OutOfStock { .. }));
        assert_eq!(f.ledger.balance("m1").unwrap(), 90);
    }

    #[test]
    fn test_inactive_member_cannot_redeem() {
        let f = fixture(default_rewards());
        credit(&f, 1_000);
        f.members.set_status("m1", MemberStatus::Inactive, 1).unwrap();
        assert!(matches!(
            f.redeemer.redeem("m1", "coffee", None, 2).unwrap_err(),
            LoyaltyError::MemberInactive { .. }
        ));
        assert!(matches!(
            f.redeemer.redeem("ghost", "coffee", None, 2).unwrap_err(),
            LoyaltyError::MemberNotFound(_)
        ));
    }
}
