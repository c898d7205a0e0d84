//! Shared test utilities for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use loyalty_engine::config::{ChallengeConfig, RewardConfig};
use loyalty_engine::{LoyaltyConfig, LoyaltyDb, LoyaltyService, ManualClock};

/// 2023-11-14T22:13:20Z
pub const START_MS: i64 = 1_700_000_000_000;
pub const DAY_MS: i64 = loyalty_engine::clock::DAY_MS;

/// An engine on a throwaway SQLite file with a pinned clock
pub struct TestEngine {
    pub service: Arc<LoyaltyService>,
    pub clock: ManualClock,
    pub db: LoyaltyDb,
    _dir: TempDir,
}

/// Default tiers, no welcome bonus, no achievements and one 150-point reward
pub fn test_config() -> LoyaltyConfig {
    let mut config = LoyaltyConfig::default();
    config.engine.welcome_bonus = 0;
    config.rewards = vec![RewardConfig {
        id: "coffee".to_string(),
        name: "Coffee".to_string(),
        points_cost: 150,
        stock: None,
        allowed_tiers: vec![],
    }];
    config
}

/// A challenge open for the first 30 days after `START_MS`
pub fn challenge(id: &str, target: i64, points_reward: i64) -> ChallengeConfig {
    ChallengeConfig {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        starts_at: chrono::DateTime::from_timestamp_millis(START_MS).expect("valid start"),
        ends_at: chrono::DateTime::from_timestamp_millis(START_MS + 30 * DAY_MS)
            .expect("valid end"),
        target,
        points_reward,
        badge: None,
    }
}

pub fn engine() -> TestEngine {
    engine_with(&test_config())
}

pub fn engine_with(config: &LoyaltyConfig) -> TestEngine {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = LoyaltyDb::open(&dir.path().join("ledger.db")).expect("Failed to open ledger db");
    let clock = ManualClock::new(START_MS);
    let service = LoyaltyService::new(config, db.clone(), Arc::new(clock.clone()))
        .expect("Failed to build service");

    TestEngine {
        service: Arc::new(service),
        clock,
        db,
        _dir: dir,
    }
}

impl TestEngine {
    /// Enroll a user and return the member id
    pub fn enroll(&self, user_id: &str) -> String {
        self.service
            .enroll(user_id, None)
            .expect("Failed to enroll")
            .member
            .id
    }

    pub fn balance(&self, member_id: &str) -> i64 {
        self.service
            .get_balance(member_id)
            .expect("Failed to read balance")
            .balance
    }

    pub fn referral_code(&self, member_id: &str) -> String {
        self.service
            .member(member_id)
            .expect("Failed to load member")
            .referral_code
    }
}
