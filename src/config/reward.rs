//! Reward catalog configuration

use serde::{Deserialize, Serialize};

/// A redeemable reward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub id: String,

    pub name: String,

    pub points_cost: i64,

    /// Initial stock; unset means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<u32>,

    /// Tier ids allowed to redeem; empty means every tier
    #[serde(default)]
    pub allowed_tiers: Vec<String>,
}

/// Starter catalog written by `loyalty init`
pub fn default_rewards() -> Vec<RewardConfig> {
    vec![
        RewardConfig {
            id: "coffee".to_string(),
            name: "Free coffee".to_string(),
            points_cost: 150,
            stock: None,
            allowed_tiers: vec![],
        },
        RewardConfig {
            id: "tote-bag".to_string(),
            name: "Canvas tote bag".to_string(),
            points_cost: 800,
            stock: Some(200),
            allowed_tiers: vec![],
        },
        RewardConfig {
            id: "lounge-pass".to_string(),
            name: "Airport lounge pass".to_string(),
            points_cost: 4_000,
            stock: Some(25),
            allowed_tiers: vec!["gold".to_string(), "platinum".to_string()],
        },
    ]
}
