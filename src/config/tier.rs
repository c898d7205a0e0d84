//! Tier configuration types

use serde::{Deserialize, Serialize};

/// One row of the tier table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub id: String,

    /// Display name
    pub name: String,

    /// Inclusive lower bound on lifetime points
    pub min_points: i64,

    /// Exclusive upper bound; only the last tier may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<i64>,

    /// Applied to raw earned points
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Bonus paid once when a member first enters this tier
    #[serde(default)]
    pub welcome_bonus: i64,
}

fn default_multiplier() -> f64 {
    1.0
}

/// Built-in tier ladder
pub fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            id: "bronze".to_string(),
            name: "Bronze".to_string(),
            min_points: 0,
            max_points: Some(1_000),
            multiplier: 1.0,
            welcome_bonus: 0,
        },
        TierConfig {
            id: "silver".to_string(),
            name: "Silver".to_string(),
            min_points: 1_000,
            max_points: Some(5_000),
            multiplier: 1.25,
            welcome_bonus: 50,
        },
        TierConfig {
            id: "gold".to_string(),
            name: "Gold".to_string(),
            min_points: 5_000,
            max_points: Some(20_000),
            multiplier: 1.5,
            welcome_bonus: 200,
        },
        TierConfig {
            id: "platinum".to_string(),
            name: "Platinum".to_string(),
            min_points: 20_000,
            max_points: None,
            multiplier: 2.0,
            welcome_bonus: 500,
        },
    ]
}
