//! Achievement configuration types

use serde::{Deserialize, Serialize};

use crate::achievements::{Criteria, Rarity};

/// Achievement definition as written in config.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementConfig {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Unlock condition, e.g. `{ type = "count", event = "purchase", threshold = 10 }`
    pub criteria: Criteria,

    pub points_reward: i64,

    #[serde(default)]
    pub rarity: Rarity,
}
