//! Achievement definitions and metadata
//!
//! Definitions come from configuration; [`default_achievements`] is the
//! built-in set written by `loyalty init`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::AchievementConfig;
use crate::error::{LoyaltyError, LoyaltyResult};

/// How rare an achievement is, for display grouping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
        }
    }
}

/// Unlock condition evaluated against recorded activity events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criteria {
    /// At least `threshold` events of this type
    Count {
        event: String,
        threshold: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_days: Option<u32>,
    },
    /// A single event whose value is at least `threshold`
    SingleValue {
        event: String,
        threshold: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_days: Option<u32>,
    },
    /// Event values summing to at least `threshold`
    TotalValue {
        event: String,
        threshold: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_days: Option<u32>,
    },
}

impl Criteria {
    /// Event type this criterion listens to
    pub fn event(&self) -> &str {
        match self {
            Self::Count { event, .. }
            | Self::SingleValue { event, .. }
            | Self::TotalValue { event, .. } => event,
        }
    }

    pub fn window_days(&self) -> Option<u32> {
        match self {
            Self::Count { window_days, .. }
            | Self::SingleValue { window_days, .. }
            | Self::TotalValue { window_days, .. } => *window_days,
        }
    }
}

/// Achievement definition with all metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub criteria: Criteria,
    pub points_reward: i64,
    pub rarity: Rarity,
}

impl From<&AchievementConfig> for Achievement {
    fn from(config: &AchievementConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            criteria: config.criteria.clone(),
            points_reward: config.points_reward,
            rarity: config.rarity,
        }
    }
}

/// Validated, read-only set of achievement definitions
#[derive(Debug, Clone, Default)]
pub struct AchievementCatalog {
    achievements: Vec<Achievement>,
    by_event: HashMap<String, Vec<usize>>,
}

impl AchievementCatalog {
    pub fn new(configs: &[AchievementConfig]) -> LoyaltyResult<Self> {
        let mut achievements: Vec<Achievement> = Vec::with_capacity(configs.len());
        let mut by_event: HashMap<String, Vec<usize>> = HashMap::new();

        for config in configs {
            if config.id.trim().is_empty() {
                return Err(LoyaltyError::Configuration(
                    "achievement id must not be empty".to_string(),
                ));
            }
            if achievements.iter().any(|a| a.id == config.id) {
                return Err(LoyaltyError::Configuration(format!(
                    "duplicate achievement id: {}",
                    config.id
                )));
            }
            if config.points_reward < 0 {
                return Err(LoyaltyError::Configuration(format!(
                    "achievement {} has a negative reward",
                    config.id
                )));
            }
            let threshold_ok = match &config.criteria {
                Criteria::Count { threshold, .. } => *threshold > 0,
                Criteria::SingleValue { threshold, .. } | Criteria::TotalValue { threshold, .. } => {
                    *threshold > 0
                }
            };
            if !threshold_ok {
                return Err(LoyaltyError::Configuration(format!(
                    "achievement {} needs a positive threshold",
                    config.id
                )));
            }

            by_event
                .entry(config.criteria.event().to_string())
                .or_default()
                .push(achievements.len());
            achievements.push(Achievement::from(config));
        }

        Ok(Self {
            achievements,
            by_event,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Achievement> {
        self.achievements.iter().find(|a| a.id == id)
    }

    /// Achievements whose criteria reference `event_type`
    pub fn for_event(&self, event_type: &str) -> Vec<&Achievement> {
        self.by_event
            .get(event_type)
            .map(|idx| idx.iter().map(|&i| &self.achievements[i]).collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> &[Achievement] {
        &self.achievements
    }

    pub fn len(&self) -> usize {
        self.achievements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty()
    }
}

fn achievement(
    id: &str,
    name: &str,
    description: &str,
    criteria: Criteria,
    points_reward: i64,
    rarity: Rarity,
) -> AchievementConfig {
    AchievementConfig {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        criteria,
        points_reward,
        rarity,
    }
}

/// Built-in achievements
pub fn default_achievements() -> Vec<AchievementConfig> {
    let count = |event: &str, threshold: u64, window_days: Option<u32>| Criteria::Count {
        event: event.to_string(),
        threshold,
        window_days,
    };

    vec![
        // === PURCHASES ===
        achievement(
            "first_purchase",
            "First Steps",
            "Complete your first purchase",
            count("purchase", 1, None),
            25,
            Rarity::Common,
        ),
        achievement(
            "regular",
            "Regular",
            "Complete 10 purchases",
            count("purchase", 10, None),
            100,
            Rarity::Uncommon,
        ),
        achievement(
            "big_spender",
            "Big Spender",
            "Earn 500 points from a single purchase",
            Criteria::SingleValue {
                event: "purchase".to_string(),
                threshold: 500,
                window_days: None,
            },
            150,
            Rarity::Rare,
        ),
        achievement(
            "high_roller",
            "High Roller",
            "Earn 10,000 points from purchases",
            Criteria::TotalValue {
                event: "purchase".to_string(),
                threshold: 10_000,
                window_days: None,
            },
            1_000,
            Rarity::Legendary,
        ),
        // === SOCIAL ===
        achievement(
            "social_butterfly",
            "Social Butterfly",
            "Share 5 times within 30 days",
            count("share", 5, Some(30)),
            50,
            Rarity::Uncommon,
        ),
        // === REFERRALS ===
        achievement(
            "first_referral",
            "Word of Mouth",
            "Refer your first friend",
            count("referral", 1, None),
            50,
            Rarity::Common,
        ),
        achievement(
            "ambassador",
            "Ambassador",
            "Refer 10 friends",
            count("referral", 10, None),
            500,
            Rarity::Epic,
        ),
    ]
}
