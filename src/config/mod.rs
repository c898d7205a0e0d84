//! Configuration loading and management

mod achievement;
mod challenge;
mod engine;
mod io;
mod referral;
mod reward;
mod tier;

pub use achievement::AchievementConfig;
pub use challenge::ChallengeConfig;
pub use engine::EngineSettings;
pub use referral::ReferralConfig;
pub use reward::{RewardConfig, default_rewards};
pub use tier::{TierConfig, default_tiers};

use serde::{Deserialize, Serialize};

use crate::achievements::{AchievementCatalog, default_achievements};
use crate::challenges::ChallengeCatalog;
use crate::error::{LoyaltyError, LoyaltyResult};
use crate::referral::ReferralProgram;
use crate::rewards::RewardCatalog;
use crate::tiers::TierTable;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyConfig {
    /// Engine and sweep settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Tier ladder, ascending by `min_points`
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,

    /// Referral program rules
    #[serde(default)]
    pub referral: ReferralConfig,

    #[serde(default)]
    pub achievements: Vec<AchievementConfig>,

    #[serde(default)]
    pub challenges: Vec<ChallengeConfig>,

    #[serde(default)]
    pub rewards: Vec<RewardConfig>,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            tiers: default_tiers(),
            referral: ReferralConfig::default(),
            achievements: Vec::new(),
            challenges: Vec::new(),
            rewards: Vec::new(),
        }
    }
}

impl LoyaltyConfig {
    /// Create a config with the built-in achievements and starter rewards
    pub fn with_defaults() -> Self {
        Self {
            achievements: default_achievements(),
            rewards: default_rewards(),
            ..Self::default()
        }
    }

    /// Check every definition table. The engine refuses to start on failure.
    pub fn validate(&self) -> LoyaltyResult<()> {
        if self.engine.welcome_bonus < 0 {
            return Err(LoyaltyError::Configuration(
                "engine.welcome_bonus must not be negative".to_string(),
            ));
        }
        if self.engine.points_validity_days == Some(0) {
            return Err(LoyaltyError::Configuration(
                "engine.points_validity_days must be at least 1".to_string(),
            ));
        }

        let tiers = TierTable::new(&self.tiers)?;
        AchievementCatalog::new(&self.achievements)?;
        ChallengeCatalog::new(&self.challenges)?;
        RewardCatalog::new(&self.rewards, &tiers)?;
        ReferralProgram::from_config(&self.referral)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        LoyaltyConfig::default().validate().unwrap();
        LoyaltyConfig::with_defaults().validate().unwrap();
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: LoyaltyConfig = toml::from_str("").unwrap();
        assert_eq!(config.tiers, default_tiers());
        assert_eq!(config.engine.welcome_bonus, 100);
        assert!(config.referral.active);
        assert!(config.achievements.is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let config: LoyaltyConfig = toml::from_str(
            r#"
            [engine]
            welcome_bonus = 0
            points_validity_days = 365

            [referral]
            max_per_day = 2
            valid_until = "2030-01-01T00:00:00Z"

            [[rewards]]
            id = "mug"
            name = "Mug"
            points_cost = 300
            stock = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.welcome_bonus, 0);
        assert_eq!(config.engine.points_validity_days, Some(365));
        assert_eq!(config.engine.busy_retries, 3);
        assert_eq!(config.referral.max_per_day, 2);
        assert_eq!(config.referral.referrer_reward, 500);
        assert!(config.referral.valid_until.is_some());
        assert_eq!(config.rewards[0].stock, Some(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_gapped_tiers() {
        let mut config = LoyaltyConfig::default();
        config.tiers[1].min_points = 1_500;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LoyaltyError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_unknown_reward_tier() {
        let mut config = LoyaltyConfig::with_defaults();
        config.rewards[0].allowed_tiers = vec!["diamond".to_string()];
        assert!(config.validate().is_err());
    }
}
