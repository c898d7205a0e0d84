//! Referral program configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Referral program rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    #[serde(default = "default_active")]
    pub active: bool,

    /// Base reward for the referrer, before their tier multiplier
    #[serde(default = "default_referrer_reward")]
    pub referrer_reward: i64,

    #[serde(default = "default_referee_reward")]
    pub referee_reward: i64,

    /// Credited referrals per referrer per UTC day
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,

    /// Credited referrals per referrer, ever
    #[serde(default = "default_max_total")]
    pub max_total: u32,

    /// Start of the validity window (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window, exclusive (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

fn default_referrer_reward() -> i64 {
    500
}

fn default_referee_reward() -> i64 {
    250
}

fn default_max_per_day() -> u32 {
    5
}

fn default_max_total() -> u32 {
    50
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            active: default_active(),
            referrer_reward: default_referrer_reward(),
            referee_reward: default_referee_reward(),
            max_per_day: default_max_per_day(),
            max_total: default_max_total(),
            valid_from: None,
            valid_until: None,
        }
    }
}
