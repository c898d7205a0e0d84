//! Challenge configuration types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Time-boxed challenge definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub starts_at: DateTime<Utc>,

    /// Exclusive end of the active window
    pub ends_at: DateTime<Utc>,

    /// Progress required to complete
    pub target: i64,

    pub points_reward: i64,

    /// Optional badge shown on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}
