//! Engine settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime knobs for the engine and sweep job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Points credited once on enrollment
    #[serde(default = "default_welcome_bonus")]
    pub welcome_bonus: i64,

    /// How long a mutation waits for a member's lock before failing with Busy
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Internal retries on Busy before the error reaches the caller
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,

    /// Earned points expire this many days after they are credited.
    /// Unset means points never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_validity_days: Option<u32>,

    /// Seconds between sweep ticks when running `sweep --watch`
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Max transactions expired per sweep tick
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

fn default_welcome_bonus() -> i64 {
    100
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_busy_retries() -> u32 {
    3
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}

fn default_sweep_batch_size() -> usize {
    500
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            welcome_bonus: default_welcome_bonus(),
            lock_timeout_ms: default_lock_timeout_ms(),
            busy_retries: default_busy_retries(),
            points_validity_days: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl EngineSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
