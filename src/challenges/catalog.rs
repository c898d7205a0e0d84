//! Challenge definitions

use serde::Serialize;

use crate::config::ChallengeConfig;
use crate::error::{LoyaltyError, LoyaltyResult};

/// Global state of a challenge, derived from the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Upcoming,
    Active,
    /// Ended with at least one participant completing
    Completed,
    /// Ended with nobody completing
    Expired,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Challenge definition. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Challenge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub target: i64,
    pub points_reward: i64,
    pub badge: Option<String>,
}

impl Challenge {
    /// Active window is `[starts_at, ends_at)`
    pub fn is_open(&self, now: i64) -> bool {
        now >= self.starts_at && now < self.ends_at
    }

    /// Status given whether anyone has completed it
    pub fn status(&self, now: i64, any_completed: bool) -> ChallengeStatus {
        if now < self.starts_at {
            ChallengeStatus::Upcoming
        } else if now < self.ends_at {
            ChallengeStatus::Active
        } else if any_completed {
            ChallengeStatus::Completed
        } else {
            ChallengeStatus::Expired
        }
    }
}

impl From<&ChallengeConfig> for Challenge {
    fn from(config: &ChallengeConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            starts_at: config.starts_at.timestamp_millis(),
            ends_at: config.ends_at.timestamp_millis(),
            target: config.target,
            points_reward: config.points_reward,
            badge: config.badge.clone(),
        }
    }
}

/// Read-only set of challenges
#[derive(Debug, Clone, Default)]
pub struct ChallengeCatalog {
    challenges: Vec<Challenge>,
}

impl ChallengeCatalog {
    pub fn new(configs: &[ChallengeConfig]) -> LoyaltyResult<Self> {
        let mut challenges: Vec<Challenge> = Vec::with_capacity(configs.len());
        for config in configs {
            let challenge = Challenge::from(config);
            let invalid = |msg: &str| {
                Err(LoyaltyError::Configuration(format!(
                    "challenge {}: {msg}",
                    challenge.id
                )))
            };

            if challenge.id.trim().is_empty() {
                return invalid("id must not be empty");
            }
            if challenges.iter().any(|c| c.id == challenge.id) {
                return invalid("duplicate id");
            }
            if challenge.starts_at >= challenge.ends_at {
                return invalid("starts_at must be before ends_at");
            }
            if challenge.target <= 0 {
                return invalid("target must be positive");
            }
            if challenge.points_reward < 0 {
                return invalid("points_reward must not be negative");
            }
            challenges.push(challenge);
        }
        Ok(Self { challenges })
    }

    pub fn get(&self, challenge_id: &str) -> LoyaltyResult<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.id == challenge_id)
            .ok_or_else(|| LoyaltyError::ChallengeNotFound(challenge_id.to_string()))
    }

    pub fn all(&self) -> &[Challenge] {
        &self.challenges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn config(id: &str, start: i64, end: i64, target: i64) -> ChallengeConfig {
        ChallengeConfig {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            starts_at: DateTime::from_timestamp_millis(start).unwrap(),
            ends_at: DateTime::from_timestamp_millis(end).unwrap(),
            target,
            points_reward: 100,
            badge: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        let catalog = ChallengeCatalog::new(&[config("c1", 1_000, 2_000, 10)]).unwrap();
        let c = catalog.get("c1").unwrap();
        assert_eq!(c.status(999, false), ChallengeStatus::Upcoming);
        assert_eq!(c.status(1_000, false), ChallengeStatus::Active);
        assert_eq!(c.status(1_999, true), ChallengeStatus::Active);
        assert_eq!(c.status(2_000, true), ChallengeStatus::Completed);
        assert_eq!(c.status(2_000, false), ChallengeStatus::Expired);
    }

    #[test]
    fn test_validation() {
        assert!(ChallengeCatalog::new(&[config("c1", 2_000, 1_000, 10)]).is_err());
        assert!(ChallengeCatalog::new(&[config("c1", 1_000, 2_000, 0)]).is_err());
        assert!(
            ChallengeCatalog::new(&[config("c1", 0, 1, 1), config("c1", 0, 1, 1)]).is_err()
        );
        let catalog = ChallengeCatalog::new(&[]).unwrap();
        assert!(matches!(
            catalog.get("missing").unwrap_err(),
            LoyaltyError::ChallengeNotFound(_)
        ));
    }
}
