//! Time-boxed challenges with progress tracking and leaderboards

mod catalog;
mod store;
mod tracker;

pub use catalog::{Challenge, ChallengeCatalog, ChallengeStatus};
pub use store::{ChallengeStore, Participation, SqliteChallenges};
pub use tracker::{
    CHALLENGE_SOURCE, ChallengeTracker, JoinOutcome, LeaderboardEntry, ProgressOutcome,
};
