//! Achievements: definitions, criteria checks and the unlock engine

mod checker;
mod definitions;
mod engine;
mod records;

pub use definitions::{Achievement, AchievementCatalog, Criteria, Rarity, default_achievements};
pub use engine::{
    ACHIEVEMENT_SOURCE, AchievementEngine, AchievementProgress, AwardOutcome, UnlockedAchievement,
};
pub use records::{AchievementRecords, AchievementUnlock, ActivityEvent, EventStats};
