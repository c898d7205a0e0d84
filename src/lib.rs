//! Loyalty points ledger and rules engine
//!
//! Awards and redeems points on an append-only ledger, keeps membership tiers
//! in line with lifetime points, unlocks achievements, credits referrals and
//! tracks challenges. [`LoyaltyService`] is the entry point; everything below
//! it is exposed for embedding and testing.
//!
//! ## Guarantees
//!
//! - A member's balance always equals the sum of their non-expired
//!   transactions, and never goes negative.
//! - Every transaction carries a dedup key unique per member, so retried
//!   operations are safe.
//! - Mutations for one member are serialized; different members proceed in
//!   parallel.

pub mod achievements;
pub mod challenges;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod members;
pub mod models;
pub mod referral;
pub mod rewards;
pub mod service;
pub mod sweep;
pub mod tiers;
pub mod time_bucket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LoyaltyConfig;
pub use db::LoyaltyDb;
pub use error::{LoyaltyError, LoyaltyResult, ReferralRejection};
pub use models::{BalanceView, Member, MemberStatus, Transaction, TransactionKind};
pub use service::{AwardRequest, LoyaltyEvent, LoyaltyService};
pub use sweep::SweepJob;
