//! Points ledger: append-only transaction log with maintained running totals
//!
//! The log is the source of truth. `member_balances` holds running totals
//! updated in the same SQL transaction as each append, so balance reads are
//! O(1) and can always be rebuilt from the log with
//! [`LedgerStore::restore_totals`].

mod locks;
mod sqlite;
mod store;

pub use locks::{MemberGuard, MemberLocks};
pub use sqlite::{EXPIRY_SOURCE, SqliteLedger};
pub use store::{AppendOutcome, Expiry, LedgerStore};
