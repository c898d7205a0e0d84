//! Per-member serialization for ledger mutations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use tracing::warn;

use crate::error::{LoyaltyError, LoyaltyResult};

type LockTable = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Lock table keyed by member id.
///
/// Locks are acquired with a bounded wait; on timeout the operation fails with
/// [`LoyaltyError::Busy`] instead of blocking forever. Locks are not reentrant,
/// so a caller holding a guard must not acquire the same member again.
///
/// A slot lives only while some caller holds or waits on it, so the table is
/// bounded by the number of in-flight operations.
pub struct MemberLocks {
    table: Arc<LockTable>,
    timeout: Duration,
}

/// Held locks for one or more members. Released on drop.
pub struct MemberGuard {
    members: Vec<String>,
    guards: Vec<ArcMutexGuard<RawMutex, ()>>,
    table: Arc<LockTable>,
}

impl MemberGuard {
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

impl Drop for MemberGuard {
    fn drop(&mut self) {
        self.guards.clear();
        prune(&self.table, &self.members);
    }
}

/// Drop slots nobody else references. Clones are only taken under the table
/// lock, so a count of one means no holder and no waiter.
fn prune(table: &LockTable, ids: &[String]) {
    let mut table = table.lock();
    for id in ids {
        if table.get(id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            table.remove(id);
        }
    }
}

impl std::fmt::Debug for MemberGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberGuard")
            .field("members", &self.members)
            .finish()
    }
}

impl MemberLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of slots currently in the table
    pub fn tracked(&self) -> usize {
        self.table.lock().len()
    }

    fn slot(&self, member_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock();
        table
            .entry(member_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a single member
    pub fn acquire(&self, member_id: &str) -> LoyaltyResult<MemberGuard> {
        self.acquire_all([member_id])
    }

    /// Lock two members. Order of arguments does not matter.
    pub fn acquire_pair(&self, a: &str, b: &str) -> LoyaltyResult<MemberGuard> {
        self.acquire_all([a, b])
    }

    /// Lock a set of members in sorted id order so concurrent multi-member
    /// operations cannot deadlock
    pub fn acquire_all<'a>(
        &self,
        member_ids: impl IntoIterator<Item = &'a str>,
    ) -> LoyaltyResult<MemberGuard> {
        let mut ids: Vec<String> = member_ids.into_iter().map(str::to_string).collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let slot = self.slot(id);
            let locked = slot.try_lock_arc_for(self.timeout);
            drop(slot);
            match locked {
                Some(guard) => guards.push(guard),
                None => {
                    // Release what we hold and forget slots left unused
                    drop(guards);
                    prune(&self.table, &ids);
                    warn!(member_id = %id, timeout_ms = self.timeout.as_millis() as u64, "Member lock timed out");
                    return Err(LoyaltyError::Busy {
                        member_id: id.clone(),
                    });
                }
            }
        }

        Ok(MemberGuard {
            members: ids,
            guards,
            table: Arc::clone(&self.table),
        })
    }
}

impl Default for MemberLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_pair_is_sorted_and_deduped() {
        let locks = MemberLocks::default();
        let guard = locks.acquire_pair("b", "a").unwrap();
        assert_eq!(guard.members(), ["a".to_string(), "b".to_string()]);
        drop(guard);

        let guard = locks.acquire_pair("a", "a").unwrap();
        assert_eq!(guard.members().len(), 1);
    }

    #[test]
    fn test_timeout_returns_busy() {
        let locks = MemberLocks::new(Duration::from_millis(20));
        let _held = locks.acquire("m1").unwrap();

        let err = locks.acquire("m1").unwrap_err();
        assert!(matches!(err, LoyaltyError::Busy { ref member_id } if member_id == "m1"));
        // Other members are unaffected
        assert!(locks.acquire("m2").is_ok());
    }

    #[test]
    fn test_released_slots_are_pruned() {
        let locks = MemberLocks::new(Duration::from_millis(20));
        let held = locks.acquire_pair("m1", "m2").unwrap();
        assert_eq!(locks.tracked(), 2);

        assert!(locks.acquire("m1").is_err());
        assert_eq!(locks.tracked(), 2);

        drop(held);
        assert_eq!(locks.tracked(), 0);

        for i in 0..100 {
            drop(locks.acquire(&format!("member-{i}")).unwrap());
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[test]
    fn test_guard_serializes_threads() {
        let locks = Arc::new(MemberLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let _guard = locks.acquire("shared").unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
