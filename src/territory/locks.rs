//! Per-guild mutual exclusion for territory mutations

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;

use crate::core::types::GuildId;

/// Held for the whole validate, persist, patch-index sequence of one mutation
pub type OwnerGuard = ArcMutexGuard<RawMutex, ()>;

/// One lock per guild; guilds never contend with each other
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, owner: GuildId) -> OwnerGuard {
        // Clone the Arc out so the map shard is not held while waiting
        let lock = self.locks.entry(owner).or_default().clone();
        lock.lock_arc()
    }

    /// Forget the lock of a guild that no longer has a territory
    pub fn forget(&self, owner: GuildId) {
        self.locks
            .remove_if(&owner, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_owner_is_serialized() {
        let locks = OwnerLocks::new();
        let owner = GuildId::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        (0..32).into_par_iter().for_each(|_| {
            let _guard = locks.lock(owner);
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            max_inside.fetch_max(now, Ordering::SeqCst);
            std::thread::yield_now();
            inside.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_owners_do_not_block() {
        let locks = OwnerLocks::new();
        let a = locks.lock(GuildId::new());
        let b = locks.lock(GuildId::new());
        assert_eq!(locks.len(), 2);
        drop(a);
        drop(b);
    }

    #[test]
    fn test_forget_skips_held_locks() {
        let locks = OwnerLocks::new();
        let owner = GuildId::new();
        let guard = locks.lock(owner);
        locks.forget(owner);
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget(owner);
        assert!(locks.is_empty());
    }
}
