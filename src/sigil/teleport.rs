//! Teleport destinations and per-player cooldowns

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::collab::WorldView;
use crate::core::types::{BlockPos, PlayerId};

/// Result of a teleport request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeleportResult {
    Teleported { world: String, destination: BlockPos },
    OnCooldown { remaining_secs: u64 },
    NoSafeLocation,
}

/// Lowest standable position at or above `start`: solid footing, clear feet
/// and head. Bounded by the world's height range.
pub fn find_safe_location(world: &dyn WorldView, world_name: &str, start: BlockPos) -> Option<BlockPos> {
    let (min_y, max_y) = world.height_range(world_name)?;
    let first = start.y.max(min_y + 1);

    (first..max_y - 1)
        .map(|y| BlockPos::new(start.x, y, start.z))
        .find(|feet| {
            world.block_at(world_name, feet.below()).is_footing()
                && world.block_at(world_name, *feet).is_clear()
                && world.block_at(world_name, feet.above()).is_clear()
        })
}

/// Last successful teleport per player
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last: DashMap<PlayerId, Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `attempt` unless the player is cooling down, in which case the whole
    /// seconds left (rounded up) come back as `Err`. A `Some` result starts a new
    /// cooldown. The check and the record happen under the player's entry lock,
    /// so `attempt` must not touch this tracker. A zero cooldown never blocks
    /// and records nothing.
    pub fn try_use<T>(
        &self,
        player: PlayerId,
        cooldown: Duration,
        now: Instant,
        attempt: impl FnOnce() -> Option<T>,
    ) -> Result<Option<T>, u64> {
        if cooldown.is_zero() {
            return Ok(attempt());
        }

        match self.last.entry(player) {
            Entry::Occupied(mut slot) => {
                if let Some(left) = seconds_left(*slot.get(), cooldown, now) {
                    return Err(left);
                }
                let result = attempt();
                if result.is_some() {
                    slot.insert(now);
                }
                Ok(result)
            }
            Entry::Vacant(slot) => {
                let result = attempt();
                if result.is_some() {
                    slot.insert(now);
                }
                Ok(result)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

fn seconds_left(last: Instant, cooldown: Duration, now: Instant) -> Option<u64> {
    let elapsed = now.saturating_duration_since(last);
    let left = cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())?;
    Some(left.as_secs() + u64::from(left.subsec_nanos() > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{BlockKind, FlatWorld};

    fn world() -> FlatWorld {
        FlatWorld::new().with_world("w", -64, 320, 64)
    }

    #[test]
    fn test_open_ground_is_safe() {
        let w = world();
        assert_eq!(
            find_safe_location(&w, "w", BlockPos::new(8, 65, 8)),
            Some(BlockPos::new(8, 65, 8))
        );
    }

    #[test]
    fn test_scan_climbs_over_obstacles() {
        let w = world();
        w.set_block("w", BlockPos::new(8, 65, 8), BlockKind::Solid);
        w.set_block("w", BlockPos::new(8, 66, 8), BlockKind::Solid);
        assert_eq!(
            find_safe_location(&w, "w", BlockPos::new(8, 65, 8)),
            Some(BlockPos::new(8, 67, 8))
        );
    }

    #[test]
    fn test_liquid_is_not_clear() {
        let w = world();
        w.set_block("w", BlockPos::new(8, 65, 8), BlockKind::Liquid);
        w.set_block("w", BlockPos::new(8, 66, 8), BlockKind::Solid);
        // Feet at 67 stand on the solid block at 66
        assert_eq!(
            find_safe_location(&w, "w", BlockPos::new(8, 65, 8)),
            Some(BlockPos::new(8, 67, 8))
        );
    }

    #[test]
    fn test_no_location_in_solid_column() {
        let w = FlatWorld::new().with_world("w", 0, 16, 15);
        assert_eq!(find_safe_location(&w, "w", BlockPos::new(0, 4, 0)), None);
        assert_eq!(find_safe_location(&w, "missing", BlockPos::new(0, 4, 0)), None);
    }

    #[test]
    fn test_cooldown_counts_down() {
        let tracker = CooldownTracker::new();
        let player = PlayerId::new();
        let start = Instant::now();
        let cooldown = Duration::from_secs(60);

        assert_eq!(tracker.try_use(player, cooldown, start, || Some(1)), Ok(Some(1)));
        assert_eq!(tracker.try_use(player, cooldown, start, || Some(2)), Err(60));
        assert_eq!(
            tracker.try_use(player, cooldown, start + Duration::from_millis(20_500), || Some(3)),
            Err(40)
        );
        assert_eq!(tracker.try_use(player, cooldown, start + cooldown, || Some(4)), Ok(Some(4)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_failed_attempt_starts_no_cooldown() {
        let tracker = CooldownTracker::new();
        let player = PlayerId::new();
        let now = Instant::now();
        let cooldown = Duration::from_secs(60);

        assert_eq!(tracker.try_use(player, cooldown, now, || None::<()>), Ok(None));
        assert!(tracker.is_empty());
        assert_eq!(tracker.try_use(player, cooldown, now, || Some(())), Ok(Some(())));
    }

    #[test]
    fn test_zero_cooldown_disables_check() {
        let tracker = CooldownTracker::new();
        let player = PlayerId::new();
        let now = Instant::now();
        assert_eq!(tracker.try_use(player, Duration::ZERO, now, || Some(())), Ok(Some(())));
        assert_eq!(tracker.try_use(player, Duration::ZERO, now, || Some(())), Ok(Some(())));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_concurrent_uses_admit_one() {
        use rayon::prelude::*;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let tracker = CooldownTracker::new();
        let player = PlayerId::new();
        let now = Instant::now();
        let cooldown = Duration::from_secs(60);
        let admitted = AtomicUsize::new(0);

        (0..32).into_par_iter().for_each(|_| {
            let _ = tracker.try_use(player, cooldown, now, || {
                admitted.fetch_add(1, Ordering::SeqCst);
                Some(())
            });
        });
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
