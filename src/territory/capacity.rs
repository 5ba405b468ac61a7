//! Membership-driven claim capacity

use serde::Serialize;

/// Members a guild needs before it may hold any chunk
pub const MIN_MEMBERS: u32 = 5;

/// Members required per claimable chunk
pub const MEMBERS_PER_UNIT: u32 = 5;

/// Chunks a guild of `member_count` may hold under a configured cap
#[inline]
pub fn allowed_units(member_count: u32, configured_max: u32) -> u32 {
    if member_count < MIN_MEMBERS {
        return 0;
    }
    (member_count / MEMBERS_PER_UNIT).min(configured_max)
}

/// Snapshot of a guild's capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacitySummary {
    pub members: u32,
    pub used: u32,
    pub allowed: u32,
    pub configured_max: u32,
}

impl CapacitySummary {
    pub fn remaining(&self) -> u32 {
        self.allowed.saturating_sub(self.used)
    }

    pub fn over_capacity(&self) -> bool {
        self.used > self.allowed
    }
}
