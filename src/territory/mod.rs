//! Guild territory: claimed chunks, their sigils and the rules around them

pub mod capacity;
pub mod connectivity;
pub mod index;
pub mod locks;
pub mod model;
pub mod outcome;
pub mod release;
pub mod service;

pub use capacity::{allowed_units, CapacitySummary, MEMBERS_PER_UNIT, MIN_MEMBERS};
pub use connectivity::{
    connected_groups, connected_orphans, partition_chunks, resolve_assignment, resolve_group_assignment,
    SigilAssignment,
};
pub use index::{SharedIndex, TerritoryIndex};
pub use locks::OwnerLocks;
pub use model::{ClaimedChunk, Sigil, SigilLocation, Territory};
pub use outcome::{ClaimResult, ClaimedUnit, Outcome, ReleaseResult, ReleasedUnits, TerritoryFailure};
pub use service::{ClaimRequest, TerritoryService};
