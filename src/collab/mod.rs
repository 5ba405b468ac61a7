//! Narrow interfaces to systems outside the territory core
//!
//! Guild membership, marker rendering, world block data and host settings are
//! owned elsewhere; the core only ever calls the traits below.

pub mod memory;

use std::sync::Arc;

use crate::core::types::{BlockPos, GuildId, PlayerId};

pub use memory::{FlatWorld, GuildRoster, MarkerEvent, MarkerJournal, MemoryHost};

/// The collaborators every service needs, shared by handle
#[derive(Clone)]
pub struct Collaborators {
    pub guilds: Arc<dyn GuildDirectory>,
    pub markers: Arc<dyn MarkerPlacer>,
    pub world: Arc<dyn WorldView>,
    pub settings: Arc<dyn ClaimSettings>,
}

impl Collaborators {
    /// Guild display name, falling back to the id for unknown guilds
    pub fn guild_name(&self, guild: GuildId) -> String {
        self.guilds
            .get_owner(guild)
            .map(|info| info.name)
            .unwrap_or_else(|| guild.to_string())
    }
}

/// Guild facts the core needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: GuildId,
    pub leader: PlayerId,
    pub name: String,
}

pub trait GuildDirectory: Send + Sync {
    fn get_owner(&self, guild: GuildId) -> Option<GuildInfo>;

    fn member_count(&self, guild: GuildId) -> u32;

    fn is_leader(&self, guild: GuildId, player: PlayerId) -> bool;
}

/// Physical sigil markers. Fire-and-forget.
pub trait MarkerPlacer: Send + Sync {
    fn place_marker(&self, world: &str, pos: BlockPos);

    fn remove_marker(&self, world: &str, pos: BlockPos);
}

/// Host-provided settings
pub trait ClaimSettings: Send + Sync {
    fn configured_max_units_per_owner(&self) -> u32;

    fn teleport_cooldown_seconds(&self) -> u64;

    fn sigil_name_prefix(&self) -> &str {
        "Sigil"
    }
}

/// What occupies a block, as far as standing in it is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Air,
    /// Non-solid, non-liquid (grass, flowers, open doors)
    Passable,
    Liquid,
    Solid,
}

impl BlockKind {
    /// A player can occupy this block
    pub fn is_clear(&self) -> bool {
        matches!(self, BlockKind::Air | BlockKind::Passable)
    }

    /// A player can stand on top of this block
    pub fn is_footing(&self) -> bool {
        matches!(self, BlockKind::Solid)
    }
}

/// Read access to world blocks
pub trait WorldView: Send + Sync {
    fn is_loaded(&self, world: &str) -> bool;

    /// Inclusive lowest and exclusive highest buildable y
    fn height_range(&self, world: &str) -> Option<(i32, i32)>;

    fn block_at(&self, world: &str, pos: BlockPos) -> BlockKind;

    /// Y of the highest solid block in a column
    fn surface_y(&self, world: &str, x: i32, z: i32) -> Option<i32>;
}
