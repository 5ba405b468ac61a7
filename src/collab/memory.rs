//! In-memory collaborators for the bundled binary and for tests

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};

use std::sync::Arc;

use crate::collab::{BlockKind, Collaborators, GuildDirectory, GuildInfo, MarkerPlacer, WorldView};
use crate::core::config::{GuildSeed, TerritoryConfig, WorldSeed};
use crate::core::types::{BlockPos, GuildId, PlayerId};

// === Guilds ===

#[derive(Debug, Clone)]
struct RosterEntry {
    info: GuildInfo,
    members: u32,
}

/// Guild directory backed by a map
#[derive(Debug, Default)]
pub struct GuildRoster {
    guilds: RwLock<AHashMap<GuildId, RosterEntry>>,
}

impl GuildRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[GuildSeed]) -> Self {
        let roster = Self::new();
        for seed in seeds {
            roster.register(
                GuildInfo {
                    id: GuildId(seed.id),
                    leader: PlayerId(seed.leader),
                    name: seed.name.clone(),
                },
                seed.members,
            );
        }
        roster
    }

    pub fn register(&self, info: GuildInfo, members: u32) {
        self.guilds.write().insert(info.id, RosterEntry { info, members });
    }

    /// Register a guild with a fresh id and leader
    pub fn found(&self, name: &str, members: u32) -> GuildInfo {
        let info = GuildInfo {
            id: GuildId::new(),
            leader: PlayerId::new(),
            name: name.to_string(),
        };
        self.register(info.clone(), members);
        info
    }

    pub fn set_member_count(&self, guild: GuildId, members: u32) -> bool {
        match self.guilds.write().get_mut(&guild) {
            Some(entry) => {
                entry.members = members;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, guild: GuildId) -> Option<GuildInfo> {
        self.guilds.write().remove(&guild).map(|entry| entry.info)
    }

    pub fn guilds(&self) -> Vec<GuildInfo> {
        let mut guilds: Vec<_> = self.guilds.read().values().map(|e| e.info.clone()).collect();
        guilds.sort_by(|a, b| a.name.cmp(&b.name));
        guilds
    }
}

impl GuildDirectory for GuildRoster {
    fn get_owner(&self, guild: GuildId) -> Option<GuildInfo> {
        self.guilds.read().get(&guild).map(|entry| entry.info.clone())
    }

    fn member_count(&self, guild: GuildId) -> u32 {
        self.guilds.read().get(&guild).map(|entry| entry.members).unwrap_or(0)
    }

    fn is_leader(&self, guild: GuildId, player: PlayerId) -> bool {
        self.guilds
            .read()
            .get(&guild)
            .map(|entry| entry.info.leader == player)
            .unwrap_or(false)
    }
}

// === World ===

#[derive(Debug, Clone, Copy)]
struct FlatLayer {
    min_y: i32,
    max_y: i32,
    ground_y: i32,
}

/// Flat worlds: solid up to `ground_y`, air above, with per-block overrides
#[derive(Debug, Default)]
pub struct FlatWorld {
    worlds: RwLock<AHashMap<String, FlatLayer>>,
    overrides: RwLock<AHashMap<(String, BlockPos), BlockKind>>,
}

impl FlatWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[WorldSeed]) -> Self {
        let world = Self::new();
        for seed in seeds {
            world.add_world(&seed.name, seed.min_y, seed.max_y, seed.ground_y);
        }
        world
    }

    pub fn with_world(self, name: &str, min_y: i32, max_y: i32, ground_y: i32) -> Self {
        self.add_world(name, min_y, max_y, ground_y);
        self
    }

    pub fn add_world(&self, name: &str, min_y: i32, max_y: i32, ground_y: i32) {
        self.worlds.write().insert(
            name.to_string(),
            FlatLayer {
                min_y,
                max_y,
                ground_y,
            },
        );
    }

    pub fn unload(&self, name: &str) -> bool {
        self.worlds.write().remove(name).is_some()
    }

    pub fn set_block(&self, world: &str, pos: BlockPos, kind: BlockKind) {
        self.overrides.write().insert((world.to_string(), pos), kind);
    }

    fn layer(&self, world: &str) -> Option<FlatLayer> {
        self.worlds.read().get(world).copied()
    }
}

impl WorldView for FlatWorld {
    fn is_loaded(&self, world: &str) -> bool {
        self.worlds.read().contains_key(world)
    }

    fn height_range(&self, world: &str) -> Option<(i32, i32)> {
        self.layer(world).map(|layer| (layer.min_y, layer.max_y))
    }

    fn block_at(&self, world: &str, pos: BlockPos) -> BlockKind {
        if let Some(kind) = self.overrides.read().get(&(world.to_string(), pos)) {
            return *kind;
        }
        match self.layer(world) {
            Some(layer) if pos.y >= layer.min_y && pos.y <= layer.ground_y => BlockKind::Solid,
            _ => BlockKind::Air,
        }
    }

    fn surface_y(&self, world: &str, x: i32, z: i32) -> Option<i32> {
        let layer = self.layer(world)?;
        (layer.min_y..layer.max_y)
            .rev()
            .find(|&y| self.block_at(world, BlockPos::new(x, y, z)) == BlockKind::Solid)
    }
}

// === Markers ===

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerEvent {
    Placed { world: String, pos: BlockPos },
    Removed { world: String, pos: BlockPos },
}

/// Marker placer that records and logs every call
#[derive(Debug, Default)]
pub struct MarkerJournal {
    events: Mutex<Vec<MarkerEvent>>,
}

impl MarkerJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MarkerEvent> {
        self.events.lock().clone()
    }

    /// Markers placed and not removed since
    pub fn standing(&self) -> AHashSet<(String, BlockPos)> {
        let mut standing = AHashSet::new();
        for event in self.events.lock().iter() {
            match event {
                MarkerEvent::Placed { world, pos } => {
                    standing.insert((world.clone(), *pos));
                }
                MarkerEvent::Removed { world, pos } => {
                    standing.remove(&(world.clone(), *pos));
                }
            }
        }
        standing
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MarkerPlacer for MarkerJournal {
    fn place_marker(&self, world: &str, pos: BlockPos) {
        tracing::info!(world, %pos, "placing sigil marker");
        self.events.lock().push(MarkerEvent::Placed {
            world: world.to_string(),
            pos,
        });
    }

    fn remove_marker(&self, world: &str, pos: BlockPos) {
        tracing::info!(world, %pos, "removing sigil marker");
        self.events.lock().push(MarkerEvent::Removed {
            world: world.to_string(),
            pos,
        });
    }
}

// === Wiring ===

/// The in-memory collaborators, kept by concrete type so a host can still
/// change membership or inspect markers after wiring
#[derive(Debug, Clone)]
pub struct MemoryHost {
    pub roster: Arc<GuildRoster>,
    pub world: Arc<FlatWorld>,
    pub markers: Arc<MarkerJournal>,
}

impl MemoryHost {
    pub fn from_config(config: &TerritoryConfig) -> Self {
        Self {
            roster: Arc::new(GuildRoster::from_seeds(&config.guilds)),
            world: Arc::new(FlatWorld::from_seeds(&config.worlds)),
            markers: Arc::new(MarkerJournal::new()),
        }
    }

    pub fn collaborators(&self, config: &TerritoryConfig) -> Collaborators {
        Collaborators {
            guilds: self.roster.clone(),
            markers: self.markers.clone(),
            world: self.world.clone(),
            settings: Arc::new(config.claims.clone()),
        }
    }
}
