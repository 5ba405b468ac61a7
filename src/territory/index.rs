//! In-memory mirror of persisted territories
//!
//! Answers "who holds chunk (world, x, z)" and "what is guild G's territory" in
//! O(1). The index never originates state: it is rebuilt from storage with
//! [`TerritoryIndex::reload`] and patched only after a storage write committed.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::core::types::{ChunkId, GuildId, SigilId, TerritoryId};
use crate::spatial::{ChunkGrid, ChunkPos};
use crate::territory::model::{ClaimedChunk, Sigil, Territory};

/// Index shared between the services
pub type SharedIndex = Arc<RwLock<TerritoryIndex>>;

/// Where a chunk lives inside the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSlot {
    pub owner: GuildId,
    pub territory: TerritoryId,
    pub chunk: ChunkId,
}

#[derive(Debug, Default)]
pub struct TerritoryIndex {
    by_owner: AHashMap<GuildId, Territory>,
    by_chunk: ChunkGrid<ChunkSlot>,
    sigil_owner: AHashMap<SigilId, GuildId>,
    loaded: bool,
}

impl TerritoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Replace the whole index with freshly loaded territories
    pub fn reload(&mut self, territories: impl IntoIterator<Item = Territory>) {
        self.by_owner.clear();
        self.by_chunk.clear();
        self.sigil_owner.clear();

        for territory in territories {
            self.insert_territory(territory);
        }
        self.loaded = true;

        tracing::debug!(
            territories = self.by_owner.len(),
            chunks = self.by_chunk.len(),
            "territory index reloaded"
        );
    }

    /// Drop all state; the index must be reloaded before further use
    pub fn shutdown(&mut self) {
        self.by_owner.clear();
        self.by_chunk.clear();
        self.sigil_owner.clear();
        self.loaded = false;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    // === Queries ===

    /// The chunk claimed at a position, by any guild
    pub fn find_at(&self, pos: &ChunkPos) -> Option<&ClaimedChunk> {
        let slot = self.by_chunk.get(pos)?;
        self.by_owner.get(&slot.owner)?.chunk(slot.chunk)
    }

    pub fn owner_at(&self, pos: &ChunkPos) -> Option<GuildId> {
        self.by_chunk.get(pos).map(|slot| slot.owner)
    }

    pub fn territory(&self, owner: GuildId) -> Option<&Territory> {
        self.by_owner.get(&owner)
    }

    pub fn sigil(&self, id: SigilId) -> Option<&Sigil> {
        let owner = self.sigil_owner.get(&id)?;
        self.by_owner.get(owner)?.sigil(id)
    }

    pub fn sigil_owner(&self, id: SigilId) -> Option<GuildId> {
        self.sigil_owner.get(&id).copied()
    }

    pub fn territories(&self) -> impl Iterator<Item = &Territory> {
        self.by_owner.values()
    }

    pub fn territory_count(&self) -> usize {
        self.by_owner.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.by_chunk.len()
    }

    pub fn sigil_count(&self) -> usize {
        self.sigil_owner.len()
    }

    // === Mutations (called after the matching storage write) ===

    pub fn insert_territory(&mut self, territory: Territory) {
        if let Some(previous) = self.remove_territory(territory.owner) {
            tracing::warn!(owner = %previous.owner, "replacing indexed territory");
        }

        for chunk in territory.chunks.values() {
            self.by_chunk.insert(
                &chunk.pos,
                ChunkSlot {
                    owner: territory.owner,
                    territory: territory.id,
                    chunk: chunk.id,
                },
            );
        }
        for sigil in territory.sigils.keys() {
            self.sigil_owner.insert(*sigil, territory.owner);
        }
        self.by_owner.insert(territory.owner, territory);
    }

    pub fn remove_territory(&mut self, owner: GuildId) -> Option<Territory> {
        let territory = self.by_owner.remove(&owner)?;
        for chunk in territory.chunks.values() {
            self.by_chunk.remove(&chunk.pos);
        }
        for sigil in territory.sigils.keys() {
            self.sigil_owner.remove(sigil);
        }
        Some(territory)
    }

    /// Returns false when the owner has no indexed territory
    pub fn add_unit(&mut self, owner: GuildId, chunk: ClaimedChunk) -> bool {
        let Some(territory) = self.by_owner.get_mut(&owner) else {
            return false;
        };
        self.by_chunk.insert(
            &chunk.pos,
            ChunkSlot {
                owner,
                territory: territory.id,
                chunk: chunk.id,
            },
        );
        territory.chunks.insert(chunk.id, chunk);
        true
    }

    pub fn remove_unit(&mut self, owner: GuildId, chunk: ChunkId) -> Option<ClaimedChunk> {
        let territory = self.by_owner.get_mut(&owner)?;
        let removed = territory.chunks.remove(&chunk)?;
        self.by_chunk.remove(&removed.pos);
        Some(removed)
    }

    pub fn add_anchor(&mut self, owner: GuildId, sigil: Sigil) -> bool {
        let Some(territory) = self.by_owner.get_mut(&owner) else {
            return false;
        };
        self.sigil_owner.insert(sigil.id, owner);
        territory.sigils.insert(sigil.id, sigil);
        true
    }

    /// Remove a sigil. Chunks still pointing at it are left as they are.
    pub fn remove_anchor(&mut self, owner: GuildId, sigil: SigilId) -> Option<Sigil> {
        let territory = self.by_owner.get_mut(&owner)?;
        let removed = territory.sigils.remove(&sigil)?;
        self.sigil_owner.remove(&sigil);
        Some(removed)
    }

    /// Overwrite a sigil's name or location
    pub fn replace_anchor(&mut self, owner: GuildId, sigil: Sigil) -> bool {
        match self.by_owner.get_mut(&owner) {
            Some(territory) if territory.sigils.contains_key(&sigil.id) => {
                territory.sigils.insert(sigil.id, sigil);
                true
            }
            _ => false,
        }
    }

    pub fn update_unit_anchor(&mut self, owner: GuildId, chunk: ChunkId, sigil: Option<SigilId>) -> bool {
        match self
            .by_owner
            .get_mut(&owner)
            .and_then(|territory| territory.chunks.get_mut(&chunk))
        {
            Some(record) => {
                record.sigil = sigil;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BlockPos;
    use crate::territory::model::SigilLocation;
    use chrono::Utc;

    fn chunk(id: i64, x: i32, z: i32, sigil: Option<i64>) -> ClaimedChunk {
        ClaimedChunk {
            id: ChunkId(id),
            territory: TerritoryId(1),
            pos: ChunkPos::new("w", x, z),
            marker_elevation: 64,
            insertion_order: id as u32,
            sigil: sigil.map(SigilId),
            added_at: Utc::now(),
        }
    }

    fn sigil(id: i64) -> Sigil {
        Sigil {
            id: SigilId(id),
            territory: TerritoryId(1),
            name: format!("Sigil-{}", id),
            location: SigilLocation::new("w", BlockPos::new(8, 64, 8)),
            created_at: Utc::now(),
        }
    }

    fn territory_with(owner: GuildId, chunks: Vec<ClaimedChunk>, sigils: Vec<Sigil>) -> Territory {
        let mut territory = Territory::new(TerritoryId(1), owner, Utc::now());
        for c in chunks {
            territory.chunks.insert(c.id, c);
        }
        for s in sigils {
            territory.sigils.insert(s.id, s);
        }
        territory
    }

    #[test]
    fn test_reload_and_find() {
        let owner = GuildId::new();
        let mut index = TerritoryIndex::new();
        assert!(!index.is_loaded());

        index.reload(vec![territory_with(
            owner,
            vec![chunk(1, 0, 0, Some(1)), chunk(2, 1, 0, Some(1))],
            vec![sigil(1)],
        )]);

        assert!(index.is_loaded());
        assert_eq!(index.owner_at(&ChunkPos::new("w", 1, 0)), Some(owner));
        assert_eq!(index.find_at(&ChunkPos::new("w", 0, 0)).map(|c| c.id), Some(ChunkId(1)));
        assert!(index.find_at(&ChunkPos::new("w", 2, 0)).is_none());
        assert_eq!(index.sigil(SigilId(1)).map(|s| s.name.as_str()), Some("Sigil-1"));
        assert_eq!(index.chunk_count(), 2);
    }

    #[test]
    fn test_incremental_patches() {
        let owner = GuildId::new();
        let mut index = TerritoryIndex::new();
        index.reload(Vec::new());
        index.insert_territory(territory_with(owner, Vec::new(), Vec::new()));

        assert!(index.add_anchor(owner, sigil(3)));
        assert!(index.add_unit(owner, chunk(7, 4, 4, None)));
        assert!(index.update_unit_anchor(owner, ChunkId(7), Some(SigilId(3))));
        assert_eq!(index.find_at(&ChunkPos::new("w", 4, 4)).and_then(|c| c.sigil), Some(SigilId(3)));

        let removed = index.remove_unit(owner, ChunkId(7)).unwrap();
        assert_eq!(removed.pos, ChunkPos::new("w", 4, 4));
        assert!(index.owner_at(&removed.pos).is_none());

        assert!(index.remove_anchor(owner, SigilId(3)).is_some());
        assert!(index.sigil(SigilId(3)).is_none());
    }

    #[test]
    fn test_patches_on_unknown_owner_are_rejected() {
        let mut index = TerritoryIndex::new();
        let stranger = GuildId::new();
        assert!(!index.add_unit(stranger, chunk(1, 0, 0, None)));
        assert!(!index.add_anchor(stranger, sigil(1)));
        assert!(index.owner_at(&ChunkPos::new("w", 0, 0)).is_none());
    }

    #[test]
    fn test_remove_territory_clears_lookups() {
        let owner = GuildId::new();
        let mut index = TerritoryIndex::new();
        index.reload(vec![territory_with(owner, vec![chunk(1, 0, 0, Some(1))], vec![sigil(1)])]);

        let removed = index.remove_territory(owner).unwrap();
        assert_eq!(removed.chunk_count(), 1);
        assert!(index.territory(owner).is_none());
        assert!(index.owner_at(&ChunkPos::new("w", 0, 0)).is_none());
        assert!(index.sigil_owner(SigilId(1)).is_none());
    }

    #[test]
    fn test_shutdown_unloads() {
        let mut index = TerritoryIndex::new();
        index.reload(vec![territory_with(GuildId::new(), vec![chunk(1, 0, 0, None)], Vec::new())]);
        index.shutdown();
        assert!(!index.is_loaded());
        assert_eq!(index.territory_count(), 0);
        assert_eq!(index.chunk_count(), 0);
    }
}
