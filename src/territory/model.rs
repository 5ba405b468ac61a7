//! Territory aggregate: claimed chunks and the sigils grouping them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{BlockPos, ChunkId, GuildId, SigilId, TerritoryId};
use crate::spatial::ChunkPos;

/// A chunk held by a territory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedChunk {
    pub id: ChunkId,
    pub territory: TerritoryId,
    pub pos: ChunkPos,
    /// Height the sigil marker stands at when this chunk seeds a sigil
    pub marker_elevation: i32,
    /// Strictly increasing per territory; drives LIFO shrink
    pub insertion_order: u32,
    /// `None` for legacy chunks awaiting repair
    pub sigil: Option<SigilId>,
    pub added_at: DateTime<Utc>,
}

impl ClaimedChunk {
    /// Marker position used when this chunk seeds a new sigil
    pub fn seed_location(&self) -> SigilLocation {
        SigilLocation::new(self.pos.world.clone(), self.pos.center_block(self.marker_elevation))
    }
}

/// World position of a sigil marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigilLocation {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SigilLocation {
    pub fn new(world: impl Into<String>, block: BlockPos) -> Self {
        Self {
            world: world.into(),
            x: block.x,
            y: block.y,
            z: block.z,
        }
    }

    pub fn block(&self) -> BlockPos {
        BlockPos::new(self.x, self.y, self.z)
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::from_block(self.world.clone(), self.x, self.z)
    }
}

/// Named anchor of a connected group of chunks, carrying a world marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sigil {
    pub id: SigilId,
    pub territory: TerritoryId,
    pub name: String,
    pub location: SigilLocation,
    pub created_at: DateTime<Utc>,
}

/// Case-insensitive comparison key for sigil names
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// All chunks and sigils owned by one guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub owner: GuildId,
    pub created_at: DateTime<Utc>,
    pub chunks: BTreeMap<ChunkId, ClaimedChunk>,
    pub sigils: BTreeMap<SigilId, Sigil>,
}

impl Territory {
    pub fn new(id: TerritoryId, owner: GuildId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            created_at,
            chunks: BTreeMap::new(),
            sigils: BTreeMap::new(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn sigil_count(&self) -> usize {
        self.sigils.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&ClaimedChunk> {
        self.chunks.get(&id)
    }

    pub fn sigil(&self, id: SigilId) -> Option<&Sigil> {
        self.sigils.get(&id)
    }

    pub fn chunk_at(&self, pos: &ChunkPos) -> Option<&ClaimedChunk> {
        self.chunks.values().find(|c| &c.pos == pos)
    }

    pub fn chunk_by_ordinal(&self, insertion_order: u32) -> Option<&ClaimedChunk> {
        self.chunks.values().find(|c| c.insertion_order == insertion_order)
    }

    /// Chunks assigned to a sigil, oldest first
    pub fn chunks_for_sigil(&self, sigil: SigilId) -> Vec<&ClaimedChunk> {
        let mut chunks: Vec<_> = self
            .chunks
            .values()
            .filter(|c| c.sigil == Some(sigil))
            .collect();
        chunks.sort_by_key(|c| c.insertion_order);
        chunks
    }

    /// Chunks ordered newest first (LIFO release order)
    pub fn chunks_by_insertion_desc(&self) -> Vec<&ClaimedChunk> {
        let mut chunks: Vec<_> = self.chunks.values().collect();
        chunks.sort_by(|a, b| b.insertion_order.cmp(&a.insertion_order));
        chunks
    }

    /// Case-insensitive exact lookup
    pub fn sigil_by_name(&self, name: &str) -> Option<&Sigil> {
        let key = name_key(name);
        self.sigils.values().find(|s| name_key(&s.name) == key)
    }

    /// Chunks with no sigil, or with a sigil this territory does not hold
    pub fn orphan_chunks(&self) -> Vec<&ClaimedChunk> {
        let mut orphans: Vec<_> = self
            .chunks
            .values()
            .filter(|c| match c.sigil {
                None => true,
                Some(id) => !self.sigils.contains_key(&id),
            })
            .collect();
        orphans.sort_by_key(|c| c.insertion_order);
        orphans
    }

    pub fn max_insertion_order(&self) -> u32 {
        self.chunks.values().map(|c| c.insertion_order).max().unwrap_or(0)
    }

    /// Insertion order for the next claimed chunk
    pub fn next_insertion_order(&self) -> u32 {
        self.max_insertion_order() + 1
    }

    /// First free `<prefix>-<n>` name, n starting at 1
    pub fn next_default_sigil_name(&self, prefix: &str) -> String {
        (1..)
            .map(|n| format!("{}-{}", prefix, n))
            .find(|candidate| self.sigil_by_name(candidate).is_none())
            .unwrap_or_else(|| prefix.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64, x: i32, z: i32, order: u32, sigil: Option<i64>) -> ClaimedChunk {
        ClaimedChunk {
            id: ChunkId(id),
            territory: TerritoryId(1),
            pos: ChunkPos::new("w", x, z),
            marker_elevation: 65,
            insertion_order: order,
            sigil: sigil.map(SigilId),
            added_at: Utc::now(),
        }
    }

    fn sigil(id: i64, name: &str) -> Sigil {
        Sigil {
            id: SigilId(id),
            territory: TerritoryId(1),
            name: name.to_string(),
            location: SigilLocation::new("w", BlockPos::new(8, 65, 8)),
            created_at: Utc::now(),
        }
    }

    fn sample() -> Territory {
        let mut territory = Territory::new(TerritoryId(1), GuildId::new(), Utc::now());
        territory.sigils.insert(SigilId(1), sigil(1, "Harbor"));
        for c in [
            chunk(10, 0, 0, 1, Some(1)),
            chunk(11, 1, 0, 2, Some(1)),
            chunk(12, 5, 5, 3, None),
            chunk(13, 9, 9, 4, Some(42)),
        ] {
            territory.chunks.insert(c.id, c);
        }
        territory
    }

    #[test]
    fn test_derived_counts() {
        let territory = sample();
        assert_eq!(territory.chunk_count(), 4);
        assert_eq!(territory.sigil_count(), 1);
        assert_eq!(territory.chunks_for_sigil(SigilId(1)).len(), 2);
    }

    #[test]
    fn test_insertion_desc_order() {
        let territory = sample();
        let orders: Vec<_> = territory
            .chunks_by_insertion_desc()
            .iter()
            .map(|c| c.insertion_order)
            .collect();
        assert_eq!(orders, vec![4, 3, 2, 1]);
        assert_eq!(territory.next_insertion_order(), 5);
    }

    #[test]
    fn test_sigil_lookup_is_case_insensitive() {
        let territory = sample();
        assert!(territory.sigil_by_name("harbor").is_some());
        assert!(territory.sigil_by_name("HARBOR").is_some());
        assert!(territory.sigil_by_name("Harbour").is_none());
    }

    #[test]
    fn test_orphans_include_dangling_sigils() {
        let territory = sample();
        let orphan_ids: Vec<_> = territory.orphan_chunks().iter().map(|c| c.id).collect();
        assert_eq!(orphan_ids, vec![ChunkId(12), ChunkId(13)]);
    }

    #[test]
    fn test_default_name_skips_taken_names() {
        let mut territory = sample();
        assert_eq!(territory.next_default_sigil_name("Sigil"), "Sigil-1");
        territory.sigils.insert(SigilId(2), sigil(2, "sigil-1"));
        assert_eq!(territory.next_default_sigil_name("Sigil"), "Sigil-2");
    }

    #[test]
    fn test_seed_location_is_chunk_centre() {
        let c = chunk(1, -1, 2, 1, None);
        let location = c.seed_location();
        assert_eq!(location.chunk(), c.pos);
        assert_eq!(location.y, 65);
    }
}
