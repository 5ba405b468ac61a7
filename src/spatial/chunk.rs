//! Chunk coordinates and the adjacency relation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::BlockPos;

/// Width of a chunk in blocks along x and z
pub const CHUNK_SIZE: i32 = 16;

/// Largest absolute chunk coordinate a claim may use. Block coordinates of
/// these chunks and their neighbours stay well inside `i32`.
pub const MAX_CHUNK_COORD: i32 = 30_000_000 / CHUNK_SIZE;

/// Grid position of a chunk: world name plus chunk coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub world: String,
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// Chunk containing the given block column
    pub fn from_block(world: impl Into<String>, block_x: i32, block_z: i32) -> Self {
        Self::new(
            world,
            block_x.div_euclid(CHUNK_SIZE),
            block_z.div_euclid(CHUNK_SIZE),
        )
    }

    /// True when both coordinates lie within [`MAX_CHUNK_COORD`] of the origin
    pub fn in_bounds(&self) -> bool {
        self.x.unsigned_abs() <= MAX_CHUNK_COORD as u32 && self.z.unsigned_abs() <= MAX_CHUNK_COORD as u32
    }

    /// 8-neighbour adjacency: same world, Chebyshev distance exactly 1
    #[inline]
    pub fn is_adjacent(&self, other: &ChunkPos) -> bool {
        if self.world != other.world {
            return false;
        }
        let dx = self.x.abs_diff(other.x);
        let dz = self.z.abs_diff(other.z);
        dx <= 1 && dz <= 1 && (dx, dz) != (0, 0)
    }

    /// Offsets of the eight adjacent chunks
    pub fn neighbor_offsets() -> impl Iterator<Item = (i32, i32)> {
        (-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dz| (dx, dz)))
            .filter(|&offset| offset != (0, 0))
    }

    /// Adjacent chunks; neighbours past the edge of the `i32` grid are skipped
    pub fn neighbors(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        Self::neighbor_offsets().filter_map(move |(dx, dz)| {
            Some(ChunkPos::new(
                self.world.clone(),
                self.x.checked_add(dx)?,
                self.z.checked_add(dz)?,
            ))
        })
    }

    /// Centre block column of this chunk at height `y`. Saturates for chunks
    /// that are not [`in_bounds`](Self::in_bounds).
    pub fn center_block(&self, y: i32) -> BlockPos {
        let centre = |c: i32| c.saturating_mul(CHUNK_SIZE).saturating_add(CHUNK_SIZE / 2);
        BlockPos::new(centre(self.x), y, centre(self.z))
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.world, self.x, self.z)
    }
}
