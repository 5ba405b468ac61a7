//! Sparse hash grid keyed by chunk position

use ahash::AHashMap;

use crate::spatial::chunk::ChunkPos;

/// Sparse grid of per-chunk values, bucketed by world, for O(1) point and
/// neighbour queries
#[derive(Debug, Clone)]
pub struct ChunkGrid<T> {
    worlds: AHashMap<String, AHashMap<(i32, i32), T>>,
    len: usize,
}

impl<T> ChunkGrid<T> {
    pub fn new() -> Self {
        Self {
            worlds: AHashMap::new(),
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.worlds.clear();
        self.len = 0;
    }

    /// Insert a value, returning the previous one at that position
    pub fn insert(&mut self, pos: &ChunkPos, value: T) -> Option<T> {
        let previous = match self.worlds.get_mut(pos.world.as_str()) {
            Some(cells) => cells.insert((pos.x, pos.z), value),
            None => {
                let mut cells = AHashMap::new();
                cells.insert((pos.x, pos.z), value);
                self.worlds.insert(pos.world.clone(), cells);
                None
            }
        };
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub fn remove(&mut self, pos: &ChunkPos) -> Option<T> {
        let cells = self.worlds.get_mut(pos.world.as_str())?;
        let removed = cells.remove(&(pos.x, pos.z));
        if removed.is_some() {
            self.len -= 1;
            if cells.is_empty() {
                self.worlds.remove(pos.world.as_str());
            }
        }
        removed
    }

    #[inline]
    pub fn get(&self, pos: &ChunkPos) -> Option<&T> {
        self.get_at(&pos.world, pos.x, pos.z)
    }

    #[inline]
    pub fn get_at(&self, world: &str, x: i32, z: i32) -> Option<&T> {
        self.worlds.get(world)?.get(&(x, z))
    }

    pub fn get_mut(&mut self, pos: &ChunkPos) -> Option<&mut T> {
        self.worlds.get_mut(pos.world.as_str())?.get_mut(&(pos.x, pos.z))
    }

    /// Values stored in the eight chunks adjacent to `pos`
    pub fn query_neighbors<'a>(&'a self, pos: &ChunkPos) -> impl Iterator<Item = &'a T> + 'a {
        let cells = self.worlds.get(pos.world.as_str());
        let (cx, cz) = (pos.x, pos.z);

        ChunkPos::neighbor_offsets()
            .filter_map(move |(dx, dz)| cells?.get(&(cx.checked_add(dx)?, cz.checked_add(dz)?)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for ChunkGrid<T> {
    fn default() -> Self {
        Self::new()
    }
}
