//! Sigil assignment and connected-group partitioning
//!
//! Everything here is a pure function over chunk positions: no storage access,
//! no index access. Grouping is a breadth-first traversal over an arena of
//! indices into the input slice, using a [`ChunkGrid`] for neighbour lookups.

use std::collections::{BTreeSet, VecDeque};

use crate::core::types::SigilId;
use crate::spatial::{ChunkGrid, ChunkPos};
use crate::territory::model::ClaimedChunk;

/// How a newly claimed chunk joins the existing sigils of its territory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigilAssignment {
    /// No adjacent chunk belongs to a sigil; a new sigil is needed
    NewGroup,
    /// Every adjacent chunk belongs to this sigil
    ExtendsGroup(SigilId),
    /// Adjacent chunks span several sigils. All of them (ascending, survivor
    /// included) collapse into `survivor`, the lowest id.
    MergesGroups {
        sigils: Vec<SigilId>,
        survivor: SigilId,
    },
}

impl SigilAssignment {
    /// Sigils that disappear when this assignment is applied
    pub fn absorbed(&self) -> Vec<SigilId> {
        match self {
            SigilAssignment::MergesGroups { sigils, survivor } => {
                sigils.iter().copied().filter(|id| id != survivor).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Decide the sigil for a chunk about to be claimed at `candidate`.
///
/// `existing` should only contain chunks whose sigil is valid for the territory;
/// chunks without a sigil are ignored.
pub fn resolve_assignment<'a>(
    existing: impl IntoIterator<Item = &'a ClaimedChunk>,
    candidate: &ChunkPos,
) -> SigilAssignment {
    resolve_group_assignment(existing, &[candidate])
}

/// Like [`resolve_assignment`] for a connected group of positions that will
/// share one sigil: every sigil touching any of them takes part.
pub fn resolve_group_assignment<'a>(
    existing: impl IntoIterator<Item = &'a ClaimedChunk>,
    group: &[&ChunkPos],
) -> SigilAssignment {
    let adjacent: BTreeSet<SigilId> = existing
        .into_iter()
        .filter(|chunk| group.iter().any(|pos| chunk.pos.is_adjacent(pos)))
        .filter_map(|chunk| chunk.sigil)
        .collect();

    let mut ids = adjacent.into_iter();
    match (ids.next(), ids.next()) {
        (None, _) => SigilAssignment::NewGroup,
        (Some(only), None) => SigilAssignment::ExtendsGroup(only),
        (Some(first), Some(second)) => {
            let mut sigils = vec![first, second];
            sigils.extend(ids);
            SigilAssignment::MergesGroups {
                sigils,
                survivor: first,
            }
        }
    }
}

/// Partition positions into connected groups.
///
/// Returns groups of indices into the input; each group is sorted ascending and
/// groups are ordered by their smallest index. Repeated positions land in the
/// same group.
pub fn connected_groups<'a>(positions: impl IntoIterator<Item = &'a ChunkPos>) -> Vec<Vec<usize>> {
    let positions: Vec<&ChunkPos> = positions.into_iter().collect();

    let mut grid: ChunkGrid<Vec<usize>> = ChunkGrid::new();
    for (index, pos) in positions.iter().enumerate() {
        match grid.get_mut(pos) {
            Some(cell) => cell.push(index),
            None => {
                grid.insert(pos, vec![index]);
            }
        }
    }

    let mut visited = vec![false; positions.len()];
    let mut groups = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..positions.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let mut group = Vec::new();
        while let Some(index) = queue.pop_front() {
            group.push(index);
            let pos = positions[index];

            let same_cell = grid.get(pos).into_iter().flatten();
            let around = grid.query_neighbors(pos).flatten();
            for &next in same_cell.chain(around) {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        group.sort_unstable();
        groups.push(group);
    }

    groups
}

/// True when all positions form a single group (or there are none)
pub fn is_connected<'a>(positions: impl IntoIterator<Item = &'a ChunkPos>) -> bool {
    connected_groups(positions).len() <= 1
}

/// Orphans reachable from `candidate` through adjacent orphans, oldest first
pub fn connected_orphans<'a>(orphans: &[&'a ClaimedChunk], candidate: &ChunkPos) -> Vec<&'a ClaimedChunk> {
    let positions = std::iter::once(candidate).chain(orphans.iter().map(|chunk| &chunk.pos));
    let Some(first) = connected_groups(positions).into_iter().next() else {
        return Vec::new();
    };
    // Index 0 is the candidate, so the first group is the one holding it
    let mut reached: Vec<&ClaimedChunk> = first.into_iter().skip(1).map(|i| orphans[i - 1]).collect();
    reached.sort_by_key(|chunk| chunk.insertion_order);
    reached
}

/// Group chunk records by connectivity, each group ordered oldest first
pub fn partition_chunks<'a>(chunks: &[&'a ClaimedChunk]) -> Vec<Vec<&'a ClaimedChunk>> {
    connected_groups(chunks.iter().map(|chunk| &chunk.pos))
        .into_iter()
        .map(|indices| {
            let mut group: Vec<&ClaimedChunk> = indices.into_iter().map(|i| chunks[i]).collect();
            group.sort_by_key(|chunk| chunk.insertion_order);
            group
        })
        .collect()
}
