//! Planning of chunk releases
//!
//! A release never re-splits sigils. It only keeps sigil rows consistent with
//! the chunks that remain: emptied sigils are dropped and a sigil whose marker
//! stood in a released chunk moves to its earliest remaining chunk.

use ahash::AHashSet;

use crate::core::types::ChunkId;
use crate::storage::ReleasePlan;
use crate::territory::model::{ClaimedChunk, Sigil, Territory};

/// A release plan together with the records it touches
#[derive(Debug, Clone)]
pub struct ReleaseWork {
    pub plan: ReleasePlan,
    /// Released chunks, in release order
    pub chunks: Vec<ClaimedChunk>,
    pub dropped: Vec<Sigil>,
    /// (before, after) for every sigil whose marker moves
    pub relocated: Vec<(Sigil, Sigil)>,
}

impl ReleaseWork {
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }
}

/// Plan the release of `release` from `territory`. Ids the territory does not
/// hold are skipped.
pub fn plan_release(territory: &Territory, release: &[ChunkId]) -> ReleaseWork {
    let mut plan = ReleasePlan::new(territory.id);
    let mut seen = AHashSet::new();
    let chunks: Vec<ClaimedChunk> = release
        .iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| territory.chunk(*id).cloned())
        .collect();

    if chunks.is_empty() {
        return ReleaseWork {
            plan,
            chunks,
            dropped: Vec::new(),
            relocated: Vec::new(),
        };
    }

    plan.chunks = chunks.iter().map(|c| c.id).collect();

    if chunks.len() == territory.chunk_count() {
        plan.delete_territory = true;
        let dropped: Vec<Sigil> = territory.sigils.values().cloned().collect();
        plan.drop_sigils = dropped.iter().map(|s| s.id).collect();
        return ReleaseWork {
            plan,
            chunks,
            dropped,
            relocated: Vec::new(),
        };
    }

    let released: AHashSet<ChunkId> = plan.chunks.iter().copied().collect();
    let mut dropped = Vec::new();
    let mut relocated = Vec::new();

    for sigil in territory.sigils.values() {
        let remaining: Vec<&ClaimedChunk> = territory
            .chunks_for_sigil(sigil.id)
            .into_iter()
            .filter(|c| !released.contains(&c.id))
            .collect();

        let Some(earliest) = remaining.first() else {
            dropped.push(sigil.clone());
            continue;
        };

        let marker_chunk = sigil.location.chunk();
        let marker_released = chunks.iter().any(|c| c.pos == marker_chunk);
        if marker_released {
            let mut after = sigil.clone();
            after.location = earliest.seed_location();
            relocated.push((sigil.clone(), after));
        }
    }

    plan.drop_sigils = dropped.iter().map(|s| s.id).collect();
    plan.relocations = relocated
        .iter()
        .map(|(_, after)| (after.id, after.location.clone()))
        .collect();

    ReleaseWork {
        plan,
        chunks,
        dropped,
        relocated,
    }
}
