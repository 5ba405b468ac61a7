//! Repair of legacy territory data
//!
//! `run` gives every orphan chunk a sigil: orphans are grouped by adjacency and
//! each group gets a fresh sigil seeded at its earliest chunk. Chunks with a
//! valid sigil are never touched, so a second run is a no-op.
//!
//! `split_disconnected` restores connectivity after LIFO shrinks: every sigil
//! keeps the group holding its marker and the other groups are detached and
//! handed to `run`.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::core::error::Result;
use crate::core::types::{ChunkId, GuildId};
use crate::storage::SigilDraft;
use crate::territory::connectivity::partition_chunks;
use crate::territory::model::Territory;
use crate::territory::service::TerritoryService;

/// Counters for one repair pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub territories_scanned: usize,
    pub orphans_found: usize,
    pub sigils_created: usize,
    pub sigils_split: usize,
    pub chunks_detached: usize,
}

impl RepairReport {
    pub fn merge(&mut self, other: RepairReport) {
        self.territories_scanned = self.territories_scanned.max(other.territories_scanned);
        self.orphans_found += other.orphans_found;
        self.sigils_created += other.sigils_created;
        self.sigils_split += other.sigils_split;
        self.chunks_detached += other.chunks_detached;
    }

    pub fn changed_anything(&self) -> bool {
        self.sigils_created > 0 || self.chunks_detached > 0
    }
}

/// Orphan chunks of a territory, grouped by adjacency, each group oldest first
pub fn orphan_groups(territory: &Territory) -> Vec<Vec<ChunkId>> {
    partition_chunks(&territory.orphan_chunks())
        .into_iter()
        .map(|group| group.iter().map(|c| c.id).collect())
        .collect()
}

/// Chunks to detach so every sigil of `territory` is connected again.
/// Returns the detached chunk ids and the number of sigils that were split.
pub fn disconnected_chunks(territory: &Territory) -> (Vec<ChunkId>, usize) {
    let mut detached = Vec::new();
    let mut split = 0;

    for sigil in territory.sigils.values() {
        let chunks = territory.chunks_for_sigil(sigil.id);
        let groups = partition_chunks(&chunks);
        if groups.len() < 2 {
            continue;
        }

        let marker = sigil.location.chunk();
        // Groups are ordered by their earliest chunk, so group 0 is the fallback
        let keep = groups
            .iter()
            .position(|group| group.iter().any(|c| c.pos == marker))
            .unwrap_or(0);

        split += 1;
        for (i, group) in groups.iter().enumerate() {
            if i != keep {
                detached.extend(group.iter().map(|c| c.id));
            }
        }
    }

    (detached, split)
}

fn sorted(mut ids: Vec<ChunkId>) -> Vec<ChunkId> {
    ids.sort();
    ids
}

pub struct SigilRepair {
    territories: Arc<TerritoryService>,
    parallel_threshold: usize,
}

impl SigilRepair {
    pub fn new(territories: Arc<TerritoryService>, parallel_threshold: usize) -> Self {
        Self {
            territories,
            parallel_threshold,
        }
    }

    /// Plan `f` over every territory, in parallel above the threshold
    fn plan_all<T, F>(&self, f: F) -> (usize, Vec<(GuildId, T)>)
    where
        T: Send,
        F: Fn(&Territory) -> Option<T> + Sync + Send,
    {
        let index = self.territories.index().read();
        let territories: Vec<&Territory> = index.territories().collect();
        let scanned = territories.len();

        let plans = if territories.len() >= self.parallel_threshold {
            territories
                .par_iter()
                .filter_map(|&t| f(t).map(|plan| (t.owner, plan)))
                .collect()
        } else {
            territories
                .iter()
                .filter_map(|&t| f(t).map(|plan| (t.owner, plan)))
                .collect()
        };
        (scanned, plans)
    }

    pub fn run(&self) -> Result<RepairReport> {
        self.territories.ensure_loaded()?;

        let (scanned, plans) = self.plan_all(|t| {
            let groups = orphan_groups(t);
            (!groups.is_empty()).then_some(groups)
        });

        let mut report = RepairReport {
            territories_scanned: scanned,
            ..RepairReport::default()
        };
        if !plans.is_empty() {
            tracing::warn!(territories = plans.len(), "found territories with orphan chunks");
        }

        for (owner, planned) in plans {
            self.repair_owner(owner, planned, &mut report)?;
        }

        tracing::info!(
            scanned = report.territories_scanned,
            orphans = report.orphans_found,
            created = report.sigils_created,
            "orphan repair finished"
        );
        Ok(report)
    }

    fn repair_owner(&self, owner: GuildId, planned: Vec<Vec<ChunkId>>, report: &mut RepairReport) -> Result<()> {
        let service = &self.territories;
        let _guard = service.locks().lock(owner);

        let groups = {
            let index = service.index().read();
            let Some(territory) = index.territory(owner) else {
                return Ok(());
            };
            let current = sorted(territory.orphan_chunks().iter().map(|c| c.id).collect());
            let planned_ids = sorted(planned.iter().flatten().copied().collect());
            if current == planned_ids {
                planned
            } else {
                tracing::debug!(%owner, "territory changed since planning, regrouping");
                orphan_groups(territory)
            }
        };

        report.orphans_found += groups.iter().map(Vec::len).sum::<usize>();
        let prefix = service.collab().settings.sigil_name_prefix().to_string();

        for group in groups {
            let (territory_id, draft) = {
                let index = service.index().read();
                let Some(territory) = index.territory(owner) else {
                    return Ok(());
                };
                let Some(seed) = group.first().and_then(|id| territory.chunk(*id)) else {
                    continue;
                };
                let draft = SigilDraft {
                    name: territory.next_default_sigil_name(&prefix),
                    location: seed.seed_location(),
                    created_at: chrono::Utc::now(),
                };
                (territory.id, draft)
            };

            let sigil = service.store().found_sigil(territory_id, &draft, &group)?;
            {
                let mut index = service.index().write();
                index.add_anchor(owner, sigil.clone());
                for chunk in &group {
                    index.update_unit_anchor(owner, *chunk, Some(sigil.id));
                }
            }
            service
                .collab()
                .markers
                .place_marker(&sigil.location.world, sigil.location.block());

            report.sigils_created += 1;
            tracing::info!(%owner, sigil = %sigil.id, name = %sigil.name, chunks = group.len(), "orphan group repaired");
        }
        Ok(())
    }

    /// Detach the disconnected parts of every sigil, then repair them as orphans
    pub fn split_disconnected(&self) -> Result<RepairReport> {
        self.territories.ensure_loaded()?;

        let (scanned, plans) = self.plan_all(|t| {
            let (detached, _) = disconnected_chunks(t);
            (!detached.is_empty()).then_some(())
        });

        let mut report = RepairReport {
            territories_scanned: scanned,
            ..RepairReport::default()
        };

        let service = &self.territories;
        for (owner, ()) in plans {
            let _guard = service.locks().lock(owner);
            let (detached, split) = {
                let index = service.index().read();
                match index.territory(owner) {
                    Some(territory) => disconnected_chunks(territory),
                    None => continue,
                }
            };
            if detached.is_empty() {
                continue;
            }

            service.store().detach_chunks(&detached)?;
            {
                let mut index = service.index().write();
                for chunk in &detached {
                    index.update_unit_anchor(owner, *chunk, None);
                }
            }

            report.sigils_split += split;
            report.chunks_detached += detached.len();
            tracing::info!(%owner, sigils = split, chunks = detached.len(), "disconnected sigils split");
        }

        report.merge(self.run()?);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BlockPos, SigilId, TerritoryId};
    use crate::spatial::ChunkPos;
    use crate::territory::model::{ClaimedChunk, Sigil, SigilLocation};
    use chrono::Utc;

    fn chunk(id: i64, x: i32, z: i32, sigil: Option<i64>) -> ClaimedChunk {
        ClaimedChunk {
            id: ChunkId(id),
            territory: TerritoryId(1),
            pos: ChunkPos::new("w", x, z),
            marker_elevation: 65,
            insertion_order: id as u32,
            sigil: sigil.map(SigilId),
            added_at: Utc::now(),
        }
    }

    fn territory(chunks: Vec<ClaimedChunk>, sigils: &[(i64, i32, i32)]) -> Territory {
        let mut territory = Territory::new(TerritoryId(1), GuildId::new(), Utc::now());
        for c in chunks {
            territory.chunks.insert(c.id, c);
        }
        for &(id, x, z) in sigils {
            territory.sigils.insert(
                SigilId(id),
                Sigil {
                    id: SigilId(id),
                    territory: TerritoryId(1),
                    name: format!("Sigil-{}", id),
                    location: SigilLocation::new("w", BlockPos::new(x * 16 + 8, 65, z * 16 + 8)),
                    created_at: Utc::now(),
                },
            );
        }
        territory
    }

    #[test]
    fn test_orphan_groups_ignore_valid_chunks() {
        let t = territory(
            vec![
                chunk(1, 0, 0, Some(1)),
                chunk(2, 1, 0, None),
                chunk(3, 2, 0, None),
                chunk(4, 9, 9, Some(77)),
            ],
            &[(1, 0, 0)],
        );
        assert_eq!(orphan_groups(&t), vec![vec![ChunkId(2), ChunkId(3)], vec![ChunkId(4)]]);
    }

    #[test]
    fn test_disconnected_keeps_marker_group() {
        // Sigil 1 marker sits in the later group at (5,0)
        let t = territory(
            vec![
                chunk(1, 0, 0, Some(1)),
                chunk(2, 1, 0, Some(1)),
                chunk(3, 5, 0, Some(1)),
            ],
            &[(1, 5, 0)],
        );
        let (detached, split) = disconnected_chunks(&t);
        assert_eq!(split, 1);
        assert_eq!(detached, vec![ChunkId(1), ChunkId(2)]);
    }

    #[test]
    fn test_disconnected_falls_back_to_earliest_group() {
        let t = territory(
            vec![chunk(1, 0, 0, Some(1)), chunk(2, 5, 0, Some(1))],
            &[(1, 40, 40)],
        );
        let (detached, _) = disconnected_chunks(&t);
        assert_eq!(detached, vec![ChunkId(2)]);
    }

    #[test]
    fn test_connected_sigils_are_left_alone() {
        let t = territory(
            vec![chunk(1, 0, 0, Some(1)), chunk(2, 1, 1, Some(1))],
            &[(1, 0, 0)],
        );
        assert_eq!(disconnected_chunks(&t), (Vec::new(), 0));
    }

    #[test]
    fn test_report_merge() {
        let mut report = RepairReport {
            territories_scanned: 3,
            chunks_detached: 2,
            sigils_split: 1,
            ..RepairReport::default()
        };
        report.merge(RepairReport {
            territories_scanned: 3,
            orphans_found: 2,
            sigils_created: 1,
            ..RepairReport::default()
        });
        assert_eq!(report.territories_scanned, 3);
        assert_eq!(report.orphans_found, 2);
        assert!(report.changed_anything());
    }
}
