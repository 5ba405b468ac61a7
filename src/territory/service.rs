//! Claim, release and shrink of guild territory
//!
//! Every mutation runs under the owner's lock as validate, persist, patch
//! index, touch markers. A failed store write returns before the index or any
//! marker is touched.

use std::sync::Arc;

use chrono::Utc;

use crate::collab::Collaborators;
use crate::core::error::{Result, TerritoryError};
use crate::core::types::{ChunkId, GuildId, PlayerId};
use crate::sigil::naming::validate_name;
use crate::spatial::ChunkPos;
use crate::storage::{ClaimPlan, PlannedSigil, SigilDraft, StoreError, TerritoryStore};
use crate::territory::capacity::{allowed_units, CapacitySummary, MIN_MEMBERS};
use crate::territory::connectivity::{connected_orphans, resolve_group_assignment, SigilAssignment};
use crate::territory::index::SharedIndex;
use crate::territory::locks::OwnerLocks;
use crate::territory::model::{ClaimedChunk, Sigil, SigilLocation, Territory};
use crate::territory::outcome::{
    ClaimResult, ClaimedUnit, Outcome, ReleaseResult, ReleasedUnits, TerritoryFailure,
};
use crate::territory::release::{plan_release, ReleaseWork};

/// A request to claim one chunk for a guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub owner: GuildId,
    pub pos: ChunkPos,
    pub requester: PlayerId,
    /// Name for the sigil, used only when the claim founds a new one
    pub sigil_name: Option<String>,
}

impl ClaimRequest {
    pub fn new(owner: GuildId, requester: PlayerId, pos: ChunkPos) -> Self {
        Self {
            owner,
            pos,
            requester,
            sigil_name: None,
        }
    }

    pub fn with_sigil_name(mut self, name: impl Into<String>) -> Self {
        self.sigil_name = Some(name.into());
        self
    }
}

/// A claim decided under the owner lock, not yet written
struct ClaimDraft {
    plan: ClaimPlan,
    /// Existing sigil the chunk joins
    joins: Option<Sigil>,
    absorbed: Vec<Sigil>,
}


pub struct TerritoryService {
    index: SharedIndex,
    store: Arc<dyn TerritoryStore>,
    locks: Arc<OwnerLocks>,
    collab: Collaborators,
}

impl TerritoryService {
    pub fn new(
        index: SharedIndex,
        store: Arc<dyn TerritoryStore>,
        locks: Arc<OwnerLocks>,
        collab: Collaborators,
    ) -> Self {
        Self {
            index,
            store,
            locks,
            collab,
        }
    }

    pub(crate) fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub(crate) fn store(&self) -> &Arc<dyn TerritoryStore> {
        &self.store
    }

    pub(crate) fn locks(&self) -> &Arc<OwnerLocks> {
        &self.locks
    }

    pub(crate) fn collab(&self) -> &Collaborators {
        &self.collab
    }

    pub(crate) fn ensure_loaded(&self) -> Result<()> {
        if self.index.read().is_loaded() {
            Ok(())
        } else {
            Err(TerritoryError::IndexNotLoaded)
        }
    }

    // === Claim ===

    pub fn claim(&self, request: ClaimRequest) -> Result<ClaimResult> {
        self.ensure_loaded()?;
        let _guard = self.locks.lock(request.owner);

        if let Some(failure) = self.check_claim(&request) {
            tracing::debug!(owner = %request.owner, pos = %request.pos, %failure, "claim denied");
            return Ok(Outcome::Denied(failure));
        }

        let marker_elevation = self.marker_elevation(&request.pos)?;
        let draft = match self.draft_claim(&request, marker_elevation) {
            Ok(draft) => draft,
            Err(failure) => return Ok(Outcome::Denied(failure)),
        };

        let commit = match self.store.commit_claim(&draft.plan) {
            Ok(commit) => commit,
            Err(StoreError::ChunkTaken(pos)) => {
                tracing::warn!(owner = %request.owner, %pos, "chunk taken by a concurrent writer");
                let failure = self
                    .overlap_failure(request.owner, &pos)
                    .unwrap_or_else(|| TerritoryFailure::OverlapsOtherOwner("another guild".to_string()));
                return Ok(Outcome::Denied(failure));
            }
            Err(StoreError::SigilNameTaken(name)) => {
                return Ok(Outcome::Denied(TerritoryFailure::SigilNameTaken(name)));
            }
            Err(err) => return Err(err.into()),
        };

        let owner = request.owner;
        let Some(target) = commit.created_sigil.as_ref().or(draft.joins.as_ref()).map(|s| s.id) else {
            return Err(StoreError::Corrupt(format!("claim of {} committed without a sigil", request.pos)).into());
        };
        {
            let mut index = self.index.write();
            if commit.territory_created {
                index.insert_territory(Territory::new(commit.territory, owner, draft.plan.claimed_at));
            }
            if let Some(created) = &commit.created_sigil {
                index.add_anchor(owner, created.clone());
            }
            if let Some(survivor) = &draft.joins {
                for absorbed in &draft.absorbed {
                    let moved: Vec<ChunkId> = index
                        .territory(owner)
                        .map(|t| t.chunks_for_sigil(absorbed.id).iter().map(|c| c.id).collect())
                        .unwrap_or_default();
                    for chunk in moved {
                        index.update_unit_anchor(owner, chunk, Some(survivor.id));
                    }
                    index.remove_anchor(owner, absorbed.id);
                }
            }
            for chunk in &draft.plan.adopt {
                index.update_unit_anchor(owner, *chunk, Some(target));
            }
            index.add_unit(owner, commit.chunk.clone());
        }

        let (sigil, is_new_sigil) = match (commit.created_sigil, draft.joins) {
            (Some(created), _) => (created, true),
            (None, Some(existing)) => (existing, false),
            (None, None) => {
                return Err(StoreError::Corrupt(format!("claim of {} committed without a sigil", request.pos)).into())
            }
        };

        let markers = &self.collab.markers;
        if is_new_sigil {
            markers.place_marker(&sigil.location.world, sigil.location.block());
        }
        for absorbed in &draft.absorbed {
            markers.remove_marker(&absorbed.location.world, absorbed.location.block());
        }

        let merged_sigil_ids: Vec<_> = draft.absorbed.iter().map(|s| s.id).collect();
        tracing::info!(
            %owner,
            pos = %request.pos,
            sigil = %sigil.id,
            new_sigil = is_new_sigil,
            merged = merged_sigil_ids.len(),
            adopted = draft.plan.adopt.len(),
            "chunk claimed"
        );

        Ok(Outcome::Done(ClaimedUnit {
            chunk: commit.chunk,
            sigil,
            is_new_sigil,
            merged_sigil_ids,
            adopted_chunks: draft.plan.adopt,
        }))
    }

    fn check_claim(&self, request: &ClaimRequest) -> Option<TerritoryFailure> {
        let guilds = &self.collab.guilds;
        if guilds.get_owner(request.owner).is_none() {
            return Some(TerritoryFailure::OwnerNotFound);
        }
        if !guilds.is_leader(request.owner, request.requester) {
            return Some(TerritoryFailure::NotAuthorized);
        }

        if !request.pos.in_bounds() {
            return Some(TerritoryFailure::OutOfBounds(request.pos.clone()));
        }

        let members = guilds.member_count(request.owner);
        if members < MIN_MEMBERS {
            return Some(TerritoryFailure::BelowMinimumMembers {
                members,
                required: MIN_MEMBERS,
            });
        }

        let used = self.used_units(request.owner);
        let cap = self.collab.settings.configured_max_units_per_owner();
        if used >= cap {
            return Some(TerritoryFailure::ConfiguredCapReached { cap });
        }
        let allowed = allowed_units(members, cap);
        if used >= allowed {
            return Some(TerritoryFailure::MemberDerivedCapReached { allowed });
        }

        self.overlap_failure(request.owner, &request.pos)
    }

    fn overlap_failure(&self, owner: GuildId, pos: &ChunkPos) -> Option<TerritoryFailure> {
        let holder = self.index.read().owner_at(pos)?;
        if holder == owner {
            Some(TerritoryFailure::AlreadyClaimed)
        } else {
            Some(TerritoryFailure::OverlapsOtherOwner(self.collab.guild_name(holder)))
        }
    }

    /// One block above the surface at the chunk centre
    fn marker_elevation(&self, pos: &ChunkPos) -> Result<i32> {
        let world = &self.collab.world;
        if !world.is_loaded(&pos.world) {
            return Err(TerritoryError::WorldNotLoaded(pos.world.clone()));
        }
        let centre = pos.center_block(0);
        let surface = world
            .surface_y(&pos.world, centre.x, centre.z)
            .or_else(|| world.height_range(&pos.world).map(|(min_y, _)| min_y - 1))
            .unwrap_or(0);
        Ok(surface + 1)
    }

    fn draft_claim(
        &self,
        request: &ClaimRequest,
        marker_elevation: i32,
    ) -> std::result::Result<ClaimDraft, TerritoryFailure> {
        let index = self.index.read();
        let territory = index.territory(request.owner);

        // Orphans connected to the claim join its sigil, so sigils touching
        // them take part in the assignment as well
        let adopted: Vec<&ClaimedChunk> = territory
            .map(|t| connected_orphans(&t.orphan_chunks(), &request.pos))
            .unwrap_or_default();
        let assignment = match territory {
            Some(t) => {
                let group: Vec<&ChunkPos> = std::iter::once(&request.pos)
                    .chain(adopted.iter().map(|c| &c.pos))
                    .collect();
                resolve_group_assignment(
                    t.chunks
                        .values()
                        .filter(|c| c.sigil.map_or(false, |id| t.sigils.contains_key(&id))),
                    &group,
                )
            }
            None => SigilAssignment::NewGroup,
        };
        tracing::debug!(
            owner = %request.owner,
            pos = %request.pos,
            ?assignment,
            adopted = adopted.len(),
            "sigil assignment"
        );

        let claimed_at = Utc::now();
        let absorbed_ids = assignment.absorbed();
        let lookup = |id| territory.and_then(|t| t.sigil(id)).cloned();

        let (sigil, joins, absorbed) = match assignment {
            SigilAssignment::NewGroup => {
                let name = self.new_sigil_name(territory, request.sigil_name.as_deref())?;
                let location = SigilLocation::new(
                    request.pos.world.clone(),
                    request.pos.center_block(marker_elevation),
                );
                let draft = SigilDraft {
                    name,
                    location,
                    created_at: claimed_at,
                };
                (PlannedSigil::Create(draft), None, Vec::new())
            }
            SigilAssignment::ExtendsGroup(id) => (PlannedSigil::Attach(id), lookup(id), Vec::new()),
            SigilAssignment::MergesGroups { survivor, .. } => {
                let absorbed: Vec<Sigil> = absorbed_ids.iter().filter_map(|id| lookup(*id)).collect();
                let planned = PlannedSigil::Merge {
                    survivor,
                    absorbed: absorbed_ids,
                };
                (planned, lookup(survivor), absorbed)
            }
        };

        let plan = ClaimPlan {
            owner: request.owner,
            territory: territory.map(|t| t.id),
            pos: request.pos.clone(),
            marker_elevation,
            insertion_order: territory.map_or(1, |t| t.next_insertion_order()),
            claimed_at,
            sigil,
            adopt: adopted.iter().map(|c| c.id).collect(),
        };

        Ok(ClaimDraft {
            plan,
            joins,
            absorbed,
        })
    }

    fn new_sigil_name(
        &self,
        territory: Option<&Territory>,
        hint: Option<&str>,
    ) -> std::result::Result<String, TerritoryFailure> {
        match hint {
            Some(name) => {
                validate_name(name).map_err(TerritoryFailure::InvalidSigilName)?;
                if territory.and_then(|t| t.sigil_by_name(name)).is_some() {
                    return Err(TerritoryFailure::SigilNameTaken(name.to_string()));
                }
                Ok(name.to_string())
            }
            None => {
                let prefix = self.collab.settings.sigil_name_prefix();
                Ok(match territory {
                    Some(t) => t.next_default_sigil_name(prefix),
                    None => format!("{}-1", prefix),
                })
            }
        }
    }

    // === Release ===

    /// Release the chunk whose insertion order is `ordinal`
    pub fn release_one(&self, owner: GuildId, ordinal: u32, requester: PlayerId) -> Result<ReleaseResult> {
        self.release_selected(owner, requester, |territory| {
            territory
                .chunk_by_ordinal(ordinal)
                .map(|c| vec![c.id])
                .ok_or(TerritoryFailure::UnitNotFound(ordinal))
        })
    }

    pub fn release_at(&self, owner: GuildId, pos: &ChunkPos, requester: PlayerId) -> Result<ReleaseResult> {
        self.release_selected(owner, requester, |territory| {
            territory
                .chunk_at(pos)
                .map(|c| vec![c.id])
                .ok_or(TerritoryFailure::NotOwned)
        })
    }

    pub fn release_all(&self, owner: GuildId, requester: PlayerId) -> Result<ReleaseResult> {
        self.release_selected(owner, requester, |territory| {
            Ok(newest_first(territory))
        })
    }

    fn release_selected<F>(&self, owner: GuildId, requester: PlayerId, select: F) -> Result<ReleaseResult>
    where
        F: FnOnce(&Territory) -> std::result::Result<Vec<ChunkId>, TerritoryFailure>,
    {
        self.ensure_loaded()?;
        let guard = self.locks.lock(owner);

        if self.collab.guilds.get_owner(owner).is_none() {
            return Ok(Outcome::Denied(TerritoryFailure::OwnerNotFound));
        }
        if !self.collab.guilds.is_leader(owner, requester) {
            return Ok(Outcome::Denied(TerritoryFailure::NotAuthorized));
        }

        let work = {
            let index = self.index.read();
            let Some(territory) = index.territory(owner) else {
                return Ok(Outcome::Denied(TerritoryFailure::NotOwned));
            };
            match select(territory) {
                Ok(ids) => plan_release(territory, &ids),
                Err(failure) => return Ok(Outcome::Denied(failure)),
            }
        };

        let released = self.apply_release(owner, work)?;
        drop(guard);
        self.after_release(owner, &released);
        Ok(Outcome::Done(released))
    }

    /// Remove chunks newest first until `target` remain. System-triggered.
    pub fn shrink_to(&self, owner: GuildId, target: u32) -> Result<ReleaseResult> {
        self.ensure_loaded()?;
        let guard = self.locks.lock(owner);
        let result = self.shrink_locked(owner, target)?;
        drop(guard);
        if let Outcome::Done(released) = &result {
            self.after_release(owner, released);
        }
        Ok(result)
    }

    fn shrink_locked(&self, owner: GuildId, target: u32) -> Result<ReleaseResult> {
        let (work, before) = {
            let index = self.index.read();
            let Some(territory) = index.territory(owner) else {
                return Ok(Outcome::Denied(TerritoryFailure::NotOwned));
            };
            let excess = territory.chunk_count().saturating_sub(target as usize);
            let ids: Vec<ChunkId> = newest_first(territory).into_iter().take(excess).collect();
            (plan_release(territory, &ids), territory.chunk_count())
        };

        if work.is_empty() {
            return Ok(Outcome::Done(ReleasedUnits::default()));
        }
        tracing::info!(%owner, from = before, to = target, "shrinking territory");
        Ok(Outcome::Done(self.apply_release(owner, work)?))
    }

    /// Shrink a guild whose membership no longer supports its chunk count
    pub fn enforce_capacity(&self, owner: GuildId) -> Result<ReleaseResult> {
        self.ensure_loaded()?;
        let guard = self.locks.lock(owner);

        let summary = self.capacity_summary(owner);
        if !summary.over_capacity() {
            return Ok(Outcome::Done(ReleasedUnits::default()));
        }

        tracing::info!(%owner, ?summary, "guild over capacity");
        let result = self.shrink_locked(owner, summary.allowed)?;
        drop(guard);
        if let Outcome::Done(released) = &result {
            self.after_release(owner, released);
        }
        Ok(result)
    }

    /// Delete everything a dissolved guild held
    pub fn on_guild_dissolved(&self, owner: GuildId) -> Result<ReleasedUnits> {
        self.ensure_loaded()?;
        let guard = self.locks.lock(owner);

        let work = {
            let index = self.index.read();
            match index.territory(owner) {
                Some(territory) => plan_release(territory, &newest_first(territory)),
                None => return Ok(ReleasedUnits::default()),
            }
        };

        let released = self.apply_release(owner, work)?;
        drop(guard);
        self.after_release(owner, &released);
        tracing::info!(%owner, chunks = released.chunks.len(), "dissolved guild territory removed");
        Ok(released)
    }

    /// Persist a planned release, then patch the index and markers.
    /// The caller holds the owner lock.
    pub(crate) fn apply_release(&self, owner: GuildId, work: ReleaseWork) -> Result<ReleasedUnits> {
        if work.is_empty() {
            return Ok(ReleasedUnits::default());
        }
        self.store.commit_release(&work.plan)?;

        let ReleaseWork {
            plan,
            chunks,
            dropped,
            relocated,
        } = work;

        {
            let mut index = self.index.write();
            if plan.delete_territory {
                index.remove_territory(owner);
            } else {
                for chunk in &chunks {
                    index.remove_unit(owner, chunk.id);
                }
                for sigil in &dropped {
                    index.remove_anchor(owner, sigil.id);
                }
                for (_, after) in &relocated {
                    index.replace_anchor(owner, after.clone());
                }
            }
        }

        let markers = &self.collab.markers;
        for sigil in &dropped {
            markers.remove_marker(&sigil.location.world, sigil.location.block());
        }
        for (before, after) in &relocated {
            markers.remove_marker(&before.location.world, before.location.block());
            markers.place_marker(&after.location.world, after.location.block());
        }

        tracing::info!(
            %owner,
            chunks = chunks.len(),
            dropped_sigils = dropped.len(),
            relocated_sigils = relocated.len(),
            territory_deleted = plan.delete_territory,
            "chunks released"
        );

        Ok(ReleasedUnits {
            chunks,
            removed_sigils: dropped.iter().map(|s| s.id).collect(),
            relocated_sigils: relocated.iter().map(|(_, after)| after.id).collect(),
            territory_deleted: plan.delete_territory,
        })
    }

    /// Call after the owner lock is dropped
    pub(crate) fn after_release(&self, owner: GuildId, released: &ReleasedUnits) {
        if released.territory_deleted {
            self.locks.forget(owner);
        }
    }

    // === Queries ===

    pub fn territory(&self, owner: GuildId) -> Option<Territory> {
        self.index.read().territory(owner).cloned()
    }

    pub fn chunk_at(&self, pos: &ChunkPos) -> Option<ClaimedChunk> {
        self.index.read().find_at(pos).cloned()
    }

    pub fn owner_at(&self, pos: &ChunkPos) -> Option<GuildId> {
        self.index.read().owner_at(pos)
    }

    pub fn can_claim_more(&self, owner: GuildId) -> bool {
        self.capacity(owner).map_or(false, |c| c.remaining() > 0)
    }

    /// `None` for unknown guilds
    pub fn capacity(&self, owner: GuildId) -> Option<CapacitySummary> {
        self.collab.guilds.get_owner(owner)?;
        Some(self.capacity_summary(owner))
    }

    fn capacity_summary(&self, owner: GuildId) -> CapacitySummary {
        let members = self.collab.guilds.member_count(owner);
        let configured_max = self.collab.settings.configured_max_units_per_owner();
        CapacitySummary {
            members,
            used: self.used_units(owner),
            allowed: allowed_units(members, configured_max),
            configured_max,
        }
    }

    fn used_units(&self, owner: GuildId) -> u32 {
        let count = self.index.read().territory(owner).map_or(0, |t| t.chunk_count());
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

fn newest_first(territory: &Territory) -> Vec<ChunkId> {
    territory.chunks_by_insertion_desc().iter().map(|c| c.id).collect()
}
