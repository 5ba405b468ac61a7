//! Sigil lifecycle: rename, relocate, delete, lookup and teleport

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{Result, TerritoryError};
use crate::core::types::{GuildId, PlayerId, SigilId};
use crate::sigil::naming::{validate_name, NameError};
use crate::sigil::teleport::{find_safe_location, CooldownTracker, TeleportResult};
use crate::storage::StoreError;
use crate::territory::model::{Sigil, SigilLocation, Territory};
use crate::territory::outcome::{Outcome, ReleasedUnits};
use crate::territory::release::plan_release;
use crate::territory::service::TerritoryService;

/// Why a sigil operation was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigilFailure {
    SigilNotFound,
    NotAuthorized,
    InvalidName(NameError),
    NameTaken(String),
    /// The new marker position is not inside one of the sigil's chunks
    OutsideSigil,
}

impl fmt::Display for SigilFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigilFailure::SigilNotFound => write!(f, "no such sigil"),
            SigilFailure::NotAuthorized => write!(f, "only the guild leader can do that"),
            SigilFailure::InvalidName(reason) => write!(f, "invalid sigil name: {}", reason),
            SigilFailure::NameTaken(name) => write!(f, "sigil name '{}' is taken", name),
            SigilFailure::OutsideSigil => write!(f, "location is outside the sigil's chunks"),
        }
    }
}

pub type RenameResult = Outcome<Sigil, SigilFailure>;
pub type RelocateResult = Outcome<Sigil, SigilFailure>;
pub type DeleteResult = Outcome<ReleasedUnits, SigilFailure>;

pub struct SigilService {
    territories: Arc<TerritoryService>,
    cooldowns: CooldownTracker,
}

impl SigilService {
    pub fn new(territories: Arc<TerritoryService>) -> Self {
        Self {
            territories,
            cooldowns: CooldownTracker::new(),
        }
    }

    pub fn rename(
        &self,
        sigil: SigilId,
        new_name: &str,
        owner: GuildId,
        requester: PlayerId,
    ) -> Result<RenameResult> {
        self.territories.ensure_loaded()?;
        let _guard = self.territories.locks().lock(owner);

        let current = {
            let index = self.territories.index().read();
            let current = match self.authorize(index.territory(owner), sigil, owner, requester) {
                Ok(current) => current.clone(),
                Err(failure) => return Ok(Outcome::Denied(failure)),
            };
            if let Err(reason) = validate_name(new_name) {
                return Ok(Outcome::Denied(SigilFailure::InvalidName(reason)));
            }
            let clash = index
                .territory(owner)
                .and_then(|t| t.sigil_by_name(new_name))
                .filter(|other| other.id != sigil);
            if clash.is_some() {
                return Ok(Outcome::Denied(SigilFailure::NameTaken(new_name.to_string())));
            }
            current
        };

        match self.territories.store().rename_sigil(sigil, new_name) {
            Ok(()) => {}
            Err(StoreError::SigilNameTaken(name)) => return Ok(Outcome::Denied(SigilFailure::NameTaken(name))),
            Err(err) => return Err(err.into()),
        }

        let mut renamed = current;
        let previous = std::mem::replace(&mut renamed.name, new_name.to_string());
        self.territories.index().write().replace_anchor(owner, renamed.clone());

        tracing::info!(%owner, %sigil, from = %previous, to = new_name, "sigil renamed");
        Ok(Outcome::Done(renamed))
    }

    /// Move a sigil's marker within the sigil's own chunks
    pub fn relocate(
        &self,
        sigil: SigilId,
        location: SigilLocation,
        owner: GuildId,
        requester: PlayerId,
    ) -> Result<RelocateResult> {
        self.territories.ensure_loaded()?;
        let _guard = self.territories.locks().lock(owner);

        let current = {
            let index = self.territories.index().read();
            let territory = index.territory(owner);
            let current = match self.authorize(territory, sigil, owner, requester) {
                Ok(current) => current.clone(),
                Err(failure) => return Ok(Outcome::Denied(failure)),
            };
            let target = location.chunk();
            let inside = territory
                .map(|t| t.chunks_for_sigil(sigil).iter().any(|c| c.pos == target))
                .unwrap_or(false);
            if !inside {
                return Ok(Outcome::Denied(SigilFailure::OutsideSigil));
            }
            current
        };

        self.territories.store().move_sigil(sigil, &location)?;

        let mut moved = current.clone();
        moved.location = location;
        self.territories.index().write().replace_anchor(owner, moved.clone());

        let markers = &self.territories.collab().markers;
        markers.remove_marker(&current.location.world, current.location.block());
        markers.place_marker(&moved.location.world, moved.location.block());

        tracing::info!(%owner, %sigil, to = %moved.location.block(), "sigil relocated");
        Ok(Outcome::Done(moved))
    }

    /// Release every chunk of a sigil and drop the sigil with its marker
    pub fn delete(&self, sigil: SigilId, owner: GuildId, requester: PlayerId) -> Result<DeleteResult> {
        self.territories.ensure_loaded()?;
        let guard = self.territories.locks().lock(owner);

        let work = {
            let index = self.territories.index().read();
            let territory = index.territory(owner);
            let current = match self.authorize(territory, sigil, owner, requester) {
                Ok(current) => current.clone(),
                Err(failure) => return Ok(Outcome::Denied(failure)),
            };
            let Some(territory) = territory else {
                return Ok(Outcome::Denied(SigilFailure::SigilNotFound));
            };
            let chunks: Vec<_> = territory.chunks_for_sigil(sigil).iter().map(|c| c.id).collect();
            let mut work = plan_release(territory, &chunks);
            if !work.plan.drop_sigils.contains(&sigil) {
                // A sigil without chunks still has to go
                work.plan.drop_sigils.push(sigil);
                work.dropped.push(current);
            }
            work
        };

        let released = self.territories.apply_release(owner, work)?;
        drop(guard);
        self.territories.after_release(owner, &released);

        tracing::info!(%owner, %sigil, chunks = released.chunks.len(), "sigil deleted");
        Ok(Outcome::Done(released))
    }

    pub fn teleport_to(&self, subject: PlayerId, sigil: &Sigil) -> Result<TeleportResult> {
        let collab = self.territories.collab();
        let world_name = sigil.location.world.as_str();
        if !collab.world.is_loaded(world_name) {
            return Err(TerritoryError::WorldNotLoaded(world_name.to_string()));
        }

        let cooldown = Duration::from_secs(collab.settings.teleport_cooldown_seconds());
        let attempt = self.cooldowns.try_use(subject, cooldown, Instant::now(), || {
            find_safe_location(collab.world.as_ref(), world_name, sigil.location.block())
        });

        match attempt {
            Err(remaining_secs) => Ok(TeleportResult::OnCooldown { remaining_secs }),
            Ok(Some(destination)) => {
                tracing::debug!(%subject, sigil = %sigil.id, %destination, "teleport destination found");
                Ok(TeleportResult::Teleported {
                    world: world_name.to_string(),
                    destination,
                })
            }
            Ok(None) => {
                tracing::debug!(%subject, sigil = %sigil.id, "no safe teleport location");
                Ok(TeleportResult::NoSafeLocation)
            }
        }
    }

    /// Case-insensitive exact lookup within one guild's territory
    pub fn resolve_by_name(&self, owner: GuildId, name: &str) -> Option<Sigil> {
        let index = self.territories.index().read();
        index.territory(owner)?.sigil_by_name(name).cloned()
    }

    pub fn get(&self, sigil: SigilId) -> Option<Sigil> {
        self.territories.index().read().sigil(sigil).cloned()
    }

    /// Sigils of a guild, oldest first
    pub fn list(&self, owner: GuildId) -> Vec<Sigil> {
        let index = self.territories.index().read();
        index
            .territory(owner)
            .map(|t| t.sigils.values().cloned().collect())
            .unwrap_or_default()
    }

    fn authorize<'a>(
        &self,
        territory: Option<&'a Territory>,
        sigil: SigilId,
        owner: GuildId,
        requester: PlayerId,
    ) -> std::result::Result<&'a Sigil, SigilFailure> {
        let current = territory
            .and_then(|t| t.sigil(sigil))
            .ok_or(SigilFailure::SigilNotFound)?;
        if !self.territories.collab().guilds.is_leader(owner, requester) {
            return Err(SigilFailure::NotAuthorized);
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Collaborators, FlatWorld, GuildInfo, GuildRoster, MarkerJournal};
    use crate::core::config::ClaimConfig;
    use crate::core::types::BlockPos;
    use crate::spatial::ChunkPos;
    use crate::storage::SqliteTerritoryStore;
    use crate::territory::index::TerritoryIndex;
    use crate::territory::locks::OwnerLocks;
    use crate::territory::service::ClaimRequest;

    struct Fixture {
        territories: Arc<TerritoryService>,
        sigils: SigilService,
        markers: Arc<MarkerJournal>,
        guild: GuildInfo,
    }

    fn fixture(cooldown_secs: u64) -> Fixture {
        let roster = Arc::new(GuildRoster::new());
        let guild = roster.found("Ironbound", 50);
        let markers = Arc::new(MarkerJournal::new());
        let settings = ClaimConfig {
            teleport_cooldown_secs: cooldown_secs,
            ..ClaimConfig::default()
        };
        let collab = Collaborators {
            guilds: roster,
            markers: markers.clone(),
            world: Arc::new(FlatWorld::new().with_world("w", -64, 320, 64)),
            settings: Arc::new(settings),
        };
        let index = TerritoryIndex::shared();
        index.write().reload(Vec::new());
        let store = Arc::new(SqliteTerritoryStore::open_in_memory().unwrap());
        let territories = Arc::new(TerritoryService::new(
            index,
            store,
            Arc::new(OwnerLocks::new()),
            collab,
        ));
        Fixture {
            sigils: SigilService::new(territories.clone()),
            territories,
            markers,
            guild,
        }
    }

    fn claim(f: &Fixture, x: i32, z: i32) -> Sigil {
        f.territories
            .claim(ClaimRequest::new(f.guild.id, f.guild.leader, ChunkPos::new("w", x, z)))
            .unwrap()
            .into_done()
            .unwrap()
            .sigil
    }

    #[test]
    fn test_rename_and_resolve() {
        let f = fixture(60);
        let sigil = claim(&f, 0, 0);
        let renamed = f
            .sigils
            .rename(sigil.id, "Harbor", f.guild.id, f.guild.leader)
            .unwrap()
            .into_done()
            .unwrap();
        assert_eq!(renamed.name, "Harbor");
        assert_eq!(f.sigils.resolve_by_name(f.guild.id, "harbor").map(|s| s.id), Some(sigil.id));
        assert!(f.sigils.resolve_by_name(f.guild.id, "Sigil-1").is_none());
    }

    #[test]
    fn test_rename_failures() {
        let f = fixture(60);
        let first = claim(&f, 0, 0);
        let second = claim(&f, 5, 5);

        let rename = |id, name: &str, requester| {
            f.sigils.rename(id, name, f.guild.id, requester).unwrap().denial().cloned()
        };
        assert_eq!(rename(SigilId(999), "X", f.guild.leader), Some(SigilFailure::SigilNotFound));
        assert_eq!(rename(first.id, "X", PlayerId::new()), Some(SigilFailure::NotAuthorized));
        assert_eq!(
            rename(first.id, "", f.guild.leader),
            Some(SigilFailure::InvalidName(NameError::Empty))
        );
        assert_eq!(
            rename(first.id, &second.name.to_uppercase(), f.guild.leader),
            Some(SigilFailure::NameTaken(second.name.to_uppercase()))
        );
        // Changing only the case of its own name is fine
        assert_eq!(rename(first.id, "SIGIL-1", f.guild.leader), None);
    }

    #[test]
    fn test_relocate_stays_inside_sigil() {
        let f = fixture(60);
        let sigil = claim(&f, 0, 0);
        claim(&f, 1, 0);

        let outside = SigilLocation::new("w", BlockPos::new(100, 65, 100));
        assert_eq!(
            f.sigils
                .relocate(sigil.id, outside, f.guild.id, f.guild.leader)
                .unwrap()
                .denial(),
            Some(&SigilFailure::OutsideSigil)
        );

        let inside = SigilLocation::new("w", BlockPos::new(20, 65, 4));
        let moved = f
            .sigils
            .relocate(sigil.id, inside.clone(), f.guild.id, f.guild.leader)
            .unwrap()
            .into_done()
            .unwrap();
        assert_eq!(moved.location, inside);
        assert!(f.markers.standing().contains(&("w".to_string(), BlockPos::new(20, 65, 4))));
        assert_eq!(f.markers.standing().len(), 1);
    }

    #[test]
    fn test_delete_releases_sigil_chunks() {
        let f = fixture(60);
        let kept = claim(&f, 0, 0);
        let doomed = claim(&f, 5, 5);
        claim(&f, 5, 6);

        let released = f
            .sigils
            .delete(doomed.id, f.guild.id, f.guild.leader)
            .unwrap()
            .into_done()
            .unwrap();
        assert_eq!(released.chunks.len(), 2);
        assert_eq!(released.removed_sigils, vec![doomed.id]);

        let territory = f.territories.territory(f.guild.id).unwrap();
        assert_eq!(territory.chunk_count(), 1);
        assert_eq!(f.sigils.list(f.guild.id).iter().map(|s| s.id).collect::<Vec<_>>(), vec![kept.id]);
        assert!(f.sigils.get(doomed.id).is_none());
    }

    #[test]
    fn test_teleport_sets_cooldown() {
        let f = fixture(60);
        let sigil = claim(&f, 0, 0);
        let player = PlayerId::new();

        assert_eq!(
            f.sigils.teleport_to(player, &sigil).unwrap(),
            TeleportResult::Teleported {
                world: "w".to_string(),
                destination: BlockPos::new(8, 65, 8),
            }
        );
        match f.sigils.teleport_to(player, &sigil).unwrap() {
            TeleportResult::OnCooldown { remaining_secs } => assert!((59..=60).contains(&remaining_secs)),
            other => panic!("expected cooldown, got {:?}", other),
        }
        // Cooldowns are per player
        assert!(matches!(
            f.sigils.teleport_to(PlayerId::new(), &sigil).unwrap(),
            TeleportResult::Teleported { .. }
        ));
    }

    #[test]
    fn test_parallel_teleports_share_one_cooldown() {
        use rayon::prelude::*;

        let f = fixture(60);
        let sigil = claim(&f, 0, 0);
        let player = PlayerId::new();
        let teleported = (0..16)
            .into_par_iter()
            .map(|_| f.sigils.teleport_to(player, &sigil).unwrap())
            .filter(|result| matches!(result, TeleportResult::Teleported { .. }))
            .count();
        assert_eq!(teleported, 1);
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let f = fixture(0);
        let sigil = claim(&f, 0, 0);
        let player = PlayerId::new();
        for _ in 0..3 {
            assert!(matches!(
                f.sigils.teleport_to(player, &sigil).unwrap(),
                TeleportResult::Teleported { .. }
            ));
        }
    }
}
