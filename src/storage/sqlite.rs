//! SQLite-backed territory store

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use crate::core::types::{ChunkId, GuildId, SigilId, TerritoryId};
use crate::spatial::ChunkPos;
use crate::storage::{
    ClaimCommit, ClaimPlan, PlannedSigil, ReleasePlan, SigilDraft, StoreError, TerritoryStore,
};
use crate::territory::model::{name_key, ClaimedChunk, Sigil, SigilLocation, Territory};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS territories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS territory_anchors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        territory_id INTEGER NOT NULL REFERENCES territories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        name_key TEXT NOT NULL,
        world_name TEXT NOT NULL,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        z INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (territory_id, name_key)
    );

    CREATE TABLE IF NOT EXISTS territory_units (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        territory_id INTEGER NOT NULL REFERENCES territories(id) ON DELETE CASCADE,
        world_name TEXT NOT NULL,
        grid_x INTEGER NOT NULL,
        grid_z INTEGER NOT NULL,
        marker_elevation INTEGER NOT NULL,
        insertion_order INTEGER NOT NULL,
        anchor_id INTEGER REFERENCES territory_anchors(id) ON DELETE SET NULL,
        added_at TEXT NOT NULL,
        UNIQUE (world_name, grid_x, grid_z)
    );

    CREATE INDEX IF NOT EXISTS idx_units_territory ON territory_units(territory_id);
    CREATE INDEX IF NOT EXISTS idx_units_anchor ON territory_units(anchor_id);
    CREATE INDEX IF NOT EXISTS idx_anchors_territory ON territory_anchors(territory_id);
";

/// Territory store over a single SQLite connection
#[derive(Debug)]
pub struct SqliteTerritoryStore {
    conn: Mutex<Connection>,
}

impl SqliteTerritoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', ?1)",
            params![Utc::now()],
        )?;
        Ok(())
    }
}

impl TerritoryStore for SqliteTerritoryStore {
    fn load_all(&self) -> Result<Vec<Territory>, StoreError> {
        let conn = self.conn.lock();
        let mut territories: BTreeMap<TerritoryId, Territory> = BTreeMap::new();

        let mut stmt = conn.prepare("SELECT id, owner_id, created_at FROM territories ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, DateTime<Utc>>(2)?,
            ))
        })?;
        for row in rows {
            let (id, owner, created_at) = row?;
            let owner = Uuid::parse_str(&owner)
                .map_err(|err| StoreError::Corrupt(format!("territory {} owner '{}': {}", id, owner, err)))?;
            territories.insert(
                TerritoryId(id),
                Territory::new(TerritoryId(id), GuildId(owner), created_at),
            );
        }

        let mut stmt = conn.prepare(
            "SELECT id, territory_id, name, world_name, x, y, z, created_at
             FROM territory_anchors ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Sigil {
                id: SigilId(row.get(0)?),
                territory: TerritoryId(row.get(1)?),
                name: row.get(2)?,
                location: SigilLocation {
                    world: row.get(3)?,
                    x: row.get(4)?,
                    y: row.get(5)?,
                    z: row.get(6)?,
                },
                created_at: row.get(7)?,
            })
        })?;
        for row in rows {
            let sigil = row?;
            match territories.get_mut(&sigil.territory) {
                Some(territory) => {
                    territory.sigils.insert(sigil.id, sigil);
                }
                None => tracing::warn!(sigil = %sigil.id, "sigil row without territory"),
            }
        }

        let mut stmt = conn.prepare(
            "SELECT id, territory_id, world_name, grid_x, grid_z, marker_elevation,
                    insertion_order, anchor_id, added_at
             FROM territory_units ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ClaimedChunk {
                id: ChunkId(row.get(0)?),
                territory: TerritoryId(row.get(1)?),
                pos: ChunkPos::new(row.get::<_, String>(2)?, row.get(3)?, row.get(4)?),
                marker_elevation: row.get(5)?,
                insertion_order: row.get(6)?,
                sigil: row.get::<_, Option<i64>>(7)?.map(SigilId),
                added_at: row.get(8)?,
            })
        })?;
        for row in rows {
            let chunk = row?;
            match territories.get_mut(&chunk.territory) {
                Some(territory) => {
                    territory.chunks.insert(chunk.id, chunk);
                }
                None => tracing::warn!(chunk = %chunk.id, "chunk row without territory"),
            }
        }

        Ok(territories.into_values().collect())
    }

    fn commit_claim(&self, plan: &ClaimPlan) -> Result<ClaimCommit, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let (territory, territory_created) = match plan.territory {
            Some(id) => (id, false),
            None => {
                tx.execute(
                    "INSERT INTO territories (owner_id, created_at) VALUES (?1, ?2)",
                    params![plan.owner.0.to_string(), plan.claimed_at],
                )?;
                (TerritoryId(tx.last_insert_rowid()), true)
            }
        };

        let (sigil, created_sigil) = match &plan.sigil {
            PlannedSigil::Create(draft) => {
                let sigil = insert_sigil(&tx, territory, draft)?;
                (sigil.id, Some(sigil))
            }
            PlannedSigil::Attach(id) => (*id, None),
            PlannedSigil::Merge { survivor, absorbed } => {
                for loser in absorbed {
                    tx.execute(
                        "UPDATE territory_units SET anchor_id = ?1 WHERE anchor_id = ?2",
                        params![survivor.0, loser.0],
                    )?;
                    tx.execute("DELETE FROM territory_anchors WHERE id = ?1", params![loser.0])?;
                }
                (*survivor, None)
            }
        };

        tx.execute(
            "INSERT INTO territory_units (
                territory_id, world_name, grid_x, grid_z, marker_elevation,
                insertion_order, anchor_id, added_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                territory.0,
                plan.pos.world.as_str(),
                plan.pos.x,
                plan.pos.z,
                plan.marker_elevation,
                plan.insertion_order,
                sigil.0,
                plan.claimed_at,
            ],
        )
        .map_err(|err| unique_violation_or(err, || StoreError::ChunkTaken(plan.pos.clone())))?;
        let chunk_id = ChunkId(tx.last_insert_rowid());

        for orphan in &plan.adopt {
            tx.execute(
                "UPDATE territory_units SET anchor_id = ?1 WHERE id = ?2 AND territory_id = ?3",
                params![sigil.0, orphan.0, territory.0],
            )?;
        }

        let chunk = ClaimedChunk {
            id: chunk_id,
            territory,
            pos: plan.pos.clone(),
            marker_elevation: plan.marker_elevation,
            insertion_order: plan.insertion_order,
            sigil: Some(sigil),
            added_at: plan.claimed_at,
        };

        tx.commit()?;

        Ok(ClaimCommit {
            territory,
            territory_created,
            chunk,
            created_sigil,
        })
    }

    fn commit_release(&self, plan: &ReleasePlan) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if plan.delete_territory {
            // Units and anchors go with the territory through ON DELETE CASCADE
            tx.execute("DELETE FROM territories WHERE id = ?1", params![plan.territory.0])?;
        } else {
            for chunk in &plan.chunks {
                tx.execute(
                    "DELETE FROM territory_units WHERE id = ?1 AND territory_id = ?2",
                    params![chunk.0, plan.territory.0],
                )?;
            }
            for sigil in &plan.drop_sigils {
                tx.execute(
                    "DELETE FROM territory_anchors WHERE id = ?1 AND territory_id = ?2",
                    params![sigil.0, plan.territory.0],
                )?;
            }
            for (sigil, location) in &plan.relocations {
                update_location(&tx, *sigil, location)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn rename_sigil(&self, sigil: SigilId, name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE territory_anchors SET name = ?1, name_key = ?2 WHERE id = ?3",
            params![name, name_key(name), sigil.0],
        )
        .map_err(|err| unique_violation_or(err, || StoreError::SigilNameTaken(name.to_string())))?;
        Ok(())
    }

    fn move_sigil(&self, sigil: SigilId, location: &SigilLocation) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        update_location(&tx, sigil, location)?;
        tx.commit()?;
        Ok(())
    }

    fn found_sigil(
        &self,
        territory: TerritoryId,
        draft: &SigilDraft,
        chunks: &[ChunkId],
    ) -> Result<Sigil, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let sigil = insert_sigil(&tx, territory, draft)?;
        for chunk in chunks {
            tx.execute(
                "UPDATE territory_units SET anchor_id = ?1 WHERE id = ?2 AND territory_id = ?3",
                params![sigil.id.0, chunk.0, territory.0],
            )?;
        }

        tx.commit()?;
        Ok(sigil)
    }

    fn detach_chunks(&self, chunks: &[ChunkId]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for chunk in chunks {
            tx.execute(
                "UPDATE territory_units SET anchor_id = NULL WHERE id = ?1",
                params![chunk.0],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn insert_sigil(
    tx: &Transaction<'_>,
    territory: TerritoryId,
    draft: &SigilDraft,
) -> Result<Sigil, StoreError> {
    tx.execute(
        "INSERT INTO territory_anchors (
            territory_id, name, name_key, world_name, x, y, z, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            territory.0,
            draft.name.as_str(),
            name_key(&draft.name),
            draft.location.world.as_str(),
            draft.location.x,
            draft.location.y,
            draft.location.z,
            draft.created_at,
        ],
    )
    .map_err(|err| unique_violation_or(err, || StoreError::SigilNameTaken(draft.name.clone())))?;

    Ok(Sigil {
        id: SigilId(tx.last_insert_rowid()),
        territory,
        name: draft.name.clone(),
        location: draft.location.clone(),
        created_at: draft.created_at,
    })
}

fn update_location(
    tx: &Transaction<'_>,
    sigil: SigilId,
    location: &SigilLocation,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE territory_anchors SET world_name = ?1, x = ?2, y = ?3, z = ?4 WHERE id = ?5",
        params![location.world.as_str(), location.x, location.y, location.z, sigil.0],
    )?;
    Ok(())
}

/// Map a UNIQUE constraint failure to a domain error, pass anything else through
fn unique_violation_or(err: rusqlite::Error, domain: impl FnOnce() -> StoreError) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            domain()
        }
        _ => StoreError::Sqlite(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BlockPos;

    fn draft(name: &str, x: i32, z: i32) -> SigilDraft {
        SigilDraft {
            name: name.to_string(),
            location: SigilLocation::new("w", BlockPos::new(x * 16 + 8, 65, z * 16 + 8)),
            created_at: Utc::now(),
        }
    }

    fn claim_plan(owner: GuildId, territory: Option<TerritoryId>, x: i32, z: i32, order: u32, sigil: PlannedSigil) -> ClaimPlan {
        ClaimPlan {
            owner,
            territory,
            pos: ChunkPos::new("w", x, z),
            marker_elevation: 65,
            insertion_order: order,
            claimed_at: Utc::now(),
            sigil,
            adopt: Vec::new(),
        }
    }

    #[test]
    fn test_claim_creates_territory_and_sigil() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let owner = GuildId::new();

        let commit = store
            .commit_claim(&claim_plan(owner, None, 0, 0, 1, PlannedSigil::Create(draft("Home", 0, 0))))
            .unwrap();
        assert!(commit.territory_created);
        let sigil = commit.created_sigil.unwrap();
        assert_eq!(commit.chunk.sigil, Some(sigil.id));

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].owner, owner);
        assert_eq!(loaded[0].chunk_count(), 1);
        assert_eq!(loaded[0].sigil_by_name("home").map(|s| s.id), Some(sigil.id));
    }

    #[test]
    fn test_duplicate_chunk_is_rejected_and_rolled_back() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        store
            .commit_claim(&claim_plan(GuildId::new(), None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();

        let err = store
            .commit_claim(&claim_plan(GuildId::new(), None, 0, 0, 1, PlannedSigil::Create(draft("B", 0, 0))))
            .unwrap_err();
        assert!(matches!(err, StoreError::ChunkTaken(_)));

        // The second territory and its sigil were rolled back with the chunk
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sigil_count(), 1);
    }

    #[test]
    fn test_merge_moves_chunks_to_survivor() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let owner = GuildId::new();

        let first = store
            .commit_claim(&claim_plan(owner, None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();
        let territory = first.territory;
        let a = first.created_sigil.unwrap().id;
        let b = store
            .commit_claim(&claim_plan(owner, Some(territory), 2, 0, 2, PlannedSigil::Create(draft("B", 2, 0))))
            .unwrap()
            .created_sigil
            .unwrap()
            .id;

        store
            .commit_claim(&claim_plan(
                owner,
                Some(territory),
                1,
                0,
                3,
                PlannedSigil::Merge { survivor: a, absorbed: vec![b] },
            ))
            .unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].sigil_count(), 1);
        assert!(loaded[0].chunks.values().all(|c| c.sigil == Some(a)));
    }

    #[test]
    fn test_claim_adopts_orphans_in_same_transaction() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let owner = GuildId::new();
        let first = store
            .commit_claim(&claim_plan(owner, None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();
        store.detach_chunks(&[first.chunk.id]).unwrap();

        let mut plan = claim_plan(owner, Some(first.territory), 1, 0, 2, PlannedSigil::Create(draft("B", 1, 0)));
        plan.adopt = vec![first.chunk.id];
        let second = store.commit_claim(&plan).unwrap();
        let sigil = second.created_sigil.unwrap().id;

        let loaded = store.load_all().unwrap();
        assert!(loaded[0].orphan_chunks().is_empty());
        assert_eq!(loaded[0].chunk(first.chunk.id).unwrap().sigil, Some(sigil));
    }

    #[test]
    fn test_sigil_names_unique_per_territory_ignoring_case() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let owner = GuildId::new();
        let commit = store
            .commit_claim(&claim_plan(owner, None, 0, 0, 1, PlannedSigil::Create(draft("Keep", 0, 0))))
            .unwrap();
        let second = store
            .commit_claim(&claim_plan(owner, Some(commit.territory), 5, 5, 2, PlannedSigil::Create(draft("Gate", 5, 5))))
            .unwrap()
            .created_sigil
            .unwrap();

        let err = store.rename_sigil(second.id, "KEEP").unwrap_err();
        assert!(matches!(err, StoreError::SigilNameTaken(_)));

        // Another guild may reuse the name
        let other = store
            .commit_claim(&claim_plan(GuildId::new(), None, 9, 9, 1, PlannedSigil::Create(draft("keep", 9, 9))))
            .unwrap();
        assert!(other.created_sigil.is_some());
    }

    #[test]
    fn test_release_and_territory_cascade() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let owner = GuildId::new();
        let commit = store
            .commit_claim(&claim_plan(owner, None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();
        let sigil = commit.created_sigil.unwrap().id;
        let second = store
            .commit_claim(&claim_plan(owner, Some(commit.territory), 1, 0, 2, PlannedSigil::Attach(sigil)))
            .unwrap();

        let mut plan = ReleasePlan::new(commit.territory);
        plan.chunks.push(second.chunk.id);
        store.commit_release(&plan).unwrap();
        assert_eq!(store.load_all().unwrap()[0].chunk_count(), 1);

        let mut plan = ReleasePlan::new(commit.territory);
        plan.delete_territory = true;
        store.commit_release(&plan).unwrap();
        assert!(store.load_all().unwrap().is_empty());

        // Cascade left nothing behind, so the chunk can be claimed again
        store
            .commit_claim(&claim_plan(GuildId::new(), None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();
    }

    #[test]
    fn test_found_and_detach() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let owner = GuildId::new();
        let commit = store
            .commit_claim(&claim_plan(owner, None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();

        store.detach_chunks(&[commit.chunk.id]).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].orphan_chunks().len(), 1);

        let sigil = store
            .found_sigil(commit.territory, &draft("B", 0, 0), &[commit.chunk.id])
            .unwrap();
        let loaded = store.load_all().unwrap();
        assert!(loaded[0].orphan_chunks().is_empty());
        assert_eq!(loaded[0].chunk(commit.chunk.id).and_then(|c| c.sigil), Some(sigil.id));
    }

    #[test]
    fn test_move_sigil_persists_location() {
        let store = SqliteTerritoryStore::open_in_memory().unwrap();
        let commit = store
            .commit_claim(&claim_plan(GuildId::new(), None, 0, 0, 1, PlannedSigil::Create(draft("A", 0, 0))))
            .unwrap();
        let sigil = commit.created_sigil.unwrap();
        let target = SigilLocation::new("w", BlockPos::new(3, 80, 4));
        store.move_sigil(sigil.id, &target).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].sigil(sigil.id).map(|s| s.location.clone()), Some(target));
    }
}
