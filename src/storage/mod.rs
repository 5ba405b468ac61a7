//! Persistence of territories, chunks and sigils
//!
//! Each `TerritoryStore` method is one atomic unit: either every row change it
//! describes is committed, or none is.

pub mod sqlite;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::types::{ChunkId, GuildId, SigilId, TerritoryId};
use crate::spatial::ChunkPos;
use crate::territory::model::{ClaimedChunk, Sigil, SigilLocation, Territory};

pub use sqlite::SqliteTerritoryStore;

/// Errors raised by a territory store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The uniqueness constraint on (world, x, z) rejected the write
    #[error("chunk {0} is already claimed")]
    ChunkTaken(ChunkPos),

    /// The per-territory sigil name constraint rejected the write
    #[error("sigil name '{0}' is already taken")]
    SigilNameTaken(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A sigil that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigilDraft {
    pub name: String,
    pub location: SigilLocation,
    pub created_at: DateTime<Utc>,
}

/// Sigil side of a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedSigil {
    /// Create a sigil and attach the new chunk to it
    Create(SigilDraft),
    /// Attach the new chunk to an existing sigil
    Attach(SigilId),
    /// Move every chunk of `absorbed` to `survivor`, delete `absorbed`, attach the
    /// new chunk to `survivor`
    Merge {
        survivor: SigilId,
        absorbed: Vec<SigilId>,
    },
}

/// Everything a successful claim writes
#[derive(Debug, Clone)]
pub struct ClaimPlan {
    pub owner: GuildId,
    /// `None` creates the territory in the same transaction
    pub territory: Option<TerritoryId>,
    pub pos: ChunkPos,
    pub marker_elevation: i32,
    pub insertion_order: u32,
    pub claimed_at: DateTime<Utc>,
    pub sigil: PlannedSigil,
    /// Orphan chunks assigned to the claim's sigil in the same transaction
    pub adopt: Vec<ChunkId>,
}

/// Rows created by a committed claim
#[derive(Debug, Clone)]
pub struct ClaimCommit {
    pub territory: TerritoryId,
    pub territory_created: bool,
    pub chunk: ClaimedChunk,
    pub created_sigil: Option<Sigil>,
}

/// Everything a release, shrink or sigil deletion writes
#[derive(Debug, Clone)]
pub struct ReleasePlan {
    pub territory: TerritoryId,
    pub chunks: Vec<ChunkId>,
    /// Sigils left without chunks
    pub drop_sigils: Vec<SigilId>,
    /// Surviving sigils whose marker stood in a released chunk
    pub relocations: Vec<(SigilId, SigilLocation)>,
    /// Remove the territory row and everything under it
    pub delete_territory: bool,
}

impl ReleasePlan {
    pub fn new(territory: TerritoryId) -> Self {
        Self {
            territory,
            chunks: Vec::new(),
            drop_sigils: Vec::new(),
            relocations: Vec::new(),
            delete_territory: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
            && self.drop_sigils.is_empty()
            && self.relocations.is_empty()
            && !self.delete_territory
    }
}

/// Relational store behind the territory index
pub trait TerritoryStore: Send + Sync {
    /// Every territory with its chunks and sigils
    fn load_all(&self) -> Result<Vec<Territory>, StoreError>;

    fn commit_claim(&self, plan: &ClaimPlan) -> Result<ClaimCommit, StoreError>;

    fn commit_release(&self, plan: &ReleasePlan) -> Result<(), StoreError>;

    fn rename_sigil(&self, sigil: SigilId, name: &str) -> Result<(), StoreError>;

    fn move_sigil(&self, sigil: SigilId, location: &SigilLocation) -> Result<(), StoreError>;

    /// Create a sigil and assign the given chunks to it
    fn found_sigil(
        &self,
        territory: TerritoryId,
        draft: &SigilDraft,
        chunks: &[ChunkId],
    ) -> Result<Sigil, StoreError>;

    /// Clear the sigil of the given chunks
    fn detach_chunks(&self, chunks: &[ChunkId]) -> Result<(), StoreError>;
}
