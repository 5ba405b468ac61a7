//! Closed outcome types for territory operations

use std::fmt;

use serde::Serialize;

use crate::core::types::{ChunkId, SigilId};
use crate::sigil::naming::NameError;
use crate::spatial::ChunkPos;
use crate::territory::model::{ClaimedChunk, Sigil};

/// Either the operation happened, or it was refused for an expected reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, F> {
    Done(T),
    Denied(F),
}

impl<T, F> Outcome<T, F> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(&self) -> Option<&T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Denied(_) => None,
        }
    }

    pub fn denial(&self) -> Option<&F> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Denied(reason) => Some(reason),
        }
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Denied(_) => None,
        }
    }
}

/// Why a claim or release was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerritoryFailure {
    OwnerNotFound,
    NotAuthorized,
    BelowMinimumMembers { members: u32, required: u32 },
    ConfiguredCapReached { cap: u32 },
    MemberDerivedCapReached { allowed: u32 },
    OverlapsOtherOwner(String),
    OutOfBounds(ChunkPos),
    NotOwned,
    AlreadyClaimed,
    UnitNotFound(u32),
    InvalidSigilName(NameError),
    SigilNameTaken(String),
}

impl fmt::Display for TerritoryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerritoryFailure::OwnerNotFound => write!(f, "guild does not exist"),
            TerritoryFailure::NotAuthorized => write!(f, "only the guild leader can do that"),
            TerritoryFailure::BelowMinimumMembers { members, required } => write!(
                f,
                "guild has {} members, {} are needed to hold territory",
                members, required
            ),
            TerritoryFailure::ConfiguredCapReached { cap } => {
                write!(f, "guild already holds the maximum of {} chunks", cap)
            }
            TerritoryFailure::MemberDerivedCapReached { allowed } => {
                write!(f, "guild membership only supports {} chunks", allowed)
            }
            TerritoryFailure::OverlapsOtherOwner(owner) => {
                write!(f, "chunk is already claimed by {}", owner)
            }
            TerritoryFailure::OutOfBounds(pos) => write!(f, "chunk {} is outside the claimable area", pos),
            TerritoryFailure::NotOwned => write!(f, "guild has no territory"),
            TerritoryFailure::AlreadyClaimed => write!(f, "guild already holds this chunk"),
            TerritoryFailure::UnitNotFound(ordinal) => write!(f, "no chunk #{} in territory", ordinal),
            TerritoryFailure::InvalidSigilName(reason) => write!(f, "invalid sigil name: {}", reason),
            TerritoryFailure::SigilNameTaken(name) => write!(f, "sigil name '{}' is taken", name),
        }
    }
}

/// A committed claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimedUnit {
    pub chunk: ClaimedChunk,
    /// Sigil the chunk now belongs to
    pub sigil: Sigil,
    pub is_new_sigil: bool,
    /// Sigils absorbed into `sigil` by this claim
    pub merged_sigil_ids: Vec<SigilId>,
    /// Orphan chunks connected to the claim that now belong to `sigil`
    pub adopted_chunks: Vec<ChunkId>,
}

/// Chunks removed by a release or shrink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleasedUnits {
    pub chunks: Vec<ClaimedChunk>,
    pub removed_sigils: Vec<SigilId>,
    pub relocated_sigils: Vec<SigilId>,
    pub territory_deleted: bool,
}

impl ReleasedUnits {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && !self.territory_deleted
    }
}

pub type ClaimResult = Outcome<ClaimedUnit, TerritoryFailure>;
pub type ReleaseResult = Outcome<ReleasedUnits, TerritoryFailure>;
