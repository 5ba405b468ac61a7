//! Guild Sigils - guild territory claims grouped under named sigils

pub mod collab;
pub mod core;
pub mod engine;
pub mod repair;
pub mod sigil;
pub mod spatial;
pub mod storage;
pub mod territory;

pub use engine::{EngineStatus, TerritoryEngine};
