//! Chunk coordinates and sparse chunk lookup

pub mod chunk;
pub mod sparse_hash;

pub use chunk::{ChunkPos, CHUNK_SIZE, MAX_CHUNK_COORD};
pub use sparse_hash::ChunkGrid;
