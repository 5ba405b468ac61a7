pub mod config;
pub mod error;
pub mod types;

pub use config::TerritoryConfig;
pub use error::{Result, TerritoryError};
