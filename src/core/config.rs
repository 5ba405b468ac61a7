//! Territory configuration with documented defaults
//!
//! Loaded from a TOML file; every section is optional and falls back to the
//! defaults below. The config is constructed once by the host and passed to the
//! services that need it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collab::ClaimSettings;
use crate::core::error::{Result, TerritoryError};
use crate::sigil::naming::validate_name;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerritoryConfig {
    pub claims: ClaimConfig,
    pub storage: StorageConfig,
    pub repair: RepairConfig,
    /// Guilds known to the bundled in-memory roster
    pub guilds: Vec<GuildSeed>,
    /// Worlds known to the bundled flat world view
    pub worlds: Vec<WorldSeed>,
}

/// Claim and sigil settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Hard cap on chunks per guild, applied on top of the member-derived cap
    pub max_units_per_guild: u32,

    /// Seconds between teleports for one player. 0 disables the cooldown.
    pub teleport_cooldown_secs: u64,

    /// Prefix for generated sigil names ("Sigil" gives "Sigil-1", "Sigil-2", ...)
    pub sigil_name_prefix: String,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_units_per_guild: 10,
            teleport_cooldown_secs: 60,
            sigil_name_prefix: "Sigil".to_string(),
        }
    }
}

impl ClaimSettings for ClaimConfig {
    fn configured_max_units_per_owner(&self) -> u32 {
        self.max_units_per_guild
    }

    fn teleport_cooldown_seconds(&self) -> u64 {
        self.teleport_cooldown_secs
    }

    fn sigil_name_prefix(&self) -> &str {
        &self.sigil_name_prefix
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("territory.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Run orphan repair right after the index is loaded
    pub on_startup: bool,

    /// Also split sigils whose chunks are no longer connected
    pub split_disconnected: bool,

    /// Minimum number of affected territories before grouping runs in parallel
    pub parallel_threshold: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            split_disconnected: false,
            parallel_threshold: 64,
        }
    }
}

/// Guild entry for the bundled roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildSeed {
    pub id: Uuid,
    pub name: String,
    pub leader: Uuid,
    pub members: u32,
}

/// World entry for the bundled flat world view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSeed {
    pub name: String,
    #[serde(default = "default_min_y")]
    pub min_y: i32,
    #[serde(default = "default_max_y")]
    pub max_y: i32,
    #[serde(default = "default_ground_y")]
    pub ground_y: i32,
}

fn default_min_y() -> i32 {
    -64
}

fn default_max_y() -> i32 {
    320
}

fn default_ground_y() -> i32 {
    64
}

impl TerritoryConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate TOML config text
    pub fn parse(content: &str) -> Result<Self> {
        let config: TerritoryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        let sample = format!("{}-{}", self.claims.sigil_name_prefix, 99);
        if let Err(reason) = validate_name(&sample) {
            return Err(TerritoryError::Config(format!(
                "sigil_name_prefix '{}' does not produce valid names: {}",
                self.claims.sigil_name_prefix, reason
            )));
        }

        for world in &self.worlds {
            if world.min_y >= world.max_y {
                return Err(TerritoryError::Config(format!(
                    "world '{}': min_y ({}) must be below max_y ({})",
                    world.name, world.min_y, world.max_y
                )));
            }
            if world.ground_y < world.min_y || world.ground_y >= world.max_y {
                return Err(TerritoryError::Config(format!(
                    "world '{}': ground_y ({}) must lie in [{}, {})",
                    world.name, world.ground_y, world.min_y, world.max_y
                )));
            }
        }

        Ok(())
    }
}
