//! Wiring of index, store, locks and services with an explicit lifecycle
//!
//! The host constructs one engine, calls [`TerritoryEngine::start`] once the
//! store is reachable and [`TerritoryEngine::shutdown`] when it stops. Nothing
//! here is global: tests build as many isolated engines as they like.

use std::sync::Arc;

use serde::Serialize;

use crate::collab::Collaborators;
use crate::core::config::TerritoryConfig;
use crate::core::error::Result;
use crate::repair::{RepairReport, SigilRepair};
use crate::sigil::SigilService;
use crate::storage::{SqliteTerritoryStore, TerritoryStore};
use crate::territory::{OwnerLocks, SharedIndex, TerritoryIndex, TerritoryService};

/// Index totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub loaded: bool,
    pub territories: usize,
    pub chunks: usize,
    pub sigils: usize,
}

pub struct TerritoryEngine {
    config: TerritoryConfig,
    index: SharedIndex,
    territories: Arc<TerritoryService>,
    sigils: SigilService,
    repair: SigilRepair,
}

impl TerritoryEngine {
    pub fn new(config: TerritoryConfig, store: Arc<dyn TerritoryStore>, collab: Collaborators) -> Result<Self> {
        config.validate()?;

        let index = TerritoryIndex::shared();
        let territories = Arc::new(TerritoryService::new(
            index.clone(),
            store,
            Arc::new(OwnerLocks::new()),
            collab,
        ));
        let sigils = SigilService::new(territories.clone());
        let repair = SigilRepair::new(territories.clone(), config.repair.parallel_threshold);

        Ok(Self {
            config,
            index,
            territories,
            sigils,
            repair,
        })
    }

    /// Engine over the SQLite file named in the config
    pub fn open(config: TerritoryConfig, collab: Collaborators) -> Result<Self> {
        let store = SqliteTerritoryStore::open(&config.storage.path)?;
        tracing::info!(path = %config.storage.path.display(), "opened territory store");
        Self::new(config, Arc::new(store), collab)
    }

    /// Load the index and run the configured startup repair
    pub fn start(&self) -> Result<Option<RepairReport>> {
        self.reload()?;
        if !self.config.repair.on_startup {
            return Ok(None);
        }
        let report = if self.config.repair.split_disconnected {
            self.repair.split_disconnected()?
        } else {
            self.repair.run()?
        };
        Ok(Some(report))
    }

    /// Rebuild the index from storage. Returns the number of territories.
    pub fn reload(&self) -> Result<usize> {
        let territories = self.territories.store().load_all()?;
        let count = territories.len();
        self.index.write().reload(territories);
        tracing::info!(territories = count, "territory index loaded");
        Ok(count)
    }

    pub fn shutdown(&self) {
        self.index.write().shutdown();
        tracing::info!("territory index shut down");
    }

    pub fn status(&self) -> EngineStatus {
        let index = self.index.read();
        EngineStatus {
            loaded: index.is_loaded(),
            territories: index.territory_count(),
            chunks: index.chunk_count(),
            sigils: index.sigil_count(),
        }
    }

    pub fn config(&self) -> &TerritoryConfig {
        &self.config
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn territories(&self) -> &TerritoryService {
        &self.territories
    }

    pub fn sigils(&self) -> &SigilService {
        &self.sigils
    }

    pub fn repair(&self) -> &SigilRepair {
        &self.repair
    }
}
