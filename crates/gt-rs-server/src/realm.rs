//! Wires the store, lock manager, world core and player stores together.

use std::path::Path;
use std::sync::Arc;

use gt_rs_player::{AccountStore, SessionStore};
use gt_rs_store::{Clock, LevelDbStore, MemoryStore, RecordStore, SystemClock};
use gt_rs_world::{GridStore, GrowthEngine, LockManager, OpenEdit, WorldRegistry};
use tracing::info;

use crate::config::{ServerConfig, StorageBackend, StorageSection};

pub struct Realm {
    pub store: Arc<dyn RecordStore>,
    pub registry: Arc<WorldRegistry>,
    pub grid: GridStore,
    pub growth: GrowthEngine,
    pub sessions: SessionStore,
    pub accounts: AccountStore,
}

impl Realm {
    /// Open the configured store and load everything from it.
    pub fn open(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = open_store(&config.storage)?;
        Self::with_store(store, Arc::new(SystemClock), config)
    }

    pub fn with_store(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: &ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let catalog = Arc::new(config.seed_catalog()?);
        let locks = Arc::new(LockManager::new(clock.clone()));
        let registry = Arc::new(WorldRegistry::load(store.clone(), locks, clock.clone())?);

        let grid = GridStore::new(registry.clone(), catalog.clone())
            .with_policy(OpenEdit::new(&config.edit.open_worlds))
            .with_door_types(config.edit.door_block_types.iter().copied())
            .with_implicit_lock_ttl(config.edit_lock_ttl());
        let growth = GrowthEngine::new(registry.clone(), catalog);
        let sessions = SessionStore::load(store.clone(), clock.clone())?;
        let accounts = AccountStore::load(store.clone(), clock)?;

        Ok(Self {
            store,
            registry,
            grid,
            growth,
            sessions,
            accounts,
        })
    }
}

fn open_store(storage: &StorageSection) -> Result<Arc<dyn RecordStore>, Box<dyn std::error::Error>> {
    match storage.backend {
        StorageBackend::LevelDb => {
            let path = Path::new(&storage.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!("Opening LevelDB store at {}", path.display());
            Ok(Arc::new(LevelDbStore::open(path)?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store; nothing will survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
