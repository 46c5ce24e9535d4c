use std::path::Path;
use std::time::Duration;

use gt_rs_world::{SeedCatalog, Species, WorldError};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub growth: GrowthSection,
    #[serde(default)]
    pub locks: LocksSection,
    #[serde(default)]
    pub sessions: SessionsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Extra species on top of the built-in ones.
    #[serde(default)]
    pub seeds: Vec<SeedEntry>,
    #[serde(default)]
    pub edit: EditSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    LevelDb,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "data/db".into()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GrowthSection {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Progress added to every tree per tick.
    #[serde(default = "default_progress_per_tick")]
    pub progress_per_tick: u32,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_progress_per_tick() -> u32 {
    1
}

impl Default for GrowthSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            progress_per_tick: default_progress_per_tick(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LocksSection {
    #[serde(default = "default_lock_sweep_secs")]
    pub sweep_interval_secs: u64,
    /// TTL of the short lock wrapping each grid edit.
    #[serde(default = "default_edit_lock_ttl_secs")]
    pub edit_lock_ttl_secs: u64,
}

fn default_lock_sweep_secs() -> u64 {
    30
}

fn default_edit_lock_ttl_secs() -> u64 {
    5
}

impl Default for LocksSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_lock_sweep_secs(),
            edit_lock_ttl_secs: default_edit_lock_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_session_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_session_sweep_secs() -> u64 {
    60
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_session_sweep_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SeedEntry {
    pub id: String,
    pub thresholds: Vec<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EditSection {
    /// Worlds where anyone may remove any block.
    #[serde(default)]
    pub open_worlds: Vec<String>,
    /// Block types that must carry a `NAME:x:y` door target.
    #[serde(default)]
    pub door_block_types: Vec<i32>,
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.growth.tick_interval_ms.max(1))
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.locks.sweep_interval_secs.max(1))
    }

    pub fn edit_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.locks.edit_lock_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.sessions.ttl_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs.max(1))
    }

    /// Built-in species plus every `[[seeds]]` entry; entries may override
    /// a built-in.
    pub fn seed_catalog(&self) -> Result<SeedCatalog, WorldError> {
        let mut catalog = SeedCatalog::with_defaults();
        for seed in &self.seeds {
            catalog.register(Species::new(seed.id.clone(), seed.thresholds.clone())?);
        }
        Ok(catalog)
    }
}
