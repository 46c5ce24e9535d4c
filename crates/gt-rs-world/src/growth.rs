//! Tree growth: species threshold tables and the per-world growth pass.

use std::collections::HashMap;
use std::sync::Arc;

use gt_rs_store::model::max_stage;
use gt_rs_store::{RecordStoreExt, Tree};
use tracing::{debug, warn};

use crate::error::WorldError;
use crate::grid::Cell;
use crate::registry::WorldRegistry;

// ---------------------------------------------------------------------------
// Species
// ---------------------------------------------------------------------------

/// A seed kind and the progress needed to enter each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    seed_id: String,
    thresholds: Vec<u32>,
}

impl Species {
    /// Thresholds must start at 0, be strictly increasing, and name at least
    /// two stages.
    pub fn new(seed_id: impl Into<String>, thresholds: Vec<u32>) -> Result<Self, WorldError> {
        let seed_id = seed_id.into();
        if seed_id.is_empty() {
            return Err(WorldError::InvalidArgument("empty seed id".into()));
        }
        if thresholds.len() < 2 || thresholds[0] != 0 {
            return Err(WorldError::InvalidArgument(format!(
                "seed {seed_id}: thresholds must start at 0 and have at least two stages"
            )));
        }
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(WorldError::InvalidArgument(format!(
                "seed {seed_id}: thresholds must be strictly increasing"
            )));
        }
        if thresholds.len() > usize::from(u8::MAX) + 1 {
            return Err(WorldError::InvalidArgument(format!(
                "seed {seed_id}: too many stages"
            )));
        }
        Ok(Self {
            seed_id,
            thresholds,
        })
    }

    pub fn seed_id(&self) -> &str {
        &self.seed_id
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    pub fn max_stage(&self) -> u8 {
        max_stage(&self.thresholds)
    }

    /// Progress at which the tree becomes harvestable.
    pub fn full_growth(&self) -> u32 {
        self.thresholds.last().copied().unwrap_or(0)
    }
}

/// Known species by seed id.
#[derive(Debug, Clone)]
pub struct SeedCatalog {
    species: HashMap<String, Species>,
}

impl SeedCatalog {
    pub fn empty() -> Self {
        Self {
            species: HashMap::new(),
        }
    }

    /// The built-in species.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        for (id, thresholds) in [
            ("oak", vec![0, 30, 90, 180]),
            ("pine", vec![0, 60, 180, 360, 600]),
            ("cherry", vec![0, 45, 120]),
        ] {
            if let Ok(species) = Species::new(id, thresholds) {
                catalog.register(species);
            }
        }
        catalog
    }

    /// Add or replace a species.
    pub fn register(&mut self, species: Species) {
        self.species.insert(species.seed_id.clone(), species);
    }

    pub fn get(&self, seed_id: &str) -> Option<&Species> {
        self.species.get(seed_id)
    }

    pub fn seed_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.species.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

impl Default for SeedCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Whether a tree can be harvested right now.
pub fn is_harvestable(tree: &Tree) -> bool {
    tree.harvestable()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Result of one growth pass over a world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub world_id: u64,
    /// Trees whose growth fields changed.
    pub advanced: usize,
    /// Trees that became harvestable in this pass.
    pub matured: usize,
    /// `(x, y, seed_id)` of trees with an unknown species.
    pub skipped: Vec<(i32, i32, String)>,
    /// Trees whose update could not be persisted.
    pub failed: usize,
    pub cancelled: bool,
}

pub struct GrowthEngine {
    registry: Arc<WorldRegistry>,
    catalog: Arc<SeedCatalog>,
}

impl GrowthEngine {
    pub fn new(registry: Arc<WorldRegistry>, catalog: Arc<SeedCatalog>) -> Self {
        Self { registry, catalog }
    }

    pub fn catalog(&self) -> &Arc<SeedCatalog> {
        &self.catalog
    }

    /// Advance every tree in a world by `delta` progress.
    ///
    /// The pass holds the world's write lock throughout, so readers see the
    /// world either before or after it. Each tree is persisted on its own:
    /// if `cancelled` turns true mid-pass, the trees already advanced stay
    /// advanced. Unknown species and failed writes only affect their tree.
    pub fn tick_world(
        &self,
        world_id: u64,
        delta: u32,
        cancelled: impl Fn() -> bool,
    ) -> Result<TickReport, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let mut state = shard.write();
        let mut report = TickReport {
            world_id,
            ..TickReport::default()
        };

        let mut positions: Vec<(i32, i32)> = state
            .cells
            .iter()
            .filter(|(_, cell)| matches!(cell, Cell::Tree(_)))
            .map(|(pos, _)| *pos)
            .collect();
        positions.sort_unstable_by_key(|&(x, y)| (y, x));

        let now = self.registry.now();
        for pos in positions {
            if cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(Cell::Tree(tree)) = state.cells.get(&pos) else {
                continue;
            };
            let Some(species) = self.catalog.get(&tree.seed_id) else {
                warn!(
                    "world {world_id}: tree at ({}, {}) has unknown seed {:?}, skipping",
                    pos.0, pos.1, tree.seed_id
                );
                report.skipped.push((pos.0, pos.1, tree.seed_id.clone()));
                continue;
            };

            let mut next = tree.clone();
            let was_harvestable = next.harvestable();
            if !next.advance(delta, species.thresholds()) {
                continue;
            }
            next.updated_at = now;

            match self.registry.store().save(&next) {
                Ok(()) => {
                    report.advanced += 1;
                    if next.harvestable() && !was_harvestable {
                        report.matured += 1;
                    }
                    state.cells.insert(pos, Cell::Tree(next));
                }
                Err(e) => {
                    warn!(
                        "world {world_id}: failed to save tree at ({}, {}): {e}",
                        pos.0, pos.1
                    );
                    report.failed += 1;
                }
            }
        }

        if report.advanced > 0 || report.cancelled {
            debug!(
                "growth pass on world {world_id}: {} advanced, {} matured{}",
                report.advanced,
                report.matured,
                if report.cancelled { ", cancelled" } else { "" }
            );
        }
        Ok(report)
    }

    /// One independent pass per world.
    pub fn tick_all(&self, delta: u32, cancelled: impl Fn() -> bool) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for world_id in self.registry.world_ids() {
            if cancelled() {
                break;
            }
            match self.tick_world(world_id, delta, &cancelled) {
                Ok(report) => reports.push(report),
                Err(e) => warn!("growth pass on world {world_id} failed: {e}"),
            }
        }
        reports
    }
}
