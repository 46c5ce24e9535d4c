//! The per-world sparse block grid.
//!
//! Every mutation of a cell runs under two locks: a short cell lock taken
//! through the [`LockManager`] (so explicit edit locks held by other players
//! are respected) and the world's write lock (so readers never see a cell
//! half-changed). The record store is written before memory is touched; a
//! failed write leaves the grid as it was.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gt_rs_store::model::cell_key;
use gt_rs_store::{Block, RecordStoreExt, Tree, World};
use tracing::{debug, warn};

use crate::door::DoorTarget;
use crate::error::WorldError;
use crate::growth::{is_harvestable, SeedCatalog};
use crate::lock::{LockError, LockGrant, LockManager, LockToken, ResourceId};
use crate::registry::{normalize_world_name, WorldRegistry, WorldState};

const DEFAULT_IMPLICIT_TTL: Duration = Duration::from_secs(5);

/// What occupies a cell. A cell holds at most one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Block(Block),
    Tree(Tree),
}

/// Request to place a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub block_type: i32,
    /// The placing player; becomes the block owner.
    pub owner_id: String,
    /// `None` for indestructible blocks.
    pub durability: Option<u32>,
    /// `NAME:x:y` for door blocks.
    pub door_target: Option<String>,
}

impl Placement {
    pub fn new(block_type: i32, owner_id: impl Into<String>) -> Self {
        Self {
            block_type,
            owner_id: owner_id.into(),
            durability: None,
            door_target: None,
        }
    }

    pub fn durability(mut self, durability: u32) -> Self {
        self.durability = Some(durability);
        self
    }

    pub fn door_target(mut self, target: impl Into<String>) -> Self {
        self.door_target = Some(target.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Edit policy
// ---------------------------------------------------------------------------

/// Decides who may remove a block.
pub trait EditPolicy: Send + Sync {
    fn may_remove(&self, world: &World, block: &Block, requester: &str) -> bool;
}

/// The block owner or the world owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerOrWorldOwner;

impl EditPolicy for OwnerOrWorldOwner {
    fn may_remove(&self, world: &World, block: &Block, requester: &str) -> bool {
        block.owner_id.as_deref() == Some(requester) || world.owner.as_deref() == Some(requester)
    }
}

/// Anyone may remove blocks in the listed worlds; elsewhere falls back to
/// [`OwnerOrWorldOwner`].
#[derive(Debug, Default, Clone)]
pub struct OpenEdit {
    worlds: HashSet<String>,
}

impl OpenEdit {
    pub fn new<I, S>(worlds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let worlds = worlds
            .into_iter()
            .filter_map(|name| normalize_world_name(name.as_ref()).ok())
            .collect();
        Self { worlds }
    }
}

impl EditPolicy for OpenEdit {
    fn may_remove(&self, world: &World, block: &Block, requester: &str) -> bool {
        self.worlds.contains(&world.name) || OwnerOrWorldOwner.may_remove(world, block, requester)
    }
}

/// Outcome of [`GridStore::sweep_expired_locks`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub locks: usize,
    pub blocks_cleared: usize,
    pub worlds_cleared: usize,
}

// ---------------------------------------------------------------------------
// Cell guard
// ---------------------------------------------------------------------------

/// Serializes one mutation of a cell. Releases the lock on drop unless the
/// actor already held it before the operation started.
struct CellGuard<'a> {
    locks: &'a LockManager,
    resource: String,
    token: LockToken,
    implicit: bool,
}

impl CellGuard<'_> {
    /// The caller's own explicit lock token, if any.
    fn held_token(&self) -> Option<&LockToken> {
        (!self.implicit).then_some(&self.token)
    }
}

impl Drop for CellGuard<'_> {
    fn drop(&mut self) {
        if self.implicit {
            let _ = self.locks.release(&self.resource, &self.token);
        }
    }
}

fn implicit_holder(actor: &str) -> String {
    format!("{actor}#edit")
}

// ---------------------------------------------------------------------------
// Grid store
// ---------------------------------------------------------------------------

pub struct GridStore {
    registry: Arc<WorldRegistry>,
    catalog: Arc<SeedCatalog>,
    policy: Box<dyn EditPolicy>,
    implicit_ttl: Duration,
    door_types: HashSet<i32>,
}

impl GridStore {
    pub fn new(registry: Arc<WorldRegistry>, catalog: Arc<SeedCatalog>) -> Self {
        Self {
            registry,
            catalog,
            policy: Box::new(OwnerOrWorldOwner),
            implicit_ttl: DEFAULT_IMPLICIT_TTL,
            door_types: HashSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl EditPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Upper bound on how long a crashed mutation can keep a cell busy.
    pub fn with_implicit_lock_ttl(mut self, ttl: Duration) -> Self {
        self.implicit_ttl = ttl;
        self
    }

    /// Block types that cannot be placed without a door target.
    pub fn with_door_types(mut self, types: impl IntoIterator<Item = i32>) -> Self {
        self.door_types = types.into_iter().collect();
        self
    }

    pub fn registry(&self) -> &Arc<WorldRegistry> {
        &self.registry
    }

    // ─── Mutations ──────────────────────────────────────────────────────────

    pub fn place(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        placement: Placement,
    ) -> Result<Block, WorldError> {
        if placement.durability == Some(0) {
            return Err(WorldError::InvalidArgument(
                "durability must be positive".into(),
            ));
        }
        let door_target = placement
            .door_target
            .as_deref()
            .map(|raw| raw.parse::<DoorTarget>().map(|t| t.to_string()))
            .transpose()?;
        if door_target.is_none() && self.door_types.contains(&placement.block_type) {
            return Err(WorldError::InvalidDoorTarget(String::new()));
        }

        let shard = self.registry.shard(world_id)?;
        check_bounds(&shard.read().world, x, y)?;

        let guard = self.cell_guard(world_id, x, y, &placement.owner_id)?;
        let mut state = shard.write();
        self.registry
            .ensure_editable(&mut state, &placement.owner_id)?;
        ensure_vacant(&state, world_id, x, y)?;

        let now = self.registry.now();
        let block = Block {
            id: self.registry.block_ids.allocate(),
            world_id,
            grid_x: x,
            grid_y: y,
            block_type: placement.block_type,
            durability: placement.durability,
            lock_id: guard.held_token().map(|t| t.to_string()),
            owner_id: Some(placement.owner_id),
            door_target,
            created_at: now,
            updated_at: now,
        };
        self.registry.store().insert_record(&block)?;
        state.cells.insert((x, y), Cell::Block(block.clone()));
        self.registry.touch_world(&mut state);

        debug!(
            "placed block {} (type {}) at ({x}, {y}) in world {world_id}",
            block.id, block.block_type
        );
        Ok(block)
    }

    pub fn remove(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        requester: &str,
    ) -> Result<Block, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let _guard = self.cell_guard(world_id, x, y, requester)?;
        let mut state = shard.write();
        self.registry.ensure_editable(&mut state, requester)?;

        let block = match state.cells.get(&(x, y)) {
            Some(Cell::Block(block)) => block.clone(),
            _ => return Err(WorldError::NotFound { world_id, x, y }),
        };
        if !self.policy.may_remove(&state.world, &block, requester) {
            return Err(WorldError::NotOwner {
                requester: requester.to_string(),
            });
        }

        self.registry
            .store()
            .remove::<Block>(&cell_key(world_id, x, y))?;
        state.cells.remove(&(x, y));
        self.registry.touch_world(&mut state);

        debug!("{requester} removed block {} at ({x}, {y}) in world {world_id}", block.id);
        Ok(block)
    }

    /// Reduce a block's durability by `amount`, returning what is left.
    ///
    /// Zero means the block was removed by this same call.
    pub fn apply_damage(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        amount: u32,
        actor: &str,
    ) -> Result<u32, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let _guard = self.cell_guard(world_id, x, y, actor)?;
        let mut state = shard.write();
        self.registry.ensure_editable(&mut state, actor)?;

        let block = match state.cells.get(&(x, y)) {
            Some(Cell::Block(block)) => block,
            _ => return Err(WorldError::NotFound { world_id, x, y }),
        };
        let Some(durability) = block.durability else {
            return Err(WorldError::NotDestructible { x, y });
        };
        if amount == 0 {
            return Ok(durability);
        }

        let remaining = durability.saturating_sub(amount);
        if remaining == 0 {
            self.registry
                .store()
                .remove::<Block>(&cell_key(world_id, x, y))?;
            state.cells.remove(&(x, y));
            debug!("{actor} broke block at ({x}, {y}) in world {world_id}");
        } else {
            let mut next = block.clone();
            next.durability = Some(remaining);
            next.lock_id = self.live_lock(&next);
            next.updated_at = self.registry.now();
            self.registry.store().save(&next)?;
            state.cells.insert((x, y), Cell::Block(next));
        }
        self.registry.touch_world(&mut state);
        Ok(remaining)
    }

    /// Take an explicit edit lock on a cell. A block at the cell records the
    /// token in its `lock_id`.
    pub fn lock_cell(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockGrant, WorldError> {
        let shard = self.registry.shard(world_id)?;
        check_bounds(&shard.read().world, x, y)?;

        let resource = ResourceId::cell(world_id, x, y).to_string();
        let locks = self.registry.locks();
        let grant = locks.acquire(&resource, holder, ttl)?;

        let mut state = shard.write();
        if let Some(Cell::Block(block)) = state.cells.get(&(x, y)) {
            if block.lock_id.as_deref() != Some(grant.token.as_str()) {
                let mut next = block.clone();
                next.lock_id = Some(grant.token.to_string());
                next.updated_at = self.registry.now();
                if let Err(e) = self.registry.store().save(&next) {
                    if !grant.renewed {
                        let _ = locks.release(&resource, &grant.token);
                    }
                    return Err(e.into());
                }
                state.cells.insert((x, y), Cell::Block(next));
            }
        }
        debug!("{holder} locked cell ({x}, {y}) in world {world_id}");
        Ok(grant)
    }

    /// Release an explicit cell lock and clear the block's `lock_id`.
    ///
    /// A lock that already expired is still cleared from the block, and the
    /// caller gets [`LockError::Expired`].
    pub fn unlock_cell(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        token: &LockToken,
    ) -> Result<(), WorldError> {
        let shard = self.registry.shard(world_id)?;
        let resource = ResourceId::cell(world_id, x, y).to_string();
        let mut state = shard.write();

        let released = self.registry.locks().release(&resource, token);
        if let Err(LockError::NotHolder { .. }) = released {
            return released.map_err(WorldError::from);
        }
        self.clear_block_lock(&mut state, x, y, Some(token.as_str()));
        released.map_err(WorldError::from)
    }

    pub fn renew_cell(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<u64, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let resource = ResourceId::cell(world_id, x, y).to_string();
        match self.registry.locks().renew(&resource, token, ttl) {
            Ok(until) => Ok(until),
            Err(e) => {
                if matches!(e, LockError::Expired { .. }) {
                    let mut state = shard.write();
                    self.clear_block_lock(&mut state, x, y, Some(token.as_str()));
                }
                Err(e.into())
            }
        }
    }

    /// Plant a seed. Same cell rules as [`GridStore::place`].
    pub fn plant(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        seed_id: &str,
        planter: &str,
    ) -> Result<Tree, WorldError> {
        if self.catalog.get(seed_id).is_none() {
            return Err(WorldError::UnknownSeed(seed_id.to_string()));
        }
        let shard = self.registry.shard(world_id)?;
        check_bounds(&shard.read().world, x, y)?;

        let _guard = self.cell_guard(world_id, x, y, planter)?;
        let mut state = shard.write();
        self.registry.ensure_editable(&mut state, planter)?;
        ensure_vacant(&state, world_id, x, y)?;

        let tree = Tree::planted(
            self.registry.tree_ids.allocate(),
            world_id,
            x,
            y,
            seed_id,
            self.registry.now(),
        );
        self.registry.store().insert_record(&tree)?;
        state.cells.insert((x, y), Cell::Tree(tree.clone()));
        self.registry.touch_world(&mut state);

        debug!("{planter} planted {seed_id} at ({x}, {y}) in world {world_id}");
        Ok(tree)
    }

    /// Remove a fully grown tree. The ripeness check and the removal happen
    /// under one world write lock, so only one harvester can win.
    pub fn harvest(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        requester: &str,
    ) -> Result<Tree, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let _guard = self.cell_guard(world_id, x, y, requester)?;
        let mut state = shard.write();
        self.registry.ensure_editable(&mut state, requester)?;

        let tree = match state.cells.get(&(x, y)) {
            Some(Cell::Tree(tree)) => tree.clone(),
            _ => return Err(WorldError::NotFound { world_id, x, y }),
        };
        if !is_harvestable(&tree) {
            return Err(WorldError::NotHarvestable { x, y });
        }

        self.registry
            .store()
            .remove::<Tree>(&cell_key(world_id, x, y))?;
        state.cells.remove(&(x, y));
        self.registry.touch_world(&mut state);

        debug!("{requester} harvested {} at ({x}, {y}) in world {world_id}", tree.seed_id);
        Ok(tree)
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub fn block_at(&self, world_id: u64, x: i32, y: i32) -> Result<Option<Block>, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let state = shard.read();
        Ok(match state.cells.get(&(x, y)) {
            Some(Cell::Block(block)) => Some(self.present(block)),
            _ => None,
        })
    }

    pub fn tree_at(&self, world_id: u64, x: i32, y: i32) -> Result<Option<Tree>, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let state = shard.read();
        Ok(match state.cells.get(&(x, y)) {
            Some(Cell::Tree(tree)) => Some(tree.clone()),
            _ => None,
        })
    }

    /// All blocks of a world in row-major order.
    pub fn blocks_in(&self, world_id: u64) -> Result<Vec<Block>, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let state = shard.read();
        let mut blocks: Vec<Block> = state
            .cells
            .values()
            .filter_map(|cell| match cell {
                Cell::Block(block) => Some(self.present(block)),
                Cell::Tree(_) => None,
            })
            .collect();
        blocks.sort_by_key(|b| (b.grid_y, b.grid_x));
        Ok(blocks)
    }

    /// All trees of a world in row-major order.
    pub fn trees_in(&self, world_id: u64) -> Result<Vec<Tree>, WorldError> {
        let shard = self.registry.shard(world_id)?;
        let state = shard.read();
        let mut trees: Vec<Tree> = state
            .cells
            .values()
            .filter_map(|cell| match cell {
                Cell::Tree(tree) => Some(tree.clone()),
                Cell::Block(_) => None,
            })
            .collect();
        trees.sort_by_key(|t| (t.grid_y, t.grid_x));
        Ok(trees)
    }

    // ─── Maintenance ────────────────────────────────────────────────────────

    /// Drop expired locks and clear the lock fields they were mirrored into.
    pub fn sweep_expired_locks(&self) -> SweepReport {
        let expired = self.registry.locks().sweep_expired();
        let mut report = SweepReport {
            locks: expired.len(),
            ..SweepReport::default()
        };

        for resource in &expired {
            match resource.parse::<ResourceId>() {
                Ok(ResourceId::World(world_id)) => {
                    let Ok(shard) = self.registry.shard(world_id) else {
                        continue;
                    };
                    let mut state = shard.write();
                    if self.registry.clear_lapsed_world_lock(&mut state) {
                        report.worlds_cleared += 1;
                    }
                }
                Ok(ResourceId::Cell { world_id, x, y }) => {
                    let Ok(shard) = self.registry.shard(world_id) else {
                        continue;
                    };
                    let mut state = shard.write();
                    if self.clear_block_lock(&mut state, x, y, None) {
                        report.blocks_cleared += 1;
                    }
                }
                Err(e) => warn!("sweep: {e}"),
            }
        }

        if report.locks > 0 {
            debug!(
                "lock sweep: {} expired, {} block(s) and {} world(s) cleared",
                report.locks, report.blocks_cleared, report.worlds_cleared
            );
        }
        report
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn cell_guard(
        &self,
        world_id: u64,
        x: i32,
        y: i32,
        actor: &str,
    ) -> Result<CellGuard<'_>, WorldError> {
        let locks = self.registry.locks().as_ref();
        let resource = ResourceId::cell(world_id, x, y).to_string();

        if let Some(info) = locks.holder(&resource) {
            if info.holder != actor {
                return Err(WorldError::CellLocked { world_id, x, y });
            }
            return Ok(CellGuard {
                locks,
                resource,
                token: info.token,
                implicit: false,
            });
        }

        // Implicit locks use their own holder id; lock_cell by the same
        // player must not adopt them.
        match locks.acquire(&resource, &implicit_holder(actor), self.implicit_ttl) {
            Ok(grant) if !grant.renewed => Ok(CellGuard {
                locks,
                resource,
                token: grant.token,
                implicit: true,
            }),
            // Another edit by the same actor is still running on this cell.
            Ok(_) | Err(LockError::AlreadyLocked { .. }) => {
                Err(WorldError::CellLocked { world_id, x, y })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The block's `lock_id` if that lock is still live.
    fn live_lock(&self, block: &Block) -> Option<String> {
        let token = block.lock_id.as_deref()?;
        let resource = ResourceId::cell(block.world_id, block.grid_x, block.grid_y).to_string();
        self.registry
            .locks()
            .is_held_with(&resource, token)
            .then(|| token.to_string())
    }

    fn present(&self, block: &Block) -> Block {
        let mut view = block.clone();
        view.lock_id = self.live_lock(block);
        view
    }

    /// Clear a block's `lock_id` when it matches `token` (any stale token
    /// when `None`). Returns whether the block changed.
    fn clear_block_lock(
        &self,
        state: &mut WorldState,
        x: i32,
        y: i32,
        token: Option<&str>,
    ) -> bool {
        let Some(Cell::Block(block)) = state.cells.get(&(x, y)) else {
            return false;
        };
        let stale = match (block.lock_id.as_deref(), token) {
            (None, _) => false,
            (Some(current), Some(token)) => current == token,
            (Some(_), None) => self.live_lock(block).is_none(),
        };
        if !stale {
            return false;
        }

        let mut next = block.clone();
        next.lock_id = None;
        next.updated_at = self.registry.now();
        match self.registry.store().save(&next) {
            Ok(()) => {
                state.cells.insert((x, y), Cell::Block(next));
                true
            }
            Err(e) => {
                warn!("failed to clear lock on block at ({x}, {y}): {e}");
                false
            }
        }
    }
}

fn check_bounds(world: &World, x: i32, y: i32) -> Result<(), WorldError> {
    if world.contains(x, y) {
        Ok(())
    } else {
        Err(WorldError::OutOfBounds {
            x,
            y,
            width: world.width,
            height: world.height,
        })
    }
}

fn ensure_vacant(state: &WorldState, world_id: u64, x: i32, y: i32) -> Result<(), WorldError> {
    if state.cells.contains_key(&(x, y)) {
        return Err(WorldError::CellOccupied { world_id, x, y });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use gt_rs_store::{ManualClock, MemoryStore, WorldOptions};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        registry: Arc<WorldRegistry>,
        grid: GridStore,
        world_id: u64,
    }

    fn fixture() -> Fixture {
        fixture_with(|grid| grid)
    }

    fn fixture_with(configure: impl FnOnce(GridStore) -> GridStore) -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(LockManager::new(clock.clone()));
        let registry = Arc::new(WorldRegistry::new(store.clone(), locks, clock.clone()));
        let opts = WorldOptions {
            width: 10,
            height: 10,
            ..WorldOptions::default()
        };
        let world_id = registry
            .create_world("garden", Some("owner"), opts)
            .unwrap()
            .id;
        let grid = configure(GridStore::new(
            registry.clone(),
            Arc::new(SeedCatalog::with_defaults()),
        ));
        Fixture {
            clock,
            store,
            registry,
            grid,
            world_id,
        }
    }

    #[test]
    fn place_persists_and_touches_world() {
        let f = fixture();
        f.clock.advance(Duration::from_secs(1));
        let block = f
            .grid
            .place(f.world_id, 2, 3, Placement::new(4, "alice").durability(3))
            .unwrap();
        assert_eq!(block.owner_id.as_deref(), Some("alice"));
        assert_eq!(block.lock_id, None);

        let stored: Block = f.store.load(&cell_key(f.world_id, 2, 3)).unwrap().unwrap();
        assert_eq!(stored, block);
        assert_eq!(f.grid.block_at(f.world_id, 2, 3).unwrap(), Some(block));
        assert_eq!(f.registry.get_world(f.world_id).unwrap().updated_at, 11_000);
        // The implicit cell lock is gone.
        assert!(f.registry.locks().is_empty());
    }

    #[test]
    fn place_rejects_bad_cells() {
        let f = fixture();
        let err = f
            .grid
            .place(f.world_id, 10, 0, Placement::new(1, "a"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfBounds);
        assert!(f
            .grid
            .place(f.world_id, -1, 0, Placement::new(1, "a"))
            .is_err());

        f.grid
            .place(f.world_id, 1, 1, Placement::new(1, "a"))
            .unwrap();
        let err = f
            .grid
            .place(f.world_id, 1, 1, Placement::new(2, "b"))
            .unwrap_err();
        assert!(matches!(err, WorldError::CellOccupied { .. }));

        f.grid.plant(f.world_id, 2, 2, "oak", "a").unwrap();
        let err = f
            .grid
            .place(f.world_id, 2, 2, Placement::new(2, "b"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = f.grid.plant(f.world_id, 1, 1, "oak", "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn place_validates_fields() {
        let f = fixture();
        assert!(matches!(
            f.grid
                .place(f.world_id, 0, 0, Placement::new(1, "a").durability(0)),
            Err(WorldError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.grid
                .place(f.world_id, 0, 0, Placement::new(6, "a").door_target("nowhere")),
            Err(WorldError::InvalidDoorTarget(_))
        ));
        let door = f
            .grid
            .place(f.world_id, 0, 0, Placement::new(6, "a").door_target("start:5:7"))
            .unwrap();
        assert_eq!(door.door_target.as_deref(), Some("START:5:7"));
    }

    #[test]
    fn door_types_require_a_target() {
        let f = fixture_with(|grid| grid.with_door_types([6, 7]));
        assert!(matches!(
            f.grid.place(f.world_id, 0, 0, Placement::new(6, "a")),
            Err(WorldError::InvalidDoorTarget(_))
        ));
        assert!(matches!(
            f.grid
                .place(f.world_id, 0, 0, Placement::new(7, "a").door_target("garden:1")),
            Err(WorldError::InvalidDoorTarget(_))
        ));
        assert_eq!(f.grid.block_at(f.world_id, 0, 0).unwrap(), None);
        assert_eq!(f.store.count(gt_rs_store::Table::Blocks), 0);

        f.grid
            .place(f.world_id, 0, 0, Placement::new(6, "a").door_target("garden:1:1"))
            .unwrap();
        // Other types need no target.
        f.grid
            .place(f.world_id, 1, 0, Placement::new(1, "a"))
            .unwrap();
    }

    #[test]
    fn explicit_lock_never_adopts_a_running_edit() {
        let f = fixture();
        let resource = format!("block:{}:4:4", f.world_id);

        let edit = f.grid.cell_guard(f.world_id, 4, 4, "alice").unwrap();
        assert!(matches!(
            f.grid
                .lock_cell(f.world_id, 4, 4, "alice", Duration::from_secs(30)),
            Err(WorldError::Lock(LockError::AlreadyLocked { .. }))
        ));
        // A second edit by the same player waits its turn too.
        assert!(matches!(
            f.grid.cell_guard(f.world_id, 4, 4, "alice"),
            Err(WorldError::CellLocked { .. })
        ));
        drop(edit);
        assert!(!f.registry.locks().is_locked(&resource));

        let grant = f
            .grid
            .lock_cell(f.world_id, 4, 4, "alice", Duration::from_secs(30))
            .unwrap();
        f.grid
            .place(f.world_id, 4, 4, Placement::new(1, "alice"))
            .unwrap();
        // The edit ran under the explicit lock and left it in place.
        assert!(f.registry.locks().is_held_with(&resource, grant.token.as_str()));
    }

    #[test]
    fn concurrent_place_has_one_winner() {
        let f = fixture();
        let results: Vec<Result<Block, WorldError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let grid = &f.grid;
                    let world_id = f.world_id;
                    s.spawn(move || {
                        grid.place(world_id, 5, 5, Placement::new(i, format!("p{i}")))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<&Block> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(
                err.kind(),
                ErrorKind::Conflict | ErrorKind::LockConflict
            ));
        }
        let blocks = f.grid.blocks_in(f.world_id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].owner_id, winners[0].owner_id);
    }

    #[test]
    fn two_players_race_for_one_cell() {
        let f = fixture();
        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| f.grid.place(f.world_id, 5, 5, Placement::new(1, "a")));
            let b = s.spawn(|| f.grid.place(f.world_id, 5, 5, Placement::new(2, "b")));
            (a.join().unwrap(), b.join().unwrap())
        });
        assert!(a.is_ok() ^ b.is_ok());

        let block = f.grid.block_at(f.world_id, 5, 5).unwrap().unwrap();
        let owner = block.owner_id.as_deref().unwrap();
        assert!(owner == "a" || owner == "b");
        assert_eq!(block.block_type, if owner == "a" { 1 } else { 2 });
        assert_eq!(f.store.count(gt_rs_store::Table::Blocks), 1);
    }

    #[test]
    fn remove_checks_ownership() {
        let f = fixture();
        f.grid
            .place(f.world_id, 1, 1, Placement::new(1, "alice"))
            .unwrap();

        assert!(matches!(
            f.grid.remove(f.world_id, 2, 2, "alice"),
            Err(WorldError::NotFound { .. })
        ));
        assert!(matches!(
            f.grid.remove(f.world_id, 1, 1, "bob"),
            Err(WorldError::NotOwner { .. })
        ));
        // World owner may always remove.
        let removed = f.grid.remove(f.world_id, 1, 1, "owner").unwrap();
        assert_eq!(removed.owner_id.as_deref(), Some("alice"));
        assert_eq!(f.grid.block_at(f.world_id, 1, 1).unwrap(), None);
        assert_eq!(f.store.count(gt_rs_store::Table::Blocks), 0);
    }

    #[test]
    fn remove_ignores_trees() {
        let f = fixture();
        f.grid.plant(f.world_id, 4, 4, "oak", "owner").unwrap();
        assert!(matches!(
            f.grid.remove(f.world_id, 4, 4, "owner"),
            Err(WorldError::NotFound { .. })
        ));
    }

    #[test]
    fn open_edit_worlds_allow_anyone() {
        let f = fixture_with(|grid| grid.with_policy(OpenEdit::new(["Garden"])));
        f.grid
            .place(f.world_id, 1, 1, Placement::new(1, "alice"))
            .unwrap();
        f.grid.remove(f.world_id, 1, 1, "bob").unwrap();
    }

    #[test]
    fn damage_counts_down_and_removes_at_zero() {
        let f = fixture();
        f.grid
            .place(f.world_id, 3, 3, Placement::new(2, "alice").durability(5))
            .unwrap();

        assert_eq!(f.grid.apply_damage(f.world_id, 3, 3, 2, "bob").unwrap(), 3);
        let stored: Block = f.store.load(&cell_key(f.world_id, 3, 3)).unwrap().unwrap();
        assert_eq!(stored.durability, Some(3));
        assert_eq!(f.grid.apply_damage(f.world_id, 3, 3, 0, "bob").unwrap(), 3);

        // Overkill floors at zero and removes in the same call.
        assert_eq!(f.grid.apply_damage(f.world_id, 3, 3, 10, "bob").unwrap(), 0);
        assert_eq!(f.grid.block_at(f.world_id, 3, 3).unwrap(), None);
        assert!(f
            .store
            .load::<Block>(&cell_key(f.world_id, 3, 3))
            .unwrap()
            .is_none());
        assert!(matches!(
            f.grid.apply_damage(f.world_id, 3, 3, 1, "bob"),
            Err(WorldError::NotFound { .. })
        ));
    }

    #[test]
    fn damage_exactly_to_zero() {
        let f = fixture();
        f.grid
            .place(f.world_id, 0, 0, Placement::new(2, "a").durability(2))
            .unwrap();
        assert_eq!(f.grid.apply_damage(f.world_id, 0, 0, 1, "a").unwrap(), 1);
        assert_eq!(f.grid.apply_damage(f.world_id, 0, 0, 1, "a").unwrap(), 0);
        assert!(f.grid.blocks_in(f.world_id).unwrap().is_empty());
    }

    #[test]
    fn indestructible_blocks_refuse_damage() {
        let f = fixture();
        f.grid
            .place(f.world_id, 0, 9, Placement::new(8, "owner"))
            .unwrap();
        assert!(matches!(
            f.grid.apply_damage(f.world_id, 0, 9, 1, "owner"),
            Err(WorldError::NotDestructible { x: 0, y: 9 })
        ));
    }

    #[test]
    fn cell_lock_blocks_other_players() {
        let f = fixture();
        let grant = f
            .grid
            .lock_cell(f.world_id, 6, 6, "alice", Duration::from_secs(30))
            .unwrap();

        let err = f
            .grid
            .place(f.world_id, 6, 6, Placement::new(1, "bob"))
            .unwrap_err();
        assert!(matches!(err, WorldError::CellLocked { .. }));
        assert_eq!(err.kind(), ErrorKind::LockConflict);

        // The holder places into the reserved cell; the lock carries over.
        let block = f
            .grid
            .place(f.world_id, 6, 6, Placement::new(1, "alice").durability(4))
            .unwrap();
        assert_eq!(block.lock_id.as_deref(), Some(grant.token.as_str()));
        assert!(f
            .registry
            .locks()
            .is_locked(&format!("block:{}:6:6", f.world_id)));

        assert!(matches!(
            f.grid.apply_damage(f.world_id, 6, 6, 1, "bob"),
            Err(WorldError::CellLocked { .. })
        ));

        f.grid.unlock_cell(f.world_id, 6, 6, &grant.token).unwrap();
        let stored: Block = f.store.load(&cell_key(f.world_id, 6, 6)).unwrap().unwrap();
        assert_eq!(stored.lock_id, None);
        assert_eq!(f.grid.apply_damage(f.world_id, 6, 6, 1, "bob").unwrap(), 3);
    }

    #[test]
    fn lock_cell_marks_existing_block() {
        let f = fixture();
        f.grid
            .place(f.world_id, 2, 2, Placement::new(1, "alice"))
            .unwrap();
        let grant = f
            .grid
            .lock_cell(f.world_id, 2, 2, "alice", Duration::from_secs(5))
            .unwrap();
        let stored: Block = f.store.load(&cell_key(f.world_id, 2, 2)).unwrap().unwrap();
        assert_eq!(stored.lock_id.as_deref(), Some(grant.token.as_str()));

        assert!(matches!(
            f.grid
                .lock_cell(f.world_id, 2, 2, "bob", Duration::from_secs(5)),
            Err(WorldError::Lock(LockError::AlreadyLocked { .. }))
        ));
        assert!(matches!(
            f.grid.unlock_cell(f.world_id, 2, 2, &LockToken::from("bogus")),
            Err(WorldError::Lock(LockError::NotHolder { .. }))
        ));
        assert!(f.grid.block_at(f.world_id, 2, 2).unwrap().unwrap().lock_id.is_some());
    }

    #[test]
    fn expired_cell_lock_is_hidden_then_swept() {
        let f = fixture();
        f.grid
            .place(f.world_id, 2, 2, Placement::new(1, "alice"))
            .unwrap();
        f.grid
            .lock_cell(f.world_id, 2, 2, "alice", Duration::from_secs(5))
            .unwrap();
        f.clock.advance(Duration::from_secs(6));

        // Reads hide the stale token before any sweep.
        assert_eq!(
            f.grid.block_at(f.world_id, 2, 2).unwrap().unwrap().lock_id,
            None
        );
        // Other players are no longer held back.
        f.grid
            .lock_cell(f.world_id, 3, 3, "bob", Duration::from_secs(5))
            .unwrap();

        let report = f.grid.sweep_expired_locks();
        assert_eq!(report.locks, 1);
        assert_eq!(report.blocks_cleared, 1);
        let stored: Block = f.store.load(&cell_key(f.world_id, 2, 2)).unwrap().unwrap();
        assert_eq!(stored.lock_id, None);
    }

    #[test]
    fn unlock_after_expiry_clears_field() {
        let f = fixture();
        f.grid
            .place(f.world_id, 2, 2, Placement::new(1, "alice"))
            .unwrap();
        let grant = f
            .grid
            .lock_cell(f.world_id, 2, 2, "alice", Duration::from_secs(5))
            .unwrap();
        f.clock.advance(Duration::from_secs(5));
        assert!(matches!(
            f.grid.unlock_cell(f.world_id, 2, 2, &grant.token),
            Err(WorldError::Lock(LockError::Expired { .. }))
        ));
        let stored: Block = f.store.load(&cell_key(f.world_id, 2, 2)).unwrap().unwrap();
        assert_eq!(stored.lock_id, None);
    }

    #[test]
    fn renew_cell_keeps_lock_alive() {
        let f = fixture();
        let grant = f
            .grid
            .lock_cell(f.world_id, 1, 1, "alice", Duration::from_secs(5))
            .unwrap();
        f.clock.advance(Duration::from_secs(4));
        f.grid
            .renew_cell(f.world_id, 1, 1, &grant.token, Duration::from_secs(5))
            .unwrap();
        f.clock.advance(Duration::from_secs(4));
        assert!(matches!(
            f.grid.place(f.world_id, 1, 1, Placement::new(1, "bob")),
            Err(WorldError::CellLocked { .. })
        ));
    }

    #[test]
    fn world_lock_gates_edits_until_expiry() {
        let f = fixture();
        f.registry
            .lock_world(f.world_id, "admin", Duration::from_secs(60))
            .unwrap();

        let err = f
            .grid
            .place(f.world_id, 4, 4, Placement::new(1, "player"))
            .unwrap_err();
        assert!(matches!(err, WorldError::WorldLocked { .. }));
        assert_eq!(err.kind(), ErrorKind::LockConflict);
        assert!(!f
            .registry
            .locks()
            .is_locked(&format!("block:{}:4:4", f.world_id)));

        // The lock holder keeps building.
        f.grid
            .place(f.world_id, 0, 0, Placement::new(1, "admin"))
            .unwrap();

        f.clock.advance(Duration::from_secs(60));
        f.grid
            .place(f.world_id, 4, 4, Placement::new(1, "player"))
            .unwrap();
        assert!(!f.registry.get_world(f.world_id).unwrap().locked());
    }

    #[test]
    fn sweep_clears_lapsed_world_lock() {
        let f = fixture();
        f.registry
            .lock_world(f.world_id, "admin", Duration::from_secs(1))
            .unwrap();
        f.clock.advance(Duration::from_secs(2));
        let report = f.grid.sweep_expired_locks();
        assert_eq!(report.worlds_cleared, 1);
        let stored: World = f.store.load(&f.world_id.to_string()).unwrap().unwrap();
        assert!(!stored.locked());
        assert_eq!(stored.lock_id(), None);
    }

    #[test]
    fn failed_writes_leave_grid_untouched() {
        let f = fixture();
        f.grid
            .place(f.world_id, 1, 1, Placement::new(1, "a").durability(3))
            .unwrap();
        f.store.fail_writes(true);

        assert_eq!(
            f.grid
                .place(f.world_id, 2, 2, Placement::new(1, "a"))
                .unwrap_err()
                .kind(),
            ErrorKind::Storage
        );
        assert!(f.grid.apply_damage(f.world_id, 1, 1, 1, "a").is_err());
        assert!(f.grid.apply_damage(f.world_id, 1, 1, 5, "a").is_err());
        assert!(f.grid.remove(f.world_id, 1, 1, "a").is_err());

        f.store.fail_writes(false);
        assert_eq!(f.grid.block_at(f.world_id, 2, 2).unwrap(), None);
        let block = f.grid.block_at(f.world_id, 1, 1).unwrap().unwrap();
        assert_eq!(block.durability, Some(3));
        assert!(f.registry.locks().is_empty());
    }

    #[test]
    fn plant_and_harvest_rules() {
        let f = fixture();
        assert!(matches!(
            f.grid.plant(f.world_id, 0, 0, "mystery", "a"),
            Err(WorldError::UnknownSeed(_))
        ));
        let tree = f.grid.plant(f.world_id, 7, 7, "oak", "a").unwrap();
        assert_eq!(tree.growth_stage(), 0);
        assert_eq!(f.grid.tree_at(f.world_id, 7, 7).unwrap(), Some(tree));
        assert!(matches!(
            f.grid.harvest(f.world_id, 7, 7, "a"),
            Err(WorldError::NotHarvestable { .. })
        ));
        assert!(matches!(
            f.grid.harvest(f.world_id, 8, 8, "a"),
            Err(WorldError::NotFound { .. })
        ));
        assert_eq!(f.grid.trees_in(f.world_id).unwrap().len(), 1);
    }

    #[test]
    fn reads_are_row_major() {
        let f = fixture();
        for (x, y) in [(5, 1), (0, 2), (3, 1), (9, 0)] {
            f.grid
                .place(f.world_id, x, y, Placement::new(1, "a"))
                .unwrap();
        }
        let order: Vec<(i32, i32)> = f
            .grid
            .blocks_in(f.world_id)
            .unwrap()
            .iter()
            .map(|b| (b.grid_x, b.grid_y))
            .collect();
        assert_eq!(order, vec![(9, 0), (3, 1), (5, 1), (0, 2)]);
        assert!(matches!(
            f.grid.blocks_in(404),
            Err(WorldError::WorldNotFound(404))
        ));
    }
}
