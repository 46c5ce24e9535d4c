//! World metadata, the name index, and world-level exclusive mode.
//!
//! Each world lives behind its own `RwLock` inside a sharded map, so edits in
//! one world never wait on another. The in-memory state is authoritative;
//! every mutation is written through to the record store before it is
//! committed in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gt_rs_store::model::world_prefix;
use gt_rs_store::{
    Block, Clock, IdAllocator, RecordStore, RecordStoreExt, Tree, World, WorldOptions,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::WorldError;
use crate::grid::Cell;
use crate::lock::{LockError, LockGrant, LockManager, LockToken, ResourceId};

const MAX_NAME_LEN: usize = 24;

/// Validate a world name and return its canonical upper-case form.
pub fn normalize_world_name(name: &str) -> Result<String, WorldError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !valid {
        return Err(WorldError::InvalidWorldName(name.to_string()));
    }
    Ok(name.to_ascii_uppercase())
}

/// One world and its occupied cells.
#[derive(Debug)]
pub(crate) struct WorldState {
    pub(crate) world: World,
    pub(crate) cells: HashMap<(i32, i32), Cell>,
}

impl WorldState {
    fn new(world: World) -> Self {
        Self {
            world,
            cells: HashMap::new(),
        }
    }
}

pub(crate) type WorldShard = Arc<RwLock<WorldState>>;

pub struct WorldRegistry {
    worlds: DashMap<u64, WorldShard>,
    /// Upper-cased name -> world id.
    names: DashMap<String, u64>,
    store: Arc<dyn RecordStore>,
    locks: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    world_ids: IdAllocator,
    pub(crate) block_ids: IdAllocator,
    pub(crate) tree_ids: IdAllocator,
}

impl WorldRegistry {
    /// An empty registry.
    pub fn new(store: Arc<dyn RecordStore>, locks: Arc<LockManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            worlds: DashMap::new(),
            names: DashMap::new(),
            store,
            locks,
            clock,
            world_ids: IdAllocator::default(),
            block_ids: IdAllocator::default(),
            tree_ids: IdAllocator::default(),
        }
    }

    /// Rebuild every world with its blocks and trees from the store.
    ///
    /// Lock state does not survive a restart, so persisted lock fields are
    /// cleared. Records that break the one-entity-per-cell rule or fall
    /// outside their world are skipped with a warning.
    pub fn load(
        store: Arc<dyn RecordStore>,
        locks: Arc<LockManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WorldError> {
        let mut worlds: Vec<World> = store.scan_records("")?;
        worlds.sort_by_key(|w| w.id);

        let map = DashMap::new();
        let names = DashMap::new();
        let mut max_block = 0;
        let mut max_tree = 0;

        for mut world in worlds {
            let name = world.name.to_ascii_uppercase();
            if names.contains_key(&name) {
                warn!("world {} duplicates name {name}, skipping", world.id);
                continue;
            }
            if world.locked() || world.lock_id().is_some() {
                world.clear_lock();
                store.save(&world)?;
            }

            let prefix = world_prefix(world.id);
            let mut state = WorldState::new(world);

            for mut block in store.scan_records::<Block>(&prefix)? {
                max_block = max_block.max(block.id);
                if !state.world.contains(block.grid_x, block.grid_y) {
                    warn!(
                        "block {} at ({}, {}) is outside world {}, skipping",
                        block.id, block.grid_x, block.grid_y, state.world.id
                    );
                    continue;
                }
                if block.lock_id.take().is_some() {
                    store.save(&block)?;
                }
                state
                    .cells
                    .insert((block.grid_x, block.grid_y), Cell::Block(block));
            }

            for tree in store.scan_records::<Tree>(&prefix)? {
                max_tree = max_tree.max(tree.id);
                let pos = (tree.grid_x, tree.grid_y);
                if !state.world.contains(pos.0, pos.1) || state.cells.contains_key(&pos) {
                    warn!(
                        "tree {} at ({}, {}) in world {} conflicts with the grid, skipping",
                        tree.id, pos.0, pos.1, state.world.id
                    );
                    continue;
                }
                state.cells.insert(pos, Cell::Tree(tree));
            }

            debug!(
                "loaded world {} ({}) with {} cells",
                state.world.id,
                state.world.name,
                state.cells.len()
            );
            names.insert(name, state.world.id);
            map.insert(state.world.id, Arc::new(RwLock::new(state)));
        }

        let world_ids = IdAllocator::after(map.iter().map(|e| *e.key()));
        info!("loaded {} world(s)", map.len());

        Ok(Self {
            worlds: map,
            names,
            store,
            locks,
            clock,
            world_ids,
            block_ids: IdAllocator::new(max_block + 1),
            tree_ids: IdAllocator::new(max_tree + 1),
        })
    }

    // ─── Worlds ─────────────────────────────────────────────────────────────

    pub fn create_world(
        &self,
        name: &str,
        owner: Option<&str>,
        options: WorldOptions,
    ) -> Result<World, WorldError> {
        let name = normalize_world_name(name)?;
        if options.width == 0 || options.height == 0 {
            return Err(WorldError::InvalidArgument(format!(
                "world extents must be positive, got {}x{}",
                options.width, options.height
            )));
        }

        match self.names.entry(name.clone()) {
            Entry::Occupied(_) => Err(WorldError::NameTaken(name)),
            Entry::Vacant(vacant) => {
                let id = self.world_ids.allocate();
                let world = World::new(id, &name, owner, options, self.now());
                self.store.insert_record(&world)?;

                self.worlds
                    .insert(id, Arc::new(RwLock::new(WorldState::new(world.clone()))));
                vacant.insert(id);
                info!(
                    "created world {name} (id {id}, {}x{}, owner {:?})",
                    world.width, world.height, world.owner
                );
                Ok(world)
            }
        }
    }

    pub fn get_world(&self, world_id: u64) -> Result<World, WorldError> {
        let shard = self.shard(world_id)?;
        {
            let state = shard.read();
            if !self.world_lock_lapsed(&state.world) {
                return Ok(state.world.clone());
            }
        }
        let mut state = shard.write();
        self.clear_lapsed_world_lock(&mut state);
        Ok(state.world.clone())
    }

    /// Case-insensitive lookup.
    pub fn find_by_name(&self, name: &str) -> Result<World, WorldError> {
        let key = normalize_world_name(name)?;
        let id = self
            .names
            .get(&key)
            .map(|e| *e.value())
            .ok_or_else(|| WorldError::WorldNameNotFound(key))?;
        self.get_world(id)
    }

    /// Every world, ordered by id.
    pub fn list_worlds(&self) -> Vec<World> {
        self.world_ids()
            .into_iter()
            .filter_map(|id| self.get_world(id).ok())
            .collect()
    }

    pub fn world_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.worlds.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    pub fn set_description(
        &self,
        world_id: u64,
        requester: &str,
        description: Option<&str>,
    ) -> Result<World, WorldError> {
        let shard = self.shard(world_id)?;
        let mut state = shard.write();
        if state.world.owner.as_deref() != Some(requester) {
            return Err(WorldError::NotOwner {
                requester: requester.to_string(),
            });
        }
        let mut world = state.world.clone();
        world.description = description.map(str::to_string);
        world.updated_at = self.now();
        self.store.save(&world)?;
        state.world = world.clone();
        Ok(world)
    }

    // ─── Player count ───────────────────────────────────────────────────────

    pub fn increment_player_count(&self, world_id: u64) -> Result<u32, WorldError> {
        self.adjust_player_count(world_id, |n| n.saturating_add(1))
    }

    /// Saturates at zero, so a late disconnect never drives the count negative.
    pub fn decrement_player_count(&self, world_id: u64) -> Result<u32, WorldError> {
        self.adjust_player_count(world_id, |n| n.saturating_sub(1))
    }

    fn adjust_player_count(
        &self,
        world_id: u64,
        f: impl FnOnce(u32) -> u32,
    ) -> Result<u32, WorldError> {
        let shard = self.shard(world_id)?;
        let mut state = shard.write();
        let count = f(state.world.player_count);
        if count == state.world.player_count {
            return Ok(count);
        }
        let mut world = state.world.clone();
        world.player_count = count;
        world.updated_at = self.now();
        self.store.save(&world)?;
        state.world = world;
        Ok(count)
    }

    // ─── World lock ─────────────────────────────────────────────────────────

    /// Put the world in exclusive mode for `holder`.
    ///
    /// The lock manager entry and the persisted `locked`/`lock_id` pair change
    /// under the world's write lock, so no edit observes one without the other.
    pub fn lock_world(
        &self,
        world_id: u64,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockGrant, WorldError> {
        let shard = self.shard(world_id)?;
        let mut state = shard.write();
        let resource = ResourceId::world(world_id).to_string();
        let grant = self.locks.acquire(&resource, holder, ttl)?;

        let mut world = state.world.clone();
        world.engage_lock(grant.token.as_str());
        world.updated_at = self.now();
        if let Err(e) = self.store.save(&world) {
            if !grant.renewed {
                let _ = self.locks.release(&resource, &grant.token);
            }
            return Err(e.into());
        }
        state.world = world;
        info!(
            "world {} locked by {holder} until {}",
            state.world.name, grant.expires_at
        );
        Ok(grant)
    }

    /// Leave exclusive mode. A matching token whose lock already lapsed still
    /// clears the world.
    pub fn unlock_world(&self, world_id: u64, token: &LockToken) -> Result<(), WorldError> {
        let shard = self.shard(world_id)?;
        let mut state = shard.write();
        let resource = ResourceId::world(world_id).to_string();
        if state.world.lock_id() != Some(token.as_str()) {
            return Err(LockError::NotHolder { resource }.into());
        }

        let mut world = state.world.clone();
        world.clear_lock();
        world.updated_at = self.now();
        self.store.save(&world)?;
        state.world = world;

        if let Err(e) = self.locks.release(&resource, token) {
            debug!("world {} unlock after lapse: {e}", state.world.name);
        }
        info!("world {} unlocked", state.world.name);
        Ok(())
    }

    pub fn renew_world_lock(
        &self,
        world_id: u64,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<u64, WorldError> {
        let shard = self.shard(world_id)?;
        let resource = ResourceId::world(world_id).to_string();
        match self.locks.renew(&resource, token, ttl) {
            Ok(until) => Ok(until),
            Err(e) => {
                let mut state = shard.write();
                self.clear_lapsed_world_lock(&mut state);
                Err(e.into())
            }
        }
    }

    // ─── Crate internals ────────────────────────────────────────────────────

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn shard(&self, world_id: u64) -> Result<WorldShard, WorldError> {
        self.worlds
            .get(&world_id)
            .map(|e| e.value().clone())
            .ok_or(WorldError::WorldNotFound(world_id))
    }

    /// Snapshot of every shard, ordered by world id.
    pub(crate) fn shards(&self) -> Vec<(u64, WorldShard)> {
        let mut shards: Vec<_> = self
            .worlds
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        shards.sort_unstable_by_key(|(id, _)| *id);
        shards
    }

    fn world_lock_lapsed(&self, world: &World) -> bool {
        match world.lock_id() {
            Some(token) => {
                !self
                    .locks
                    .is_held_with(&ResourceId::world(world.id).to_string(), token)
            }
            None => world.locked(),
        }
    }

    /// Clear `locked`/`lock_id` if the backing lock has expired. Returns
    /// whether anything was cleared.
    pub(crate) fn clear_lapsed_world_lock(&self, state: &mut WorldState) -> bool {
        if !self.world_lock_lapsed(&state.world) {
            return false;
        }
        let mut world = state.world.clone();
        world.clear_lock();
        if let Err(e) = self.store.save(&world) {
            warn!("failed to persist lapsed lock on world {}: {e}", world.name);
        }
        debug!("world {} lock lapsed", world.name);
        state.world = world;
        true
    }

    /// Edits are refused while someone other than `requester` holds the
    /// world lock.
    pub(crate) fn ensure_editable(
        &self,
        state: &mut WorldState,
        requester: &str,
    ) -> Result<(), WorldError> {
        if !state.world.locked() || self.clear_lapsed_world_lock(state) {
            return Ok(());
        }
        let resource = ResourceId::world(state.world.id).to_string();
        match self.locks.holder(&resource) {
            Some(info) if info.holder == requester => Ok(()),
            _ => Err(WorldError::WorldLocked {
                world_id: state.world.id,
            }),
        }
    }

    /// Bump `updated_at` after a grid edit. Best effort: the edit itself is
    /// already durable.
    pub(crate) fn touch_world(&self, state: &mut WorldState) {
        let mut world = state.world.clone();
        world.updated_at = self.now();
        match self.store.save(&world) {
            Ok(()) => state.world = world,
            Err(e) => warn!("failed to touch world {}: {e}", world.name),
        }
    }
}
