//! Persisted record shapes for users, worlds, blocks, trees and sessions.
//!
//! All timestamps are unix milliseconds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{Record, Table};

pub const DEFAULT_WIDTH: u32 = 100;
pub const DEFAULT_HEIGHT: u32 = 60;
pub const DEFAULT_BLOCK_SIZE: u32 = 32;
pub const DEFAULT_GRAVITY: i32 = 600;
pub const DEFAULT_BACKGROUND: &str = "#87CEEB";

/// Primary key of a cell-addressed record: `<worldId>:<x>:<y>`.
pub fn cell_key(world_id: u64, x: i32, y: i32) -> String {
    format!("{world_id}:{x}:{y}")
}

/// Key prefix selecting every cell-addressed record of one world.
pub fn world_prefix(world_id: u64) -> String {
    format!("{world_id}:")
}

// ─── Users ──────────────────────────────────────────────────────────────────

/// Opaque stored credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password: Credential,
    #[serde(default)]
    pub gems: u64,
    /// Serialized appearance settings, uninterpreted here.
    pub appearance: Option<String>,
    /// Serialized inventory, uninterpreted here.
    pub inventory: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl User {
    pub fn new(id: u64, username: &str, password: Credential, now: u64) -> Self {
        Self {
            id,
            username: username.to_string(),
            password,
            gems: 0,
            appearance: None,
            inventory: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for User {
    const TABLE: Table = Table::Users;

    fn key(&self) -> String {
        self.username.clone()
    }
}

// ─── Worlds ─────────────────────────────────────────────────────────────────

/// Creation-time world settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldOptions {
    pub width: u32,
    pub height: u32,
    pub block_size: u32,
    pub gravity: i32,
    pub background_color: String,
    pub description: Option<String>,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            block_size: DEFAULT_BLOCK_SIZE,
            gravity: DEFAULT_GRAVITY,
            background_color: DEFAULT_BACKGROUND.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub id: u64,
    pub name: String,
    pub owner: Option<String>,
    pub width: u32,
    pub height: u32,
    pub block_size: u32,
    pub gravity: i32,
    pub background_color: String,
    /// Exclusive-mode flag; only changes together with `lock_id`.
    locked: bool,
    lock_id: Option<String>,
    pub player_count: u32,
    pub description: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl World {
    pub fn new(id: u64, name: &str, owner: Option<&str>, options: WorldOptions, now: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner: owner.map(str::to_string),
            width: options.width,
            height: options.height,
            block_size: options.block_size,
            gravity: options.gravity,
            background_color: options.background_color,
            locked: false,
            lock_id: None,
            player_count: 0,
            description: options.description,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn lock_id(&self) -> Option<&str> {
        self.lock_id.as_deref()
    }

    pub fn engage_lock(&mut self, token: impl Into<String>) {
        self.locked = true;
        self.lock_id = Some(token.into());
    }

    pub fn clear_lock(&mut self) {
        self.locked = false;
        self.lock_id = None;
    }

    /// Whether `(x, y)` lies inside the grid extents.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }
}

impl Record for World {
    const TABLE: Table = Table::Worlds;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ─── Blocks ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub world_id: u64,
    pub grid_x: i32,
    pub grid_y: i32,
    #[serde(rename = "type")]
    pub block_type: i32,
    /// Present only for destructible blocks; never stored as zero.
    pub durability: Option<u32>,
    pub lock_id: Option<String>,
    pub owner_id: Option<String>,
    pub door_target: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Record for Block {
    const TABLE: Table = Table::Blocks;

    fn key(&self) -> String {
        cell_key(self.world_id, self.grid_x, self.grid_y)
    }
}

// ─── Trees ──────────────────────────────────────────────────────────────────

/// Largest stage index whose threshold `progress` has reached.
pub fn stage_for(progress: u32, thresholds: &[u32]) -> u8 {
    thresholds
        .iter()
        .rposition(|&t| progress >= t)
        .unwrap_or(0) as u8
}

/// Final stage index of a threshold table.
pub fn max_stage(thresholds: &[u32]) -> u8 {
    thresholds.len().saturating_sub(1) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub id: u64,
    pub world_id: u64,
    pub grid_x: i32,
    pub grid_y: i32,
    pub seed_id: String,
    growth_progress: u32,
    growth_stage: u8,
    harvestable: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Tree {
    /// A freshly planted seed at stage 0.
    pub fn planted(id: u64, world_id: u64, x: i32, y: i32, seed_id: &str, now: u64) -> Self {
        Self {
            id,
            world_id,
            grid_x: x,
            grid_y: y,
            seed_id: seed_id.to_string(),
            growth_progress: 0,
            growth_stage: 0,
            harvestable: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn growth_progress(&self) -> u32 {
        self.growth_progress
    }

    pub fn growth_stage(&self) -> u8 {
        self.growth_stage
    }

    pub fn harvestable(&self) -> bool {
        self.harvestable
    }

    /// Add `delta` progress (clamped to the final threshold, never reduced)
    /// and re-derive stage and harvestability from `thresholds`.
    ///
    /// Progress, stage and harvestability only move forward, even when
    /// `thresholds` is stricter than the table the tree grew under.
    ///
    /// Returns `true` if any growth field changed.
    pub fn advance(&mut self, delta: u32, thresholds: &[u32]) -> bool {
        let cap = thresholds.last().copied().unwrap_or(0);
        let progress = self
            .growth_progress
            .saturating_add(delta)
            .min(cap)
            .max(self.growth_progress);
        let stage = stage_for(progress, thresholds).max(self.growth_stage);
        let harvestable = self.harvestable || stage >= max_stage(thresholds);

        let changed = progress != self.growth_progress
            || stage != self.growth_stage
            || harvestable != self.harvestable;
        self.growth_progress = progress;
        self.growth_stage = stage;
        self.harvestable = harvestable;
        changed
    }
}

impl Record for Tree {
    const TABLE: Table = Table::Trees;

    fn key(&self) -> String {
        cell_key(self.world_id, self.grid_x, self.grid_y)
    }
}

// ─── Sessions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    pub sid: String,
    /// Serialized session payload, uninterpreted here.
    pub data: String,
    pub expires_at: u64,
}

impl Session {
    /// Logically dead once `expires_at` is reached, stored or not.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

impl Record for Session {
    const TABLE: Table = Table::Sessions;

    fn key(&self) -> String {
        self.sid.clone()
    }
}
