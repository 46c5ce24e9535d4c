//! World state core: locks, worlds, the block grid, and tree growth.

pub mod door;
pub mod error;
pub mod grid;
pub mod growth;
pub mod lock;
pub mod registry;

pub use door::DoorTarget;
pub use error::{ErrorKind, WorldError};
pub use grid::{Cell, EditPolicy, GridStore, OpenEdit, OwnerOrWorldOwner, Placement, SweepReport};
pub use growth::{is_harvestable, GrowthEngine, SeedCatalog, Species, TickReport};
pub use lock::{LockError, LockGrant, LockInfo, LockManager, LockToken, ResourceId};
pub use registry::{normalize_world_name, WorldRegistry};
