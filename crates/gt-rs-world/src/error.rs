use gt_rs_store::StoreError;
use thiserror::Error;

use crate::lock::LockError;

/// Coarse classification callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    LockConflict,
    OutOfBounds,
    PermissionDenied,
    DataIntegrity,
    Expired,
    InvalidInput,
    Storage,
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world {0} not found")]
    WorldNotFound(u64),

    #[error("world {0:?} not found")]
    WorldNameNotFound(String),

    #[error("nothing at ({x}, {y}) in world {world_id}")]
    NotFound { world_id: u64, x: i32, y: i32 },

    #[error("world name {0:?} is already taken")]
    NameTaken(String),

    #[error("cell ({x}, {y}) in world {world_id} is occupied")]
    CellOccupied { world_id: u64, x: i32, y: i32 },

    #[error("({x}, {y}) is outside a {width}x{height} world")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },

    #[error("world {world_id} is locked")]
    WorldLocked { world_id: u64 },

    #[error("cell ({x}, {y}) in world {world_id} is locked")]
    CellLocked { world_id: u64, x: i32, y: i32 },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("{requester} may not modify this")]
    NotOwner { requester: String },

    #[error("block at ({x}, {y}) cannot be damaged")]
    NotDestructible { x: i32, y: i32 },

    #[error("tree at ({x}, {y}) is not ready to harvest")]
    NotHarvestable { x: i32, y: i32 },

    #[error("unknown seed {0:?}")]
    UnknownSeed(String),

    #[error("invalid door target {0:?}")]
    InvalidDoorTarget(String),

    #[error("invalid world name {0:?}")]
    InvalidWorldName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

impl WorldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorldError::WorldNotFound(_)
            | WorldError::WorldNameNotFound(_)
            | WorldError::NotFound { .. } => ErrorKind::NotFound,
            WorldError::NameTaken(_) | WorldError::CellOccupied { .. } => ErrorKind::Conflict,
            WorldError::WorldLocked { .. } | WorldError::CellLocked { .. } => {
                ErrorKind::LockConflict
            }
            WorldError::Lock(LockError::AlreadyLocked { .. }) => ErrorKind::LockConflict,
            WorldError::Lock(LockError::NotHolder { .. }) => ErrorKind::PermissionDenied,
            WorldError::Lock(LockError::Expired { .. }) => ErrorKind::Expired,
            WorldError::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            WorldError::NotOwner { .. } => ErrorKind::PermissionDenied,
            WorldError::UnknownSeed(_) | WorldError::DataIntegrity(_) => ErrorKind::DataIntegrity,
            WorldError::NotDestructible { .. }
            | WorldError::NotHarvestable { .. }
            | WorldError::InvalidDoorTarget(_)
            | WorldError::InvalidWorldName(_)
            | WorldError::InvalidArgument(_) => ErrorKind::InvalidInput,
            WorldError::Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            WorldError::Store(_) => ErrorKind::Storage,
        }
    }
}
