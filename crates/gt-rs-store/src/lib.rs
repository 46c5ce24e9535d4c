//! Persisted records, the durable record store contract, and its backends.

pub mod clock;
pub mod error;
pub mod id;
pub mod leveldb;
pub mod memory;
pub mod model;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use id::IdAllocator;
pub use leveldb::LevelDbStore;
pub use memory::MemoryStore;
pub use model::{Block, Credential, Session, Tree, User, World, WorldOptions};
pub use store::{Record, RecordStore, RecordStoreExt, Table};
