//! The durable record store contract.
//!
//! Backends only provide single-row atomic operations over raw bytes keyed by
//! `(table, primary key)`. Typed access lives in [`RecordStoreExt`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

// ─── Tables ─────────────────────────────────────────────────────────────────

const TAG_USERS: u8 = 0x01;
const TAG_WORLDS: u8 = 0x02;
const TAG_BLOCKS: u8 = 0x03;
const TAG_TREES: u8 = 0x04;
const TAG_SESSIONS: u8 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Worlds,
    Blocks,
    Trees,
    Sessions,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Users,
        Table::Worlds,
        Table::Blocks,
        Table::Trees,
        Table::Sessions,
    ];

    /// One-byte key prefix separating tables inside a single keyspace.
    pub fn tag(self) -> u8 {
        match self {
            Table::Users => TAG_USERS,
            Table::Worlds => TAG_WORLDS,
            Table::Blocks => TAG_BLOCKS,
            Table::Trees => TAG_TREES,
            Table::Sessions => TAG_SESSIONS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Worlds => "worlds",
            Table::Blocks => "blocks",
            Table::Trees => "trees",
            Table::Sessions => "sessions",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a backend key: `[tag][primary key utf-8]`.
pub(crate) fn encode_key(table: Table, key: &str) -> Vec<u8> {
    let mut raw = Vec::with_capacity(1 + key.len());
    raw.push(table.tag());
    raw.extend_from_slice(key.as_bytes());
    raw
}

/// Strip the table tag from a backend key.
pub(crate) fn decode_key(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw.get(1..).unwrap_or_default()).into_owned()
}

// ─── Raw contract ───────────────────────────────────────────────────────────

/// Create/read/update/delete by primary key plus prefix lookup.
///
/// Each call is atomic on its own; there are no cross-row transactions.
pub trait RecordStore: Send + Sync {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert a new row. Fails with [`StoreError::Conflict`] if the key exists.
    fn insert(&self, table: Table, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Insert or overwrite a row.
    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Delete a row, returning whether it existed.
    fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError>;

    /// All rows of `table` whose primary key starts with `prefix`.
    fn scan(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ─── Typed access ───────────────────────────────────────────────────────────

/// A persisted record bound to one table.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: Table;

    fn key(&self) -> String;
}

/// Typed helpers over any [`RecordStore`], including `dyn RecordStore`.
pub trait RecordStoreExt: RecordStore {
    fn load<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
        match self.get(R::TABLE, key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn insert_record<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(record)?;
        self.insert(R::TABLE, &record.key(), &raw)
    }

    fn save<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(record)?;
        self.put(R::TABLE, &record.key(), &raw)
    }

    fn remove<R: Record>(&self, key: &str) -> Result<bool, StoreError> {
        self.delete(R::TABLE, key)
    }

    fn scan_records<R: Record>(&self, prefix: &str) -> Result<Vec<R>, StoreError> {
        self.scan(R::TABLE, prefix)?
            .into_iter()
            .map(|(_, raw)| serde_json::from_slice(&raw).map_err(StoreError::from))
            .collect()
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}
