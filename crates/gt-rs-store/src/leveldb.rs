//! LevelDB-backed record store.
//!
//! Every table shares one database; keys are `[table tag][primary key]` and
//! values are JSON-encoded records.

use std::path::Path;

use parking_lot::Mutex;
use rusty_leveldb::{LdbIterator, DB};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{decode_key, encode_key, RecordStore, Table};

/// Wraps a `rusty_leveldb::DB` behind a mutex so each call is atomic.
pub struct LevelDbStore {
    db: Mutex<DB>,
}

impl LevelDbStore {
    /// Open or create a LevelDB database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let opts = rusty_leveldb::Options {
            create_if_missing: true,
            ..rusty_leveldb::Options::default()
        };

        let db = DB::open(path, opts)
            .map_err(|e| StoreError::Backend(format!("failed to open LevelDB: {e}")))?;
        debug!("opened record store at {}", path.display());
        Ok(Self { db: Mutex::new(db) })
    }
}

impl RecordStore for LevelDbStore {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.lock().get(&encode_key(table, key)))
    }

    fn insert(&self, table: Table, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let raw = encode_key(table, key);
        let mut db = self.db.lock();
        if db.get(&raw).is_some() {
            return Err(StoreError::Conflict {
                table,
                key: key.to_string(),
            });
        }
        db.put(&raw, value)
            .map_err(|e| StoreError::Backend(format!("insert {table}/{key}: {e}")))
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .lock()
            .put(&encode_key(table, key), value)
            .map_err(|e| StoreError::Backend(format!("put {table}/{key}: {e}")))
    }

    fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let raw = encode_key(table, key);
        let mut db = self.db.lock();
        if db.get(&raw).is_none() {
            return Ok(false);
        }
        db.delete(&raw)
            .map_err(|e| StoreError::Backend(format!("delete {table}/{key}: {e}")))?;
        Ok(true)
    }

    fn scan(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let start = encode_key(table, prefix);
        let mut db = self.db.lock();
        let mut iter = db
            .new_iter()
            .map_err(|e| StoreError::Backend(format!("scan {table}: {e}")))?;

        // Seek lands on the first key >= start; read until the prefix ends.
        iter.seek(&start);
        let mut rows = Vec::new();
        let (mut k, mut v) = (Vec::new(), Vec::new());
        while iter.valid() && iter.current(&mut k, &mut v) {
            if !k.starts_with(&start) {
                break;
            }
            rows.push((decode_key(&k), v.clone()));
            if !iter.advance() {
                break;
            }
        }
        Ok(rows)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .lock()
            .flush()
            .map_err(|e| StoreError::Backend(format!("flush: {e}")))
    }
}
