//! In-memory record store for tests and ephemeral servers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::{decode_key, encode_key, RecordStore, Table};

/// Ordered in-memory keyspace with the same key layout as the LevelDB backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: Table) -> usize {
        let tag = table.tag();
        self.rows
            .read()
            .keys()
            .filter(|k| k.first() == Some(&tag))
            .count()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write rejected (fault injection)".into()));
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.rows.read().get(&encode_key(table, key)).cloned())
    }

    fn insert(&self, table: Table, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        let raw = encode_key(table, key);
        let mut rows = self.rows.write();
        if rows.contains_key(&raw) {
            return Err(StoreError::Conflict {
                table,
                key: key.to_string(),
            });
        }
        rows.insert(raw, value.to_vec());
        Ok(())
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.rows
            .write()
            .insert(encode_key(table, key), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        self.check_writable()?;
        Ok(self.rows.write().remove(&encode_key(table, key)).is_some())
    }

    fn scan(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let start = encode_key(table, prefix);
        let rows = self.rows.read();
        Ok(rows
            .range(start.clone()..)
            .take_while(|(k, _)| k.starts_with(&start))
            .map(|(k, v)| (decode_key(k), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Session, World, WorldOptions};
    use crate::store::RecordStoreExt;

    #[test]
    fn insert_rejects_duplicate_key() {
        let store = MemoryStore::new();
        store.insert(Table::Users, "alice", b"1").unwrap();
        let err = store.insert(Table::Users, "alice", b"2").unwrap_err();
        assert!(matches!(err, StoreError::Conflict { table: Table::Users, .. }));
        assert_eq!(store.get(Table::Users, "alice").unwrap().unwrap(), b"1");
    }

    #[test]
    fn tables_are_isolated() {
        let store = MemoryStore::new();
        store.put(Table::Blocks, "1:0:0", b"block").unwrap();
        store.put(Table::Trees, "1:0:0", b"tree").unwrap();
        assert_eq!(store.get(Table::Blocks, "1:0:0").unwrap().unwrap(), b"block");
        assert_eq!(store.get(Table::Trees, "1:0:0").unwrap().unwrap(), b"tree");
        assert_eq!(store.count(Table::Blocks), 1);
    }

    #[test]
    fn scan_respects_prefix() {
        let store = MemoryStore::new();
        store.put(Table::Blocks, "1:0:0", b"a").unwrap();
        store.put(Table::Blocks, "1:5:2", b"b").unwrap();
        store.put(Table::Blocks, "11:0:0", b"c").unwrap();
        store.put(Table::Trees, "1:9:9", b"d").unwrap();

        let rows = store.scan(Table::Blocks, "1:").unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["1:0:0", "1:5:2"]);
        assert_eq!(store.scan(Table::Blocks, "").unwrap().len(), 3);
    }

    #[test]
    fn delete_reports_existence() {
        let store = MemoryStore::new();
        store.put(Table::Sessions, "s", b"x").unwrap();
        assert!(store.delete(Table::Sessions, "s").unwrap());
        assert!(!store.delete(Table::Sessions, "s").unwrap());
    }

    #[test]
    fn injected_failures_leave_rows_untouched() {
        let store = MemoryStore::new();
        store.put(Table::Users, "bob", b"v1").unwrap();
        store.fail_writes(true);
        assert!(store.put(Table::Users, "bob", b"v2").is_err());
        assert!(store.delete(Table::Users, "bob").is_err());
        assert!(store.insert(Table::Users, "carol", b"v").is_err());
        store.fail_writes(false);
        assert_eq!(store.get(Table::Users, "bob").unwrap().unwrap(), b"v1");
        assert!(store.get(Table::Users, "carol").unwrap().is_none());
    }

    #[test]
    fn typed_records() {
        let store = MemoryStore::new();
        let world = World::new(3, "GARDEN", Some("alice"), WorldOptions::default(), 10);
        store.insert_record(&world).unwrap();
        assert!(store.insert_record(&world).is_err());

        let loaded: World = store.load("3").unwrap().unwrap();
        assert_eq!(loaded.name, "GARDEN");
        assert_eq!(loaded.owner.as_deref(), Some("alice"));

        let session = Session {
            id: 1,
            sid: "tok".into(),
            data: "{\"user\":1}".into(),
            expires_at: 99,
        };
        store.save(&session).unwrap();
        let all: Vec<Session> = store.scan_records("").unwrap();
        assert_eq!(all, vec![session]);
        assert!(store.remove::<Session>("tok").unwrap());
        assert!(store.load::<Session>("tok").unwrap().is_none());
    }
}
