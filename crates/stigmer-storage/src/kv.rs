// Key-value engine abstraction.
//
// Decision: Use enum dispatch for simplicity over trait objects
//
// The engine serializes writes per key, which gives the daemon its
// single-writer-per-resource-id discipline without any extra locking in
// the layers above.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;

use crate::store::StoreError;

/// Key-value engine that can be either sled (file-backed) or in-memory.
pub enum KvEngine {
    /// Embedded sled database (production)
    Sled(sled::Db),
    /// In-memory map (dev mode and tests)
    Memory(RwLock<BTreeMap<Vec<u8>, Vec<u8>>>),
}

impl KvEngine {
    /// Open (or create) a sled database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| StoreError::Engine(format!("open {}: {}", path.as_ref().display(), e)))?;
        Ok(Self::Sled(db))
    }

    /// Create an in-memory engine.
    pub fn in_memory() -> Self {
        Self::Memory(RwLock::new(BTreeMap::new()))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Self::Sled(db) => Ok(db
                .get(key)
                .map_err(|e| StoreError::Engine(e.to_string()))?
                .map(|v| v.to_vec())),
            Self::Memory(map) => Ok(map.read().get(key).cloned()),
        }
    }

    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        match self {
            Self::Sled(db) => {
                db.insert(key, value)
                    .map_err(|e| StoreError::Engine(e.to_string()))?;
                db.flush().map_err(|e| StoreError::Engine(e.to_string()))?;
                Ok(())
            }
            Self::Memory(map) => {
                map.write().insert(key.to_vec(), value);
                Ok(())
            }
        }
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Self::Sled(db) => {
                db.remove(key)
                    .map_err(|e| StoreError::Engine(e.to_string()))?;
                db.flush().map_err(|e| StoreError::Engine(e.to_string()))?;
                Ok(())
            }
            Self::Memory(map) => {
                map.write().remove(key);
                Ok(())
            }
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        match self {
            Self::Sled(db) => {
                let mut values = Vec::new();
                for entry in db.scan_prefix(prefix) {
                    let (_, value) = entry.map_err(|e| StoreError::Engine(e.to_string()))?;
                    values.push(value.to_vec());
                }
                Ok(values)
            }
            Self::Memory(map) => {
                let map = map.read();
                let values = map
                    .range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(_, v)| v.clone())
                    .collect();
                Ok(values)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_engine(engine: &KvEngine) {
        assert_eq!(engine.get(b"a/1").unwrap(), None);

        engine.put(b"a/1", b"one".to_vec()).unwrap();
        engine.put(b"a/2", b"two".to_vec()).unwrap();
        engine.put(b"b/1", b"other".to_vec()).unwrap();

        assert_eq!(engine.get(b"a/1").unwrap(), Some(b"one".to_vec()));

        let scanned = engine.scan_prefix(b"a/").unwrap();
        assert_eq!(scanned, vec![b"one".to_vec(), b"two".to_vec()]);

        engine.delete(b"a/1").unwrap();
        assert_eq!(engine.get(b"a/1").unwrap(), None);
        assert_eq!(engine.scan_prefix(b"a/").unwrap().len(), 1);

        // Deleting a missing key is not an error.
        engine.delete(b"a/1").unwrap();
    }

    #[test]
    fn test_memory_engine() {
        exercise_engine(&KvEngine::in_memory());
    }

    #[test]
    fn test_sled_engine() {
        let dir = tempfile::tempdir().unwrap();
        exercise_engine(&KvEngine::open(dir.path().join("kv.db")).unwrap());
    }

    #[test]
    fn test_sled_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let engine = KvEngine::open(&path).unwrap();
            engine.put(b"k", b"v".to_vec()).unwrap();
        }
        let engine = KvEngine::open(&path).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
