//! Key-value mirrors for client-side state (session, crash history, farm stats)

use crate::errors::DuelResult;
use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> DuelResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> DuelResult<()>;

    fn remove(&self, key: &str) -> DuelResult<()>;

    /// Keys starting with `prefix`, in byte order
    fn keys_with_prefix(&self, prefix: &str) -> DuelResult<Vec<String>>;

    /// Returns how many keys were removed
    fn remove_prefix(&self, prefix: &str) -> DuelResult<usize> {
        let keys = self.keys_with_prefix(prefix)?;
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> DuelResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> DuelResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes)
}

/// In-memory store
#[derive(Default, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> DuelResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> DuelResult<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> DuelResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> DuelResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// RocksDB-backed store for mirrors that survive restarts
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> DuelResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &str) -> DuelResult<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?)
    }

    fn put(&self, key: &str, value: &[u8]) -> DuelResult<()> {
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> DuelResult<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> DuelResult<Vec<String>> {
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    fn remove_prefix(&self, prefix: &str) -> DuelResult<usize> {
        let keys = self.keys_with_prefix(prefix)?;
        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete(key.as_bytes());
        }
        self.db.write(batch)?;
        Ok(keys.len())
    }
}
