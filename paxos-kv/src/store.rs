//! In-memory key-value storage with per-key reader/writer locks.
//!
//! Every replica owns one [`KeyStore`]. Decided operations are applied here,
//! and GET requests are answered from it without consulting any peer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type KeyLock = Arc<RwLock<()>>;

/// Thread-safe key-value store shared by every request handler of a replica.
///
/// Values and locks live in separate tables. A key's lock is created the
/// first time the key is referenced and is never removed, even after the key
/// itself is deleted, so the lock table only grows.
///
/// Write locks are not tied to a lexical scope: a two-phase-commit PREPARE
/// takes the lock in one request and the matching COMMIT or ABORT releases
/// it in another. Held write guards are therefore parked in `held_writes`
/// until [`KeyStore::write_unlock`] drops them. Read locks are scoped and
/// released by dropping the returned [`KeyReadGuard`].
#[derive(Default)]
pub struct KeyStore {
    data: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, KeyLock>>,
    held_writes: Mutex<HashMap<String, OwnedRwLockWriteGuard<()>>>,
}

/// Shared access to one key, held until dropped.
pub struct KeyReadGuard {
    key: String,
    _guard: OwnedRwLockReadGuard<()>,
}

impl KeyReadGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    /// Removes a key, returning the value it held.
    pub fn delete(&self, key: &str) -> Option<String> {
        self.data.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Copy of every key-value pair, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Attempts to take the exclusive lock on `key` without waiting.
    ///
    /// Returns `false` immediately if any reader or writer holds it. A
    /// successful lock stays held until [`KeyStore::write_unlock`].
    pub fn try_write_lock(&self, key: &str) -> bool {
        let lock = self.lock_for(key);
        match lock.try_write_owned() {
            Ok(guard) => {
                self.held_writes.lock().insert(key.to_string(), guard);
                true
            }
            Err(_) => false,
        }
    }

    /// Releases the exclusive lock on `key`. Returns whether it was held.
    pub fn write_unlock(&self, key: &str) -> bool {
        self.held_writes.lock().remove(key).is_some()
    }

    /// Waits until shared access to `key` is available.
    pub async fn read_lock(&self, key: &str) -> KeyReadGuard {
        let lock = self.lock_for(key);
        let guard = lock.read_owned().await;
        KeyReadGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Number of keys that have ever had a lock created.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn lock_for(&self, key: &str) -> KeyLock {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}
