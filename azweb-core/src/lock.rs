//! Named locks serializing mutations against shared remote parents
//!
//! Two operations touching the same App Service, virtual network or subnet
//! must not interleave their mutating calls. Each logical parent is
//! identified by a [`LockKey`]; holding the [`LockGuard`] for a key grants
//! exclusive access until the guard is dropped.
//!
//! Locks are not reentrant. Callers that need several keys acquire them in
//! one global order: App Service name, then virtual network name, then
//! subnet name. [`LockManager::acquire_all`] takes keys in the order given
//! and does not sort them.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Identity of a lockable remote parent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Remote object name (e.g., a virtual network name)
    pub name: String,
    /// Category of object (e.g., "azurerm_virtual_network")
    pub resource_type: String,
}

impl LockKey {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.name)
    }
}

/// Registry of named locks
///
/// Entries are created on first acquisition and live as long as the
/// registry. Share one instance per process (or per test) via `Arc`.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until no other holder exists for `key`, then take it
    pub async fn acquire(&self, key: LockKey) -> LockGuard {
        let mutex = self.entry(&key);
        debug!("Waiting for lock {}", key);
        let guard = mutex.lock_owned().await;
        debug!("Acquired lock {}", key);
        LockGuard {
            key,
            _guard: guard,
        }
    }

    /// Shorthand for `acquire(LockKey::new(name, resource_type))`
    pub async fn lock_by_name(&self, name: &str, resource_type: &str) -> LockGuard {
        self.acquire(LockKey::new(name, resource_type)).await
    }

    /// Acquire every key in the order given
    ///
    /// Guards are returned in acquisition order; [`LockSet`] drops them in
    /// reverse.
    pub async fn acquire_all(&self, keys: &[LockKey]) -> LockSet {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key.clone()).await);
        }
        LockSet { guards }
    }

    /// Whether `key` is currently held
    pub fn is_locked(&self, key: &LockKey) -> bool {
        match self.locks.get(key) {
            Some(mutex) => mutex.try_lock().is_err(),
            None => false,
        }
    }

    /// Number of keys ever acquired through this registry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one [`LockKey`], released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release the lock now instead of at end of scope
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("Released lock {}", self.key);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Several guards taken in order, released in reverse order
#[must_use = "the locks are released as soon as the set is dropped"]
#[derive(Debug, Default)]
pub struct LockSet {
    guards: Vec<LockGuard>,
}

impl LockSet {
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.guards.iter().map(LockGuard::key)
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
