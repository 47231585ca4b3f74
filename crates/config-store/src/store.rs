//! Per-instance configuration records persisted as flat JSON objects.
//!
//! Every mutation runs under a reentrant per-record lock, is written to a
//! temp file in the target directory, fsynced and renamed over the target.
//! Change callbacks run synchronously after a successful write that altered
//! the content.

use std::collections::HashMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::{Map, Value};

use crate::error::ConfigStoreError;
use crate::naming::{self, Qualifier};

/// Content of one configuration record, in insertion order.
pub type ConfigMap = Map<String, Value>;

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Receives `(previous, current)` after a change to a record.
pub type ChangeCallback =
    Arc<dyn Fn(&ConfigMap, &ConfigMap) -> Result<(), CallbackError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type RecordKey = (String, Qualifier);

struct Subscription {
    id: SubscriptionId,
    key: RecordKey,
    callback: ChangeCallback,
}

/// Result of [`ConfigStore::list_all`]: one entry per record file.
pub type Listing = Vec<(Qualifier, Result<ConfigMap, ConfigStoreError>)>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConfigStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConfigStore {
    dir: PathBuf,
    locks: Mutex<HashMap<RecordKey, Arc<ReentrantMutex<()>>>>,
    subscriptions: RwLock<Vec<Subscription>>,
    next_subscription: AtomicU64,
}

impl ConfigStore {
    /// A store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, server: &str, qualifier: &Qualifier) -> Result<PathBuf, ConfigStoreError> {
        Ok(self.dir.join(naming::file_name(server, qualifier)?))
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// The whole record; empty when it was never written.
    pub fn load(&self, server: &str, qualifier: &Qualifier) -> Result<ConfigMap, ConfigStoreError> {
        read_record(&self.path_for(server, qualifier)?)
    }

    /// One setting, or `default` when absent.
    pub fn get(
        &self,
        server: &str,
        qualifier: &Qualifier,
        key: &str,
        default: Value,
    ) -> Result<Value, ConfigStoreError> {
        let record = self.load(server, qualifier)?;
        Ok(record.get(key).cloned().unwrap_or(default))
    }

    /// Every record of `server` found in the directory, ordered by qualifier.
    ///
    /// Each file parses independently; a corrupt one shows up as a
    /// `ParseFailure` entry without hiding the others.
    pub fn list_all(&self, server: &str) -> Result<Listing, ConfigStoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ConfigStoreError::ReadFailure {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut listing: Listing = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let qualifier = naming::parse_file_name(server, name.to_str()?)?;
                Some((qualifier, read_record(&entry.path())))
            })
            .collect();
        listing.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(listing)
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Set one setting; returns the record after the write.
    pub fn set(
        &self,
        server: &str,
        qualifier: &Qualifier,
        key: &str,
        value: Value,
    ) -> Result<ConfigMap, ConfigStoreError> {
        let (current, ()) = self.mutate(server, qualifier, |record| {
            record.insert(key.to_owned(), value);
        })?;
        Ok(current)
    }

    /// Merge `values` into the record; returns the record after the write.
    pub fn update(
        &self,
        server: &str,
        qualifier: &Qualifier,
        values: ConfigMap,
    ) -> Result<ConfigMap, ConfigStoreError> {
        let (current, ()) = self.mutate(server, qualifier, |record| {
            for (key, value) in values {
                record.insert(key, value);
            }
        })?;
        Ok(current)
    }

    /// Remove one setting; returns its previous value.
    pub fn delete(
        &self,
        server: &str,
        qualifier: &Qualifier,
        key: &str,
    ) -> Result<Option<Value>, ConfigStoreError> {
        let (_, removed) = self.mutate(server, qualifier, |record| record.shift_remove(key))?;
        Ok(removed)
    }

    /// Delete the record's file. Returns whether a file existed.
    pub fn remove_record(&self, server: &str, qualifier: &Qualifier) -> Result<bool, ConfigStoreError> {
        let path = self.path_for(server, qualifier)?;
        let key = (server.to_owned(), qualifier.clone());
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        let previous = read_record(&path).unwrap_or_default();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(ConfigStoreError::WriteFailure { path, source }),
        }
        tracing::info!(server, %qualifier, path = %path.display(), "config record removed");

        if !previous.is_empty() {
            self.notify(&key, &previous, &ConfigMap::new());
        }
        Ok(true)
    }

    /// Load, apply `f`, persist atomically, then notify on change.
    fn mutate<R>(
        &self,
        server: &str,
        qualifier: &Qualifier,
        f: impl FnOnce(&mut ConfigMap) -> R,
    ) -> Result<(ConfigMap, R), ConfigStoreError> {
        let path = self.path_for(server, qualifier)?;
        let key = (server.to_owned(), qualifier.clone());
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        let previous = read_record(&path)?;
        let mut current = previous.clone();
        let out = f(&mut current);

        write_atomic(&self.dir, &path, &current)?;
        tracing::debug!(server, %qualifier, path = %path.display(), "config record written");

        if current != previous {
            self.notify(&key, &previous, &current);
        }
        Ok((current, out))
    }

    fn lock_for(&self, key: &RecordKey) -> Arc<ReentrantMutex<()>> {
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    // ── Change notification ────────────────────────────────────────────

    /// Register `callback` for changes to one record.
    ///
    /// Callbacks run on the writer's thread, in registration order, while
    /// the record lock is held; writing back into the same record from a
    /// callback is allowed.
    pub fn on_change<F>(
        &self,
        server: &str,
        qualifier: &Qualifier,
        callback: F,
    ) -> Result<SubscriptionId, ConfigStoreError>
    where
        F: Fn(&ConfigMap, &ConfigMap) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        naming::validate(server, qualifier)?;
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            key: (server.to_owned(), qualifier.clone()),
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    fn notify(&self, key: &RecordKey, previous: &ConfigMap, current: &ConfigMap) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<(SubscriptionId, ChangeCallback)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.key == *key)
            .map(|s| (s.id, s.callback.clone()))
            .collect();

        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(previous, current))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    subscription = id.0,
                    server = %key.0,
                    qualifier = %key.1,
                    error = %e,
                    "config change callback failed"
                ),
                Err(_) => tracing::error!(
                    subscription = id.0,
                    server = %key.0,
                    qualifier = %key.1,
                    "config change callback panicked"
                ),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instance handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A store bound to one `(server, qualifier)` record.
#[derive(Clone)]
pub struct InstanceConfig {
    store: Arc<ConfigStore>,
    server: String,
    qualifier: Qualifier,
}

impl InstanceConfig {
    pub fn new(
        store: Arc<ConfigStore>,
        server: impl Into<String>,
        qualifier: Qualifier,
    ) -> Result<Self, ConfigStoreError> {
        let server = server.into();
        naming::validate(&server, &qualifier)?;
        Ok(Self {
            store,
            server,
            qualifier,
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }

    pub fn path(&self) -> Result<PathBuf, ConfigStoreError> {
        self.store.path_for(&self.server, &self.qualifier)
    }

    pub fn load(&self) -> Result<ConfigMap, ConfigStoreError> {
        self.store.load(&self.server, &self.qualifier)
    }

    pub fn get(&self, key: &str, default: Value) -> Result<Value, ConfigStoreError> {
        self.store.get(&self.server, &self.qualifier, key, default)
    }

    pub fn set(&self, key: &str, value: Value) -> Result<ConfigMap, ConfigStoreError> {
        self.store.set(&self.server, &self.qualifier, key, value)
    }

    pub fn update(&self, values: ConfigMap) -> Result<ConfigMap, ConfigStoreError> {
        self.store.update(&self.server, &self.qualifier, values)
    }

    pub fn delete(&self, key: &str) -> Result<Option<Value>, ConfigStoreError> {
        self.store.delete(&self.server, &self.qualifier, key)
    }

    pub fn on_change<F>(&self, callback: F) -> Result<SubscriptionId, ConfigStoreError>
    where
        F: Fn(&ConfigMap, &ConfigMap) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.store.on_change(&self.server, &self.qualifier, callback)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File I/O
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn read_record(path: &Path) -> Result<ConfigMap, ConfigStoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigMap::new()),
        Err(source) => {
            return Err(ConfigStoreError::ReadFailure {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|source| ConfigStoreError::ParseFailure {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `record` next to `path` and rename it into place.
///
/// On any failure the temp file is removed and `path` is left untouched.
fn write_atomic(dir: &Path, path: &Path, record: &ConfigMap) -> Result<(), ConfigStoreError> {
    let fail = |source: std::io::Error| ConfigStoreError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(fail)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".config-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(fail)?;

    serde_json::to_writer_pretty(&mut tmp, record).map_err(|e| fail(e.into()))?;
    tmp.write_all(b"\n").map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}
