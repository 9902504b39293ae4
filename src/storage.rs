//! Device-local key/value storage for the persisted session.
//!
//! Two backends share the `SessionStorage` contract:
//! - `MemoryStorage`: a process-local map. Clones share the map, so several
//!   `SessionStore`s holding clones behave like browser tabs on one origin.
//! - `FileStorage`: a JSON object on disk. Writes go through a temp file and a
//!   rename; `reload()` picks up writes made by other processes and reports them
//!   as change events.
//!
//! Every mutation emits a `StorageEvent` on a broadcast channel. Reads and writes
//! are synchronous.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

pub const KEY_TOKEN: &str = "token";
pub const KEY_USER: &str = "user";
pub const KEY_IMPERSONATION: &str = "token_impersonation";
pub const KEY_THEME: &str = "theme";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

pub type SharedStorage = Arc<dyn SessionStorage>;

#[derive(Clone)]
pub struct MemoryStorage {
    map: Arc<RwLock<BTreeMap<String, String>>>,
    events: broadcast::Sender<StorageEvent>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { map: Arc::new(RwLock::new(BTreeMap::new())), events }
    }
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn shared(&self) -> SharedStorage { Arc::new(self.clone()) }

    fn emit(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value { return; }
        let _ = self.events.send(StorageEvent { key: key.to_string(), old_value, new_value });
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let old = self.map.write().insert(key.to_string(), value.to_string());
        self.emit(key, old, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let old = self.map.write().remove(key);
        self.emit(key, old, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

pub struct FileStorage {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let cache = read_file(&path)?;
        debug!(target: "storage", path = %path.display(), keys = cache.len(), "storage.open");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self { path, cache: RwLock::new(cache), events })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Re-read the file and emit an event per key that changed since the last look.
    /// Returns the number of changed keys.
    pub fn reload(&self) -> AppResult<usize> {
        let fresh = read_file(&self.path)?;
        let changes = {
            let mut cache = self.cache.write();
            let changes = diff(&cache, &fresh);
            *cache = fresh;
            changes
        };
        for ev in changes.iter() {
            debug!(target: "storage", key = %ev.key, "storage.external_change");
            let _ = self.events.send(ev.clone());
        }
        Ok(changes.len())
    }

    /// Poll the file for external writes until the returned task is aborted.
    pub fn spawn_poller(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(e) = me.reload() {
                    warn!(target: "storage", "storage reload failed: {}", e);
                }
            }
        })
    }

    // Apply a one-key change on top of what is on disk now, so keys written by other
    // processes since the last look survive. Those external changes are reported too.
    fn mutate<F: FnOnce(&mut BTreeMap<String, String>)>(&self, key: &str, f: F) -> AppResult<()> {
        let changes = {
            let mut cache = self.cache.write();
            let mut next = read_file(&self.path)?;
            let before = next.get(key).cloned();
            f(&mut next);
            if next.get(key) != before.as_ref() {
                write_file(&self.path, &next)?;
            }
            let changes = diff(&cache, &next);
            *cache = next;
            changes
        };
        for ev in changes {
            let _ = self.events.send(ev);
        }
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.mutate(key, |m| { m.insert(key.to_string(), value.to_string()); })
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.mutate(key, |m| { m.remove(key); })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

fn read_file(path: &Path) -> AppResult<BTreeMap<String, String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() { return Ok(BTreeMap::new()); }
    serde_json::from_str(&text)
        .map_err(|e| AppError::storage("storage_corrupt".to_string(), format!("{}: {}", path.display(), e)))
}

fn write_file(path: &Path, map: &BTreeMap<String, String>) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() { std::fs::create_dir_all(dir)?; }
    }
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn diff(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Vec<StorageEvent> {
    let mut out = Vec::new();
    for (k, v) in new.iter() {
        if old.get(k) != Some(v) {
            out.push(StorageEvent { key: k.clone(), old_value: old.get(k).cloned(), new_value: Some(v.clone()) });
        }
    }
    for (k, v) in old.iter() {
        if !new.contains_key(k) {
            out.push(StorageEvent { key: k.clone(), old_value: Some(v.clone()), new_value: None });
        }
    }
    out
}
