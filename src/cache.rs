//! Change-computation cache
//!
//! Deduplicates concurrent "changes between two repository states"
//! computations: for a given key at most one computation runs, later
//! callers wait on its result, and completed results are kept in a
//! size-weighted cache with access-based expiry. Every hand-out is a deep
//! copy bound to the caller's own VCS root, so mutation by one caller can
//! never corrupt the cached value or another caller's copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::GitError;

// Rough per-string and per-commit-id memory estimates for the size weigher
const COMMIT_ID_SIZE_BYTES: u64 = 120;
const STRING_OVERHEAD_BYTES: u64 = 40;

/// One commit in a change list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub version: String,
    pub parent_versions: Vec<String>,
    pub description: String,
    pub author: String,
    /// VCS root the copy is bound to; rewritten per caller
    pub vcs_root_id: String,
    pub changes: Vec<FileChange>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub file: String,
    pub relative_file: String,
    pub before_revision: Option<String>,
    pub after_revision: Option<String>,
}

/// Opaque cache key; build one with [`ChangesCache::key`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

type SharedResult = Result<Arc<Vec<Modification>>, Arc<GitError>>;

struct CacheEntry {
    data: Arc<Vec<Modification>>,
    size_kb: u64,
    last_access: Instant,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    total_kb: u64,
    running: HashMap<String, watch::Receiver<Option<SharedResult>>>,
}

struct Shared {
    inner: Mutex<Inner>,
    max_weight_kb: u64,
    access_ttl: Duration,
}

/// The cache itself; clones share one store
#[derive(Clone)]
pub struct ChangesCache {
    shared: Arc<Shared>,
}

/// What a lookup found
pub enum Lookup {
    /// A cached result, already copied for this caller
    Completed(Vec<Modification>),
    /// Another caller is computing this key; await the waiter
    Running(Waiter),
    /// This caller must run the computation and complete the pending handle
    New(Pending),
}

impl ChangesCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    entries: HashMap::new(),
                    total_kb: 0,
                    running: HashMap::new(),
                }),
                max_weight_kb: config.max_size_mb * 1024,
                access_ttl: Duration::from_secs(config.access_ttl_secs),
            }),
        }
    }

    /// Deterministic key over the two state snapshots and the repo URL.
    ///
    /// Entries of the target state that did not change against the source
    /// state do not contribute, so unrelated branches cannot perturb the
    /// key. Independent of map iteration order.
    pub fn key(
        &self,
        from_state: &HashMap<String, String>,
        to_state: &HashMap<String, String>,
        repo_url: &str,
    ) -> CacheKey {
        let mut hasher = Sha256::new();

        let mut from: Vec<(&String, &String)> = from_state.iter().collect();
        from.sort();
        for (branch, revision) in from {
            hasher.update(branch.as_bytes());
            hasher.update(revision.as_bytes());
        }

        let mut to: Vec<(&String, &String)> = to_state
            .iter()
            .filter(|(branch, revision)| from_state.get(*branch) != Some(*revision))
            .collect();
        to.sort();
        for (branch, revision) in to {
            hasher.update(branch.as_bytes());
            hasher.update(revision.as_bytes());
        }

        CacheKey(format!("{repo_url}{:x}", hasher.finalize()))
    }

    /// Returns the cached result, a waiter on the in-flight computation,
    /// or a pending handle making this caller the one that computes.
    pub fn lookup(&self, key: &CacheKey, vcs_root_id: &str) -> Lookup {
        let mut inner = self.shared.inner.lock().expect("changes cache lock poisoned");

        self.purge_expired(&mut inner);

        if let Some(entry) = inner.entries.get_mut(&key.0) {
            entry.last_access = Instant::now();
            let copy = copy_for_root(&entry.data, vcs_root_id);
            return Lookup::Completed(copy);
        }

        if let Some(rx) = inner.running.get(&key.0) {
            return Lookup::Running(Waiter {
                rx: rx.clone(),
                vcs_root_id: vcs_root_id.to_string(),
            });
        }

        let (tx, rx) = watch::channel(None);
        inner.running.insert(key.0.clone(), rx);
        Lookup::New(Pending {
            cache: self.clone(),
            key: key.0.clone(),
            tx,
            completed: false,
        })
    }

    fn purge_expired(&self, inner: &mut Inner) {
        let ttl = self.shared.access_ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.last_access.elapsed() > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_kb -= entry.size_kb;
            }
        }
    }

    fn store(&self, key: &str, data: Arc<Vec<Modification>>) {
        let size_kb = size_kb(&data);
        let mut inner = self.shared.inner.lock().expect("changes cache lock poisoned");
        inner.total_kb += size_kb;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                size_kb,
                last_access: Instant::now(),
            },
        );

        // size-weighted LRU: drop least-recently-accessed entries until the
        // weight fits again
        while inner.total_kb > self.shared.max_weight_kb && inner.entries.len() > 1 {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else { break };
            if oldest == key {
                break;
            }
            if let Some(entry) = inner.entries.remove(&oldest) {
                debug!(size_kb = entry.size_kb, "evicting change list from cache");
                inner.total_kb -= entry.size_kb;
            }
        }
    }

    fn remove_running(&self, key: &str) {
        let mut inner = self.shared.inner.lock().expect("changes cache lock poisoned");
        inner.running.remove(key);
    }

    #[cfg(test)]
    fn cached_weight_kb(&self) -> u64 {
        self.shared.inner.lock().unwrap().total_kb
    }
}

/// Handle held by the caller that runs the computation
pub struct Pending {
    cache: ChangesCache,
    key: String,
    tx: watch::Sender<Option<SharedResult>>,
    completed: bool,
}

impl Pending {
    /// Publishes a successful result: stores it in the cache and wakes all
    /// waiters. Returns this caller's own copy.
    pub fn complete(mut self, result: Vec<Modification>, vcs_root_id: &str) -> Vec<Modification> {
        let data = Arc::new(result);
        self.cache.store(&self.key, Arc::clone(&data));
        self.cache.remove_running(&self.key);
        let _ = self.tx.send(Some(Ok(Arc::clone(&data))));
        self.completed = true;
        copy_for_root(&data, vcs_root_id)
    }

    /// Propagates a failed computation to all waiters without caching it;
    /// a later caller for the same key computes afresh
    pub fn complete_err(mut self, err: GitError) {
        self.cache.remove_running(&self.key);
        let _ = self.tx.send(Some(Err(Arc::new(err))));
        self.completed = true;
    }
}

impl Drop for Pending {
    // An abandoned computation must not leave waiters hanging: dropping
    // the sender wakes them with an "abandoned" error
    fn drop(&mut self) {
        if !self.completed {
            self.cache.remove_running(&self.key);
        }
    }
}

/// Handle held by callers waiting on someone else's computation
pub struct Waiter {
    rx: watch::Receiver<Option<SharedResult>>,
    vcs_root_id: String,
}

impl Waiter {
    /// Waits for the in-flight computation, bounded by `timeout`.
    ///
    /// Timing out abandons only this caller's wait; the computation keeps
    /// running for the others.
    pub async fn wait(mut self, timeout: Duration) -> Result<Vec<Modification>, GitError> {
        let deadline = tokio::time::timeout(timeout, async {
            loop {
                let current = self.rx.borrow_and_update().clone();
                if let Some(result) = current {
                    return Ok(result);
                }
                if self.rx.changed().await.is_err() {
                    return Err(GitError::ChangeComputation(
                        "the computing caller abandoned the operation".into(),
                    ));
                }
            }
        })
        .await;

        match deadline {
            Err(_) => Err(GitError::CacheWaitTimeout(timeout)),
            Ok(Err(err)) => Err(err),
            Ok(Ok(Ok(data))) => Ok(copy_for_root(&data, &self.vcs_root_id)),
            Ok(Ok(Err(err))) => Err(GitError::ChangeComputation(err.to_string())),
        }
    }
}

// Deep copy bound to the caller's VCS root; `String` clones guarantee the
// copies share no mutable state.
fn copy_for_root(data: &[Modification], vcs_root_id: &str) -> Vec<Modification> {
    data.iter()
        .map(|md| Modification {
            vcs_root_id: vcs_root_id.to_string(),
            ..md.clone()
        })
        .collect()
}

fn size_kb(data: &[Modification]) -> u64 {
    let mut size: u64 = 0;
    for md in data {
        // parents + version + display version
        size += (md.parent_versions.len() as u64 + 2) * COMMIT_ID_SIZE_BYTES;
        size += string_size(&md.description) + string_size(&md.author);
        for (key, value) in &md.attributes {
            size += string_size(key) + string_size(value);
        }
        for change in &md.changes {
            size += change
                .before_revision
                .as_deref()
                .map(string_size)
                .unwrap_or(0);
            size += change
                .after_revision
                .as_deref()
                .map(string_size)
                .unwrap_or(0);
            size += string_size(&change.file) + string_size(&change.relative_file);
        }
    }
    size / 1024 + 1
}

fn string_size(s: &str) -> u64 {
    s.len() as u64 * 2 + STRING_OVERHEAD_BYTES
}
