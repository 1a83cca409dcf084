//! Content-addressed store for file copies downloaded from plugin file
//! systems, so viewers and repeated operations can reuse them without
//! re-downloading.
//!
//! A cached file stays on disk as long as any consumer holds a lock on its
//! entry. Producers coordinate through `reserve`: at most one concurrent
//! build per fingerprint.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Externally owned lock handle, standing in for a manual-reset event. The
/// cache associates it with incremented locks; `DiskCache::unlock` signals
/// it and releases every associated lock.
#[derive(Clone)]
pub struct CacheLock {
    shared: Arc<LockShared>,
}

struct LockShared {
    notify: Notify,
    signalled: AtomicBool,
}

impl CacheLock {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LockShared {
                notify: Notify::new(),
                signalled: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.shared.signalled.load(Ordering::Acquire)
    }

    /// Wait until the cache signals this handle.
    pub async fn wait(&self) {
        while !self.is_signalled() {
            let notified = self.shared.notify.notified();
            if self.is_signalled() {
                break;
            }
            notified.await;
        }
    }

    fn signal(&self) {
        self.shared.signalled.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    fn same_handle(&self, other: &CacheLock) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Default for CacheLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLock")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Reserved by a producer, no file yet.
    Fresh,
    /// Superseded; invisible to lookups, reaped once unlocked.
    OutOfDate,
    /// On disk and servable.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Caller may build and publish.
    Reserved,
    /// Another producer is building this fingerprint.
    Busy,
    /// A servable entry already exists.
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub published: bool,
    /// The producer must delete its file itself when this is set.
    pub already_existed: bool,
}

struct Entry {
    fingerprint: String,
    file_path: PathBuf,
    size: u64,
    state: EntryState,
    locks: Vec<CacheLock>,
    pending_deletion: bool,
    seq: u64,
}

struct Inner {
    entries: Vec<Entry>,
    seq: u64,
}

/// Content-addressed disk cache. All operations are serialized by a single
/// mutex; lock handles let consumers wait without holding it.
pub struct DiskCache {
    inner: Mutex<Inner>,
    workspace: PathBuf,
    ceiling_bytes: u64,
}

impl DiskCache {
    pub fn new(workspace: PathBuf, ceiling_bytes: u64) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&workspace).map_err(CacheError::Workspace)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                seq: 0,
            }),
            workspace,
            ceiling_bytes,
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Claim a fingerprint for building. Fingerprints are opaque and
    /// case-sensitive.
    pub fn reserve(&self, fingerprint: &str) -> ReserveOutcome {
        let mut inner = self.inner.lock();
        for e in &inner.entries {
            if e.fingerprint != fingerprint {
                continue;
            }
            match e.state {
                EntryState::Fresh => return ReserveOutcome::Busy,
                EntryState::Ready if !e.pending_deletion => return ReserveOutcome::Exists,
                _ => {}
            }
        }
        let seq = inner.next_seq();
        inner.entries.push(Entry {
            fingerprint: fingerprint.to_string(),
            file_path: PathBuf::new(),
            size: 0,
            state: EntryState::Fresh,
            locks: Vec::new(),
            pending_deletion: false,
            seq,
        });
        ReserveOutcome::Reserved
    }

    /// Drop a reservation whose build failed.
    pub fn abandon(&self, fingerprint: &str) {
        let mut inner = self.inner.lock();
        inner
            .entries
            .retain(|e| !(e.fingerprint == fingerprint && e.state == EntryState::Fresh));
    }

    /// Serve a cached copy, incrementing the lock count under `lock`.
    pub fn lookup(&self, fingerprint: &str, lock: &CacheLock) -> Option<PathBuf> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.iter_mut().find(|e| {
            e.fingerprint == fingerprint
                && e.state == EntryState::Ready
                && !e.pending_deletion
        })?;
        entry.locks.push(lock.clone());
        Some(entry.file_path.clone())
    }

    /// Adopt a producer's file by rename; it must already be on the cache
    /// volume, and the producer must not retain the path afterwards.
    pub fn publish(
        &self,
        fingerprint: &str,
        producer_file: &Path,
        size_bytes: u64,
    ) -> Result<PublishOutcome, CacheError> {
        let mut inner = self.inner.lock();

        if inner.entries.iter().any(|e| {
            e.fingerprint == fingerprint && e.state == EntryState::Ready && !e.pending_deletion
        }) {
            return Ok(PublishOutcome {
                published: false,
                already_existed: true,
            });
        }

        let seq = inner.next_seq();
        let dest = self.workspace.join(format!("{seq:016x}.dat"));
        std::fs::rename(producer_file, &dest).map_err(|e| CacheError::Adopt {
            path: producer_file.to_path_buf(),
            source: e,
        })?;

        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.fingerprint == fingerprint && e.state == EntryState::Fresh)
        {
            entry.file_path = dest;
            entry.size = size_bytes;
            entry.state = EntryState::Ready;
            entry.seq = seq;
        } else {
            inner.entries.push(Entry {
                fingerprint: fingerprint.to_string(),
                file_path: dest,
                size: size_bytes,
                state: EntryState::Ready,
                locks: Vec::new(),
                pending_deletion: false,
                seq,
            });
        }

        self.sweep(&mut inner);
        Ok(PublishOutcome {
            published: true,
            already_existed: false,
        })
    }

    /// Signal the handle and release every lock taken under it, then reap.
    pub fn unlock(&self, lock: &CacheLock) {
        lock.signal();
        let mut inner = self.inner.lock();
        for e in &mut inner.entries {
            e.locks.retain(|l| !l.same_handle(lock));
        }
        self.sweep(&mut inner);
    }

    /// Mark matching entries out of date; live consumers finish normally.
    pub fn mark_out_of_date(&self, fingerprint: &str) {
        let mut inner = self.inner.lock();
        for e in &mut inner.entries {
            if e.fingerprint == fingerprint {
                e.state = EntryState::OutOfDate;
            }
        }
        self.sweep(&mut inner);
    }

    /// Bulk out-of-date for every fingerprint starting with `prefix`; used
    /// when a plugin file system closes.
    pub fn mark_root_out_of_date(&self, prefix: &str) {
        let mut inner = self.inner.lock();
        for e in &mut inner.entries {
            if e.fingerprint.starts_with(prefix) {
                e.state = EntryState::OutOfDate;
            }
        }
        self.sweep(&mut inner);
    }

    /// Crash recovery at first-instance startup: remove workspace files not
    /// referenced by any entry.
    pub fn purge_orphan_workspace(&self) -> Result<usize, CacheError> {
        let inner = self.inner.lock();
        let mut removed = 0usize;
        for dirent in std::fs::read_dir(&self.workspace).map_err(CacheError::Workspace)? {
            let Ok(dirent) = dirent else { continue };
            let path = dirent.path();
            if !path.is_file() {
                continue;
            }
            if inner.entries.iter().any(|e| e.file_path == path) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "orphan not removable"),
            }
        }
        debug!(removed, "cache workspace scrubbed");
        Ok(removed)
    }

    /// Number of live entries (all states), for diagnostics and tests.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Total bytes held by servable entries.
    pub fn ready_bytes(&self) -> u64 {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Ready)
            .map(|e| e.size)
            .sum()
    }

    /// Reap entries that are unlocked and either out of date or above the
    /// byte ceiling, oldest-unlocked first.
    fn sweep(&self, inner: &mut Inner) {
        let mut doomed: Vec<PathBuf> = Vec::new();
        inner.entries.retain(|e| {
            let dead = e.locks.is_empty()
                && (e.state == EntryState::OutOfDate || e.pending_deletion);
            if dead && !e.file_path.as_os_str().is_empty() {
                doomed.push(e.file_path.clone());
            }
            !dead
        });

        if self.ceiling_bytes > 0 {
            loop {
                let total: u64 = inner
                    .entries
                    .iter()
                    .filter(|e| e.state == EntryState::Ready)
                    .map(|e| e.size)
                    .sum();
                if total <= self.ceiling_bytes {
                    break;
                }
                let victim = inner
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.state == EntryState::Ready && e.locks.is_empty())
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(i, _)| i);
                match victim {
                    Some(i) => {
                        let e = inner.entries.remove(i);
                        doomed.push(e.file_path);
                    }
                    None => break,
                }
            }
        }

        for path in doomed {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "cached file not removable");
            }
        }
    }
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}
