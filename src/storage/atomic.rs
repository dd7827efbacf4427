//! # Atomic Operations
//!
//! Every mutation of an index runs inside an `AtomicOperation`. The operation
//! stages full page images privately; readers outside the operation keep
//! seeing the committed pages. `commit` makes every staged change durable and
//! visible together, `rollback` (or dropping the operation) discards them.
//!
//! ```text
//!  AtomicOperation                       FileStore (committed)
//! +-------------------------+           +--------------------+
//! | staged: PageKey -> page |  commit   | .him  .hit  .hib   |
//! | sizes:  FileId -> pages | --------> | (mmap files)       |
//! | component write guard   |           +--------------------+
//! +-------------------------+                    ^
//!          |  reads fall through for             |
//!          +-- pages not staged -----------------+
//! ```
//!
//! ## Commit Sequence
//!
//! 1. Each staged page is diffed against its committed image and the
//!    resulting `PageDelta`s go to the `RedoLog` hook, when one is installed.
//! 2. With the WAL enabled: Resize frames, Page frames and a Commit frame are
//!    appended, then the WAL is synced (when `sync_on_commit`). If any of it
//!    fails the WAL is rewound to where the operation started and the commit
//!    returns the error.
//! 3. File lengths and page images are applied to the mapped files.
//! 4. A checkpoint runs once the WAL outgrows the configured threshold. The
//!    operation is committed by then, so a failed checkpoint is only logged.
//!
//! ## Component Locks
//!
//! The manager keeps one `RwLock<()>` per component name. An atomic operation
//! holds the write side of its component's lock from start to end; readers of
//! that component take the read side. A component acquires this lock before
//! any lock of its own and releases it after them.
//!
//! ## Operation Ids
//!
//! Ids come from a monotonically increasing counter seeded at open. WAL
//! recovery groups frames by id, so ids never repeat within one WAL lifetime.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

use super::file_store::{FileId, FileStore, PageKey, PageRead};
use super::wal::Wal;
use crate::config::{StoreOptions, DELTA_MERGE_GAP, PAGE_SIZE, WAL_DIR_NAME};

/// A changed byte range of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDelta {
    pub offset: usize,
    pub old: Vec<u8>,
    pub new: Vec<u8>,
}

/// Receives the byte-level changes of every committed page.
///
/// Called once per delta, before the operation becomes durable. An error
/// aborts the commit and nothing is applied.
pub trait RedoLog: Send + Sync {
    fn on_page_change(&self, op_id: u64, key: PageKey, delta: &PageDelta) -> Result<()>;
}

/// Computes the changed ranges between two page images.
///
/// Runs separated by fewer than `DELTA_MERGE_GAP` unchanged bytes are merged.
pub fn diff_pages(old: &[u8], new: &[u8]) -> Vec<PageDelta> {
    let len = old.len().min(new.len());
    let mut deltas = Vec::new();
    let mut i = 0;

    while i < len {
        if old[i] == new[i] {
            i += 1;
            continue;
        }

        let start = i;
        let mut end = i + 1;
        let mut cursor = end;
        while cursor < len {
            if old[cursor] != new[cursor] {
                end = cursor + 1;
                cursor += 1;
            } else if cursor - end >= DELTA_MERGE_GAP {
                break;
            } else {
                cursor += 1;
            }
        }

        deltas.push(PageDelta {
            offset: start,
            old: old[start..end].to_vec(),
            new: new[start..end].to_vec(),
        });
        i = end;
    }

    deltas
}

/// Named lock shared by every operation on one component.
#[derive(Clone)]
pub struct ComponentLock {
    name: Arc<str>,
    lock: Arc<RwLock<()>>,
}

impl ComponentLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }
}

pub struct AtomicOperationsManager {
    store: FileStore,
    wal: Option<Wal>,
    options: StoreOptions,
    redo_log: Option<Arc<dyn RedoLog>>,
    components: Mutex<HashMap<String, ComponentLock>>,
    next_op_id: AtomicU64,
    commit_lock: Mutex<()>,
}

impl AtomicOperationsManager {
    /// Opens the store at `path`, replaying committed WAL operations first.
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let store = FileStore::open(path)?;

        let wal = if options.wal_enabled {
            let wal = Wal::open(&path.join(WAL_DIR_NAME))?;
            wal.recover(&store)
                .wrap_err_with(|| format!("WAL recovery failed for '{}'", path.display()))?;
            Some(wal)
        } else {
            None
        };

        info!(path = %path.display(), wal = options.wal_enabled, "opened atomic operations manager");

        Ok(Self {
            store,
            wal,
            options,
            redo_log: None,
            components: Mutex::new(HashMap::new()),
            next_op_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
        })
    }

    /// Installs a hook that receives the page deltas of every commit.
    pub fn with_redo_log(mut self, redo_log: Arc<dyn RedoLog>) -> Self {
        self.redo_log = Some(redo_log);
        self
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Returns the lock shared by every operation on `component`.
    pub fn component_lock(&self, component: &str) -> ComponentLock {
        self.components
            .lock()
            .entry(component.to_owned())
            .or_insert_with(|| ComponentLock {
                name: Arc::from(component),
                lock: Arc::new(RwLock::new(())),
            })
            .clone()
    }

    /// Starts an atomic operation holding the write side of `component`.
    pub fn start_atomic_operation<'a>(&'a self, component: &'a ComponentLock) -> AtomicOperation<'a> {
        let guard = component.lock.write();
        let id = self.next_op_id.fetch_add(1, Ordering::Relaxed);
        trace!(op_id = id, component = component.name(), "started atomic operation");

        AtomicOperation {
            manager: self,
            id,
            staged: HashMap::new(),
            sizes: HashMap::new(),
            _guard: guard,
        }
    }

    /// Blocks until no atomic operation of `component` is running.
    pub fn acquire_read_lock<'a>(&self, component: &'a ComponentLock) -> RwLockReadGuard<'a, ()> {
        component.read()
    }

    pub fn add_file(&self, name: &str) -> Result<FileId> {
        self.store.add_file(name)
    }

    pub fn open_file(&self, name: &str) -> Result<FileId> {
        self.store.open_file(name)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.store.file_exists(name)
    }

    /// Deletes a file after checkpointing, so no WAL frame refers to it.
    pub fn delete_file(&self, file_id: FileId) -> Result<()> {
        self.checkpoint()?;
        self.store.delete_file(file_id)
    }

    /// Syncs and unmaps a file after checkpointing.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        self.checkpoint()?;
        self.store.close_file(file_id)
    }

    /// Makes every committed page durable in the data files and empties the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let _commit = self.commit_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> Result<()> {
        self.store.sync_all()?;
        if let Some(wal) = &self.wal {
            let size = wal.current_offset();
            wal.truncate()?;
            if size > 0 {
                info!(wal_bytes = size, "checkpoint completed");
            }
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.checkpoint()
    }

    fn commit(&self, op: &AtomicOperation<'_>) -> Result<()> {
        if op.staged.is_empty() && op.sizes.is_empty() {
            trace!(op_id = op.id, "committed empty atomic operation");
            return Ok(());
        }

        let _commit = self.commit_lock.lock();

        let mut keys: Vec<PageKey> = op.staged.keys().copied().collect();
        keys.sort_unstable();

        let mut resized: Vec<(FileId, u32)> = op.sizes.iter().map(|(&f, &n)| (f, n)).collect();
        resized.sort_unstable();

        let mut final_sizes: HashMap<FileId, u32> = HashMap::new();
        for key in &keys {
            if !final_sizes.contains_key(&key.file_id) {
                final_sizes.insert(key.file_id, op.filled_up_to(key.file_id)?);
            }
        }
        let survives = |key: &PageKey| final_sizes.get(&key.file_id).is_some_and(|&n| key.page_no < n);

        if let Some(redo_log) = &self.redo_log {
            let zero = vec![0u8; PAGE_SIZE];
            for key in keys.iter().filter(|k| survives(k)) {
                let new = &op.staged[key];
                let committed = self.store.filled_up_to(key.file_id)? > key.page_no;
                let deltas = if committed {
                    self.store
                        .with_page(*key, |old| Ok(diff_pages(old, new)))?
                } else {
                    diff_pages(&zero, new)
                };
                for delta in &deltas {
                    redo_log.on_page_change(op.id, *key, delta)?;
                }
            }
        }

        if let Some(wal) = &self.wal {
            if wal.is_poisoned() {
                warn!(op_id = op.id, "WAL ends in a torn frame, checkpointing before commit");
                self.checkpoint_locked()?;
            }

            let start = wal.current_offset();
            let logged = (|| {
                for &(file_id, pages) in &resized {
                    wal.append_resize(op.id, file_id, pages)?;
                }
                for key in keys.iter().filter(|k| survives(k)) {
                    wal.append_page(op.id, *key, final_sizes[&key.file_id], &op.staged[key])?;
                }
                wal.append_commit(op.id)?;
                if self.options.sync_on_commit {
                    wal.sync()?;
                }
                Ok::<(), eyre::Report>(())
            })();

            if let Err(e) = logged {
                if let Err(rewind) = wal.rewind(start) {
                    warn!(op_id = op.id, error = %rewind, "failed to rewind WAL after a failed commit");
                }
                return Err(e.wrap_err(format!("failed to log atomic operation {}", op.id)));
            }
        }

        for &(file_id, pages) in &resized {
            self.store.set_page_count(file_id, pages)?;
        }
        for key in keys.iter().filter(|k| survives(k)) {
            self.store.write_page(*key, &op.staged[key])?;
        }

        if self.wal.is_none() && self.options.sync_on_commit {
            for file_id in final_sizes.keys().chain(op.sizes.keys()) {
                self.store.sync_file(*file_id)?;
            }
        }

        debug!(op_id = op.id, pages = keys.len(), files_resized = resized.len(), "committed atomic operation");

        if let Some(wal) = &self.wal {
            if wal.needs_checkpoint(self.options.checkpoint_threshold) {
                if let Err(e) = self.checkpoint_locked() {
                    warn!(op_id = op.id, error = %e, "checkpoint after commit failed, WAL kept");
                }
            }
        }

        Ok(())
    }
}

/// A unit of page mutations that becomes visible and durable at once.
pub struct AtomicOperation<'a> {
    manager: &'a AtomicOperationsManager,
    id: u64,
    staged: HashMap<PageKey, Box<[u8]>>,
    sizes: HashMap<FileId, u32>,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl AtomicOperation<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs `f` over a private, writable copy of the page.
    pub fn with_page_mut<R>(
        &mut self,
        key: PageKey,
        f: impl FnOnce(&mut [u8]) -> Result<R>,
    ) -> Result<R> {
        let filled = self.filled_up_to(key.file_id)?;
        ensure!(
            key.page_no < filled,
            "page {} is beyond the end of file {:#018x} ({} pages)",
            key.page_no,
            key.file_id.raw(),
            filled
        );

        let page = match self.staged.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut copy = vec![0u8; PAGE_SIZE].into_boxed_slice();
                self.manager.store.with_page(key, |page| {
                    copy.copy_from_slice(page);
                    Ok(())
                })?;
                entry.insert(copy)
            }
        };

        f(page)
    }

    /// Appends a zeroed page and returns its number.
    pub fn add_page(&mut self, file_id: FileId) -> Result<u32> {
        let page_no = self.filled_up_to(file_id)?;
        self.sizes.insert(file_id, page_no + 1);
        self.staged
            .insert(PageKey::new(file_id, page_no), vec![0u8; PAGE_SIZE].into_boxed_slice());
        Ok(page_no)
    }

    /// Drops every page of the file.
    pub fn truncate_file(&mut self, file_id: FileId) -> Result<()> {
        self.sizes.insert(file_id, 0);
        self.staged.retain(|key, _| key.file_id != file_id);
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.manager.commit(&self)
    }

    pub fn rollback(self) {
        trace!(op_id = self.id, pages = self.staged.len(), "rolled back atomic operation");
    }
}

impl PageRead for AtomicOperation<'_> {
    fn with_page<R>(&self, key: PageKey, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R> {
        if let Some(page) = self.staged.get(&key) {
            return f(page);
        }

        let filled = self.filled_up_to(key.file_id)?;
        ensure!(
            key.page_no < filled,
            "page {} is beyond the end of file {:#018x} ({} pages)",
            key.page_no,
            key.file_id.raw(),
            filled
        );
        self.manager.store.with_page(key, f)
    }

    fn filled_up_to(&self, file_id: FileId) -> Result<u32> {
        match self.sizes.get(&file_id) {
            Some(&pages) => Ok(pages),
            None => self.manager.store.page_count(file_id),
        }
    }
}
