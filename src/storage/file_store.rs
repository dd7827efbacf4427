//! # File Store
//!
//! The `FileStore` owns every page file under one store directory and hands
//! out pages by `PageKey` (file id + page number). It is the committed view of
//! the data: atomic operations read through it for pages they have not staged
//! and write their page images back through it at commit.
//!
//! ## Directory Structure
//!
//! ```text
//! store_dir/
//! ├── users.him       # hash index metadata
//! ├── users.hit       # hash index directory
//! ├── users.hib       # hash index buckets
//! ├── users.hnb       # hash index null bucket (optional)
//! └── wal/            # write-ahead log (separate component)
//!     └── wal.000001
//! ```
//!
//! ## File Ids
//!
//! A file id is the xxh3 hash of the file name. It is stable across restarts,
//! which lets WAL frames name their file without a separate catalog. Adding a
//! file whose id collides with a registered one is rejected.
//!
//! ## Thread Safety
//!
//! The registry sits behind a `parking_lot::RwLock`; each file sits behind its
//! own `RwLock<MmapStorage>`. Page readers take the file's read lock only for
//! the duration of the closure passed to `with_page`, so a page slice can never
//! outlive a concurrent resize.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::MmapStorage;
use crate::config::PAGE_SIZE;

/// Stable identifier of a page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u64);

impl FileId {
    pub fn for_name(name: &str) -> Self {
        FileId(xxh3_64(name.as_bytes()))
    }

    pub fn from_raw(raw: u64) -> Self {
        FileId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Address of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub file_id: FileId,
    pub page_no: u32,
}

impl PageKey {
    pub fn new(file_id: FileId, page_no: u32) -> Self {
        Self { file_id, page_no }
    }
}

/// Read access to pages, either committed or as seen by an atomic operation.
pub trait PageRead {
    /// Runs `f` over the page image at `key`.
    fn with_page<R>(&self, key: PageKey, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R>;

    /// Number of pages the file currently holds.
    fn filled_up_to(&self, file_id: FileId) -> Result<u32>;
}

struct FileEntry {
    name: String,
    storage: Arc<RwLock<MmapStorage>>,
}

pub struct FileStore {
    base_path: PathBuf,
    files: RwLock<HashMap<FileId, FileEntry>>,
}

impl FileStore {
    /// Opens the store directory, creating it when missing, and registers
    /// every page file found in it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        fs::create_dir_all(&base_path).wrap_err_with(|| {
            format!("failed to create store directory '{}'", base_path.display())
        })?;

        let mut files = HashMap::new();
        let listing = fs::read_dir(&base_path).wrap_err_with(|| {
            format!("failed to list store directory '{}'", base_path.display())
        })?;

        for dir_entry in listing {
            let dir_entry = dir_entry.wrap_err("failed to read store directory entry")?;
            let file_type = dir_entry
                .file_type()
                .wrap_err("failed to read store directory entry type")?;
            if !file_type.is_file() {
                continue;
            }

            let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if Self::validate_name(&name).is_err() {
                debug!(file = %name, "skipping foreign file in store directory");
                continue;
            }

            match MmapStorage::open(dir_entry.path()) {
                Ok(storage) => {
                    files.insert(
                        FileId::for_name(&name),
                        FileEntry {
                            name,
                            storage: Arc::new(RwLock::new(storage)),
                        },
                    );
                }
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable page file"),
            }
        }

        debug!(path = %base_path.display(), files = files.len(), "opened file store");

        Ok(Self {
            base_path,
            files: RwLock::new(files),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Creates an empty page file and registers it.
    pub fn add_file(&self, name: &str) -> Result<FileId> {
        Self::validate_name(name)?;

        let file_id = FileId::for_name(name);
        let mut files = self.files.write();

        if let Some(existing) = files.get(&file_id) {
            ensure!(
                existing.name != name,
                "file '{}' already exists",
                name
            );
            bail!(
                "file '{}' collides with registered file '{}' (id {:#018x})",
                name,
                existing.name,
                file_id.raw()
            );
        }

        let storage = MmapStorage::create(self.base_path.join(name), 0)?;
        files.insert(
            file_id,
            FileEntry {
                name: name.to_owned(),
                storage: Arc::new(RwLock::new(storage)),
            },
        );

        debug!(file = name, "added page file");
        Ok(file_id)
    }

    /// Returns the id of an existing file, mapping it when not yet registered.
    pub fn open_file(&self, name: &str) -> Result<FileId> {
        Self::validate_name(name)?;

        let file_id = FileId::for_name(name);
        if self.files.read().contains_key(&file_id) {
            return Ok(file_id);
        }

        let mut files = self.files.write();
        if !files.contains_key(&file_id) {
            let storage = MmapStorage::open(self.base_path.join(name))?;
            files.insert(
                file_id,
                FileEntry {
                    name: name.to_owned(),
                    storage: Arc::new(RwLock::new(storage)),
                },
            );
        }

        Ok(file_id)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(&FileId::for_name(name)) || self.base_path.join(name).is_file()
    }

    pub fn file_name(&self, file_id: FileId) -> Option<String> {
        self.files.read().get(&file_id).map(|e| e.name.clone())
    }

    pub fn is_registered(&self, file_id: FileId) -> bool {
        self.files.read().contains_key(&file_id)
    }

    /// Unregisters a file and removes it from disk.
    pub fn delete_file(&self, file_id: FileId) -> Result<()> {
        let entry = self.files.write().remove(&file_id);
        let Some(entry) = entry else {
            bail!("file id {:#018x} is not registered", file_id.raw());
        };

        let path = entry.storage.read().path().to_path_buf();
        drop(entry);

        fs::remove_file(&path)
            .wrap_err_with(|| format!("failed to remove page file '{}'", path.display()))?;

        debug!(file = %path.display(), "deleted page file");
        Ok(())
    }

    /// Syncs a file and unmaps it. It is mapped again by `open_file`.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        let entry = self.files.write().remove(&file_id);
        if let Some(entry) = entry {
            entry.storage.read().sync()?;
        }
        Ok(())
    }

    pub fn page_count(&self, file_id: FileId) -> Result<u32> {
        Ok(self.storage(file_id)?.read().page_count())
    }

    pub fn write_page(&self, key: PageKey, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == PAGE_SIZE,
            "page image must be {} bytes, got {}",
            PAGE_SIZE,
            data.len()
        );

        let storage = self.storage(key.file_id)?;
        let mut storage = storage.write();
        storage.page_mut(key.page_no)?.copy_from_slice(data);
        Ok(())
    }

    pub fn set_page_count(&self, file_id: FileId, page_count: u32) -> Result<()> {
        self.storage(file_id)?.write().set_page_count(page_count)
    }

    pub fn sync_file(&self, file_id: FileId) -> Result<()> {
        self.storage(file_id)?.read().sync()
    }

    pub fn sync_all(&self) -> Result<()> {
        let storages: Vec<_> = self
            .files
            .read()
            .values()
            .map(|e| Arc::clone(&e.storage))
            .collect();

        for storage in storages {
            storage.read().sync()?;
        }
        Ok(())
    }

    fn storage(&self, file_id: FileId) -> Result<Arc<RwLock<MmapStorage>>> {
        match self.files.read().get(&file_id) {
            Some(entry) => Ok(Arc::clone(&entry.storage)),
            None => bail!("file id {:#018x} is not registered", file_id.raw()),
        }
    }

    fn validate_name(name: &str) -> Result<()> {
        ensure!(!name.is_empty(), "file name cannot be empty");
        ensure!(
            !name.contains('/') && !name.contains('\\'),
            "file name cannot contain path separators"
        );
        ensure!(
            !name.contains(".."),
            "file name cannot contain parent directory references"
        );
        ensure!(
            name.chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.'),
            "file name can only contain alphanumeric characters, underscores, hyphens and dots"
        );
        Ok(())
    }
}

impl PageRead for FileStore {
    fn with_page<R>(&self, key: PageKey, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R> {
        let storage = self.storage(key.file_id)?;
        let storage = storage.read();
        f(storage.page(key.page_no)?)
    }

    fn filled_up_to(&self, file_id: FileId) -> Result<u32> {
        self.page_count(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn added_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let id = store.add_file("orders.hib").unwrap();

        assert_eq!(id, FileId::for_name("orders.hib"));
        assert_eq!(store.filled_up_to(id).unwrap(), 0);
        assert!(store.file_exists("orders.hib"));
    }

    #[test]
    fn add_file_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.add_file("orders.hib").unwrap();
        let err = store.add_file("orders.hib").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn add_file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.add_file("../escape.hib").is_err());
        assert!(store.add_file("a/b.hib").is_err());
        assert!(store.add_file("").is_err());
    }

    #[test]
    fn pages_survive_reopen() {
        let dir = tempdir().unwrap();

        let id = {
            let store = FileStore::open(dir.path()).unwrap();
            let id = store.add_file("orders.hit").unwrap();
            store.set_page_count(id, 2).unwrap();

            let mut page = vec![0u8; PAGE_SIZE];
            page[17] = 0x5A;
            store.write_page(PageKey::new(id, 1), &page).unwrap();
            store.sync_all().unwrap();
            id
        };

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.is_registered(id));
        assert_eq!(store.page_count(id).unwrap(), 2);

        let byte = store
            .with_page(PageKey::new(id, 1), |page| Ok(page[17]))
            .unwrap();
        assert_eq!(byte, 0x5A);
    }

    #[test]
    fn write_page_rejects_short_image() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store.add_file("a.hib").unwrap();
        store.set_page_count(id, 1).unwrap();

        assert!(store.write_page(PageKey::new(id, 0), &[0u8; 10]).is_err());
    }

    #[test]
    fn delete_file_removes_it_from_disk() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store.add_file("gone.him").unwrap();

        store.delete_file(id).unwrap();

        assert!(!store.file_exists("gone.him"));
        assert!(!dir.path().join("gone.him").exists());
        assert!(store.page_count(id).is_err());
    }

    #[test]
    fn closed_file_can_be_reopened() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store.add_file("c.hib").unwrap();
        store.set_page_count(id, 3).unwrap();

        store.close_file(id).unwrap();
        assert!(!store.is_registered(id));

        assert_eq!(store.open_file("c.hib").unwrap(), id);
        assert_eq!(store.page_count(id).unwrap(), 3);
    }

    #[test]
    fn open_file_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.open_file("nothing.hib").is_err());
    }
}
