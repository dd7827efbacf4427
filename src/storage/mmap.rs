//! # Memory-Mapped Page File
//!
//! `MmapStorage` maps one index file into the address space and hands out
//! page-sized slices of it. Every index file (metadata, directory, buckets,
//! null bucket) is one `MmapStorage` registered in the `FileStore`.
//!
//! ## Borrowing Instead of Guards
//!
//! Remapping invalidates every slice handed out before. Rather than tracking
//! readers at runtime, resizing takes `&mut self`:
//!
//! ```text
//! page(&self) -> &[u8]               // shared borrow
//! page_mut(&mut self) -> &mut [u8]   // exclusive borrow
//! set_page_count(&mut self, n)       // exclusive borrow, may remap
//! ```
//!
//! so the compiler rules out a live page slice across a remap.
//!
//! ## Empty Files
//!
//! Index files start out empty: a freshly added file has no pages until the
//! first committed operation appends one, and the null-key file is truncated
//! back to zero pages when the null entry goes away with `clear`. A zero-length
//! file cannot be mapped, so the map is absent while the file is empty.
//!
//! ## File Format
//!
//! A file is a plain concatenation of `PAGE_SIZE` pages; the length is always a
//! multiple of `PAGE_SIZE`.
//!
//! ```text
//! Offset 0:        Page 0 (16KB)
//! Offset 16384:    Page 1 (16KB)
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::config::PAGE_SIZE;

#[derive(Debug)]
pub struct MmapStorage {
    path: PathBuf,
    file: File,
    mmap: Option<MmapMut>,
    page_count: u32,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "index file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let page_count = (file_size / PAGE_SIZE as u64) as u32;
        let mmap = Self::map(&file, path, page_count)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            page_count,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, initial_page_count: u32) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create index file '{}'", path.display()))?;

        let file_size = initial_page_count as u64 * PAGE_SIZE as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        let mmap = Self::map(&file, path, initial_page_count)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            page_count: initial_page_count,
        })
    }

    fn map(file: &File, path: &Path, page_count: u32) -> Result<Option<MmapMut>> {
        if page_count == 0 {
            return Ok(None);
        }

        // SAFETY: MmapMut::map_mut is unsafe because the mapped file can be
        // modified externally. This is safe because:
        // 1. Index files are owned by one FileStore and not shared with other processes
        // 2. The file length is a non-zero multiple of PAGE_SIZE at this point
        // 3. The mmap lifetime is tied to MmapStorage, preventing use-after-unmap
        // 4. All access goes through page()/page_mut() which bounds-check page_no
        let mmap = unsafe {
            MmapMut::map_mut(file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Some(mmap))
    }

    pub fn page(&self, page_no: u32) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds in '{}' (page_count={})",
            page_no,
            self.path.display(),
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        match &self.mmap {
            Some(mmap) => Ok(&mmap[offset..offset + PAGE_SIZE]),
            None => eyre::bail!("file '{}' is not mapped", self.path.display()),
        }
    }

    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds in '{}' (page_count={})",
            page_no,
            self.path.display(),
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        match &mut self.mmap {
            Some(mmap) => Ok(&mut mmap[offset..offset + PAGE_SIZE]),
            None => eyre::bail!("file '{}' is not mapped", self.path.display()),
        }
    }

    /// Grows or truncates the file to exactly `new_page_count` pages.
    ///
    /// Pages gained by growing read as zeroes.
    pub fn set_page_count(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count == self.page_count {
            return Ok(());
        }

        if let Some(mmap) = &self.mmap {
            mmap.flush()
                .wrap_err("failed to flush mmap before resize")?;
        }

        // The old map must be gone before the file shrinks underneath it.
        self.mmap = None;

        let new_size = new_page_count as u64 * PAGE_SIZE as u64;

        self.file.set_len(new_size).wrap_err_with(|| {
            format!(
                "failed to resize '{}' to {} bytes",
                self.path.display(),
                new_size
            )
        })?;

        self.mmap = Self::map(&self.file, &self.path, new_page_count)?;
        self.page_count = new_page_count;

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()
                .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))?;
        }
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to fsync '{}'", self.path.display()))
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn file_size(&self) -> u64 {
        self.page_count as u64 * PAGE_SIZE as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hib");

        let storage = MmapStorage::create(&path, 10).unwrap();

        assert_eq!(storage.page_count(), 10);
        assert_eq!(storage.file_size(), 10 * PAGE_SIZE as u64);
    }

    #[test]
    fn create_empty_file_has_no_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hnb");

        let storage = MmapStorage::create(&path, 0).unwrap();

        assert_eq!(storage.page_count(), 0);
        assert!(storage.page(0).is_err());
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.him");

        MmapStorage::create(&path, 1).unwrap();
        assert!(MmapStorage::create(&path, 1).is_err());
    }

    #[test]
    fn open_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hit");

        {
            let mut storage = MmapStorage::create(&path, 5).unwrap();
            let page = storage.page_mut(0).unwrap();
            page[0] = 0xAB;
            storage.sync().unwrap();
        }

        let storage = MmapStorage::open(&path).unwrap();

        assert_eq!(storage.page_count(), 5);
        assert_eq!(storage.page(0).unwrap()[0], 0xAB);
    }

    #[test]
    fn open_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hnb");
        MmapStorage::create(&path, 0).unwrap();

        let storage = MmapStorage::open(&path).unwrap();
        assert_eq!(storage.page_count(), 0);
    }

    #[test]
    fn open_fails_for_nonexistent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.hib");

        assert!(MmapStorage::open(&path).is_err());
    }

    #[test]
    fn open_rejects_partial_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.hib");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 7]).unwrap();

        let err = MmapStorage::open(&path).unwrap_err();
        assert!(err.to_string().contains("not a multiple of page size"));
    }

    #[test]
    fn page_out_of_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hib");

        let storage = MmapStorage::create(&path, 5).unwrap();

        assert!(storage.page(4).is_ok());
        assert!(storage.page(5).is_err());
        assert!(storage.page(100).is_err());
    }

    #[test]
    fn grow_from_empty_preserves_nothing_and_zero_fills() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hnb");

        let mut storage = MmapStorage::create(&path, 0).unwrap();
        storage.set_page_count(2).unwrap();

        assert_eq!(storage.page_count(), 2);
        assert!(storage.page(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn grow_preserves_existing_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hib");

        let mut storage = MmapStorage::create(&path, 3).unwrap();

        {
            let page = storage.page_mut(2).unwrap();
            page[0] = 0xCA;
            page[1] = 0xFE;
        }

        storage.set_page_count(10).unwrap();

        let page = storage.page(2).unwrap();
        assert_eq!(page[0], 0xCA);
        assert_eq!(page[1], 0xFE);
        assert!(storage.page(9).is_ok());
    }

    #[test]
    fn truncate_drops_tail_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.hib");

        let mut storage = MmapStorage::create(&path, 4).unwrap();
        storage.page_mut(0).unwrap()[9] = 0x42;

        storage.set_page_count(1).unwrap();
        assert_eq!(storage.page_count(), 1);
        assert_eq!(storage.page(0).unwrap()[9], 0x42);
        assert!(storage.page(1).is_err());

        storage.set_page_count(0).unwrap();
        assert_eq!(storage.file_size(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn sync_persists_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.him");

        {
            let mut storage = MmapStorage::create(&path, 2).unwrap();
            let page = storage.page_mut(0).unwrap();
            page[50] = 0xBE;
            page[51] = 0xEF;
            storage.sync().unwrap();
        }

        let storage = MmapStorage::open(&path).unwrap();
        let page = storage.page(0).unwrap();

        assert_eq!(page[50], 0xBE);
        assert_eq!(page[51], 0xEF);
    }
}
