//! # Runtime Options
//!
//! Two option sets configure turhash at runtime:
//!
//! - [`StoreOptions`] govern the shared store behind an
//!   `AtomicOperationsManager`: WAL usage, fsync policy and checkpointing.
//! - [`IndexOptions`] govern one hash index: the serialized key bound and
//!   whether the null key is accepted.
//!
//! Both follow the same chained-setter style:
//!
//! ```ignore
//! let store = StoreOptions::default().sync_on_commit(false);
//! let index = IndexOptions::default().null_keys(true).max_key_size(512);
//! ```
//!
//! ## Store Options
//!
//! | Option               | Default | Description                                   |
//! |----------------------|---------|-----------------------------------------------|
//! | wal_enabled          | true    | Log committed pages before applying them      |
//! | sync_on_commit       | true    | fsync the WAL (or the files) on every commit  |
//! | checkpoint_threshold | 64 MB   | WAL size that triggers a checkpoint           |
//!
//! ## Index Options
//!
//! | Option       | Default | Description                                       |
//! |--------------|---------|---------------------------------------------------|
//! | max_key_size | 10 KB   | Bound on the serialized (raw) key in bytes        |
//! | null_keys    | false   | Keep a side table for the absent key              |

use super::constants::{DEFAULT_CHECKPOINT_THRESHOLD, DEFAULT_MAX_KEY_SIZE};

/// Options of the shared page store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub(crate) wal_enabled: bool,
    pub(crate) sync_on_commit: bool,
    pub(crate) checkpoint_threshold: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            wal_enabled: true,
            sync_on_commit: true,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
        }
    }
}

impl StoreOptions {
    /// Enables or disables the write-ahead log.
    ///
    /// Without a WAL, commits are applied straight to the data files and a
    /// crash in the middle of a commit can leave a partially applied
    /// operation behind.
    pub fn wal_enabled(mut self, enabled: bool) -> Self {
        self.wal_enabled = enabled;
        self
    }

    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets the WAL size in bytes after which a commit triggers a checkpoint.
    pub fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }

    pub fn is_wal_enabled(&self) -> bool {
        self.wal_enabled
    }

    pub fn is_sync_on_commit(&self) -> bool {
        self.sync_on_commit
    }

    pub fn get_checkpoint_threshold(&self) -> u64 {
        self.checkpoint_threshold
    }
}

/// Options of one hash index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub(crate) max_key_size: usize,
    pub(crate) null_keys: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            null_keys: false,
        }
    }
}

impl IndexOptions {
    /// Sets the bound on the serialized key size in bytes.
    ///
    /// Encrypted keys are measured after encryption, including the 4-byte
    /// length prefix.
    pub fn max_key_size(mut self, bytes: usize) -> Self {
        self.max_key_size = bytes;
        self
    }

    /// Accepts or rejects the null key.
    pub fn null_keys(mut self, enabled: bool) -> Self {
        self.null_keys = enabled;
        self
    }

    pub fn get_max_key_size(&self) -> usize {
        self.max_key_size
    }

    pub fn supports_null_keys(&self) -> bool {
        self.null_keys
    }
}
