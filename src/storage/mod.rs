//! # Storage Module
//!
//! The storage layer turns a directory of page files into crash-atomic,
//! page-granular mutations.
//!
//! ## Architecture Overview
//!
//! ```text
//!   hash index engine
//!          │  with_page / with_page_mut / add_page / truncate_file
//!          ▼
//! +------------------------+     commit      +-----------+
//! | AtomicOperation        | --------------> | Wal       |  wal/wal.000001
//! | (staged page images)   |                 +-----------+
//! +------------------------+                       │ apply
//!          │ committed reads                       ▼
//!          ▼                               +---------------+
//! +------------------------+               | FileStore     |
//! | FileStore              | <------------ | MmapStorage×N |
//! +------------------------+               +---------------+
//! ```
//!
//! Readers that are not inside an operation read straight from the
//! `FileStore`; both views implement [`PageRead`], so the engine's lookup and
//! traversal code is written once against the trait.
//!
//! ## Page Size
//!
//! All files use 16KB pages. A file is a concatenation of pages and may be
//! empty.
//!
//! ## Module Organization
//!
//! - `mmap`: One memory-mapped page file (`MmapStorage`)
//! - `file_store`: Registry of page files keyed by `FileId` (`FileStore`)
//! - `wal`: Write-ahead log with commit frames and recovery (`Wal`)
//! - `atomic`: Staged page mutations and the component lock registry
//!   (`AtomicOperation`, `AtomicOperationsManager`)
//!
//! ## Thread Safety
//!
//! `FileStore`, `Wal` and `AtomicOperationsManager` are `Send + Sync`. An
//! `AtomicOperation` belongs to the thread that started it.

pub mod atomic;
pub mod file_store;
pub mod mmap;
pub mod wal;

pub use atomic::{
    diff_pages, AtomicOperation, AtomicOperationsManager, ComponentLock, PageDelta, RedoLog,
};
pub use file_store::{FileId, FileStore, PageKey, PageRead};
pub use mmap::MmapStorage;
pub use wal::{FrameKind, Wal, WalFrameHeader};
