//! # turhash - On-Disk Extendible Hash Index
//!
//! turhash stores key/value pairs in an extendible hash index spread over a
//! handful of memory-mapped page files. It offers:
//!
//! - **Point operations**: get, put, remove and read-modify-write updates
//! - **Ordered traversal**: entries come back in `(hash, key)` order, bucket
//!   by bucket, in both directions
//! - **Crash atomicity**: every mutation, including the splits and merges it
//!   triggers, commits through a write-ahead log as one unit
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use turhash::{AtomicOperationsManager, HashTable, StoreOptions, StringCodec, U64Codec};
//!
//! let manager = Arc::new(AtomicOperationsManager::open("./data", StoreOptions::default())?);
//! let table = HashTable::builder("users", U64Codec, StringCodec).create(&manager)?;
//!
//! table.put(&42, &"Alice".to_string())?;
//! assert_eq!(table.get(&42)?.as_deref(), Some("Alice"));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │    HashTable / Builder / Cursor      │
//! ├─────────────────────────────────────┤
//! │  Directory trie │ Bucket pages       │
//! │  split / merge  │ null bucket, meta  │
//! ├─────────────────────────────────────┤
//! │  AtomicOperation (staged pages)      │
//! ├─────────────────────────────────────┤
//! │  FileStore (mmap) + WAL              │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! store_dir/
//! ├── users.him        # metadata
//! ├── users.hit        # directory
//! ├── users.hib        # buckets
//! ├── users.hnb        # null key (optional)
//! └── wal/
//!     └── wal.000001   # write-ahead log
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Page files, WAL and atomic operations
//! - [`hashindex`]: Directory, buckets, splits and the `HashTable` API
//! - [`codec`]: Key and value serialization, key encryption hook
//! - [`hash`]: Hash functions
//! - [`config`]: Format constants and runtime options
//! - [`error`]: Typed index errors

#[macro_use]
mod macros;

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod hashindex;
pub mod storage;

pub use codec::{BytesCodec, CaseFoldStringCodec, Codec, Encryption, I64Codec, StringCodec, U64Codec};
pub use config::{IndexOptions, StoreOptions};
pub use error::HashIndexError;
pub use hash::{HashFunction, IdentityHash, Xxh3Hash};
pub use hashindex::{Cursor, Entry, HashTable, HashTableBuilder, UpdateAction, Validated};
pub use storage::{AtomicOperationsManager, PageDelta, RedoLog};
