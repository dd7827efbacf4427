//! # Hash Index
//!
//! An extendible hash index whose directory is a trie of 256-slot nodes.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 hash = 0x9C3F....
//!                 top 8 bits: 0x9C
//!                        │
//!   root node (local depth 8, global 8)
//!   ┌────┬────┬─────┬────────┬─────┬────┐
//!   │ B0 │ B1 │ ... │ N4/64  │ ... │B255│
//!   └────┴────┴─────┴───┬────┴─────┴────┘
//!                       │ next 6 bits select a slot
//!                       ▼          in the hash map at offset 64
//!   node 4 (local depth 6, global 14)
//!   ┌──────────────┬──────────────┬─────┐
//!   │ map @0 (64)  │ map @64 (64) │ ... │
//!   └──────────────┴──────┬───────┴─────┘
//!                         ▼
//!                   bucket page (depth <= 14)
//! ```
//!
//! Each slot holds a [`DirectoryPointer`]: empty, a bucket page, or a child
//! node together with the offset of the hash map it enters. A bucket of depth
//! `d` is referenced by every slot whose path spells its `d`-bit prefix.
//!
//! ## Module Organization
//!
//! - `pointer`: Slot encoding (`DirectoryPointer`)
//! - `directory`: Node storage in the `.hit` file (`Directory`)
//! - `bucket`: Sorted bucket pages (`BucketPage`, `BucketPageMut`)
//! - `null_bucket`: Side page for the null key
//! - `metadata`: Identity header, record count and bucket free list
//! - `entry`: Key/value encoding, optional key encryption (`EntryCodec`)
//! - `path`: Root-to-bucket frame stack (`BucketPath`)
//! - `traverse`: Lookup and ordered neighbour search
//! - `split`: Bucket and node splits, buddy and node merges
//! - `table`: The public `HashTable`
//! - `builder`: `HashTableBuilder`
//! - `cursor`: Ordered iteration

pub mod bucket;
pub mod builder;
pub mod cursor;
pub mod directory;
pub mod entry;
pub mod metadata;
pub mod null_bucket;
pub mod path;
pub mod pointer;
pub mod split;
pub mod table;
pub mod traverse;

pub use builder::HashTableBuilder;
pub use cursor::{Cursor, Direction};
pub use entry::Entry;
pub use pointer::DirectoryPointer;
pub use table::{HashTable, UpdateAction, Validated};
