//! # turhash Configuration Constants
//!
//! This module centralizes the numeric constants of the on-disk format and
//! the engine. Values that depend on each other are co-located and their
//! relationships are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (16384 bytes)
//!       │
//!       ├─> BUCKET_HEADER_SIZE (529 bytes, fixed)
//!       │     │
//!       │     └─> BUCKET_CAPACITY (derived: PAGE_SIZE - BUCKET_HEADER_SIZE)
//!       │           │
//!       │           ├─> MAX_ENTRY_SIZE (one entry plus its offset slot must
//!       │           │     fit into an empty bucket)
//!       │           │
//!       │           ├─> DEFAULT_MAX_KEY_SIZE (must be < MAX_ENTRY_SIZE)
//!       │           │
//!       │           └─> MERGE_THRESHOLD (20% of the capacity)
//!       │
//!       ├─> DIRECTORY_NODE_SIZE (2051 bytes: 3 depth bytes + 256 slots)
//!       │     │
//!       │     ├─> NODES_PER_FIRST_PAGE (page 0 also carries the 8-byte header)
//!       │     └─> NODES_PER_PAGE
//!       │
//!       └─> WAL_FRAME_HEADER_SIZE (40 bytes per frame)
//!             Page frames = header + full page image
//!
//! MAX_LEVEL_DEPTH (8)
//!       │
//!       ├─> MAX_LEVEL_SIZE (256 slots per directory node)
//!       ├─> LEVEL_MASK (0xFF)
//!       └─> ROOT_BUCKET_COUNT (256 buckets at depth 8 after initialization)
//!
//! HASH_CODE_BITS (64)
//!       │
//!       └─> MAX_SPLIT_ATTEMPTS (a put splits at most once per hash bit)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `MAX_LEVEL_SIZE == 1 << MAX_LEVEL_DEPTH`
//! 2. `BUCKET_HEADER_SIZE == 529` (changing it breaks existing files)
//! 3. `DEFAULT_MAX_KEY_SIZE < MAX_ENTRY_SIZE`
//! 4. At least one directory node fits on the first directory page

// ============================================================================
// PAGE LAYOUT CONSTANTS
// ============================================================================

/// Size of every page of every index file in bytes (16KB).
pub const PAGE_SIZE: usize = 16384;

// ============================================================================
// DIRECTORY GEOMETRY
// These constants are tightly coupled: the directory is a trie of 256-way nodes
// ============================================================================

/// Number of hash bits a single directory node can consume.
pub const MAX_LEVEL_DEPTH: u8 = 8;

/// Slots per directory node.
pub const MAX_LEVEL_SIZE: usize = 1 << MAX_LEVEL_DEPTH;

/// Mask selecting one level worth of slot bits.
pub const LEVEL_MASK: usize = 0xFF;

/// Width of the hash code in bits.
pub const HASH_CODE_BITS: u8 = 64;

/// Buckets created by initialization, one per root slot.
pub const ROOT_BUCKET_COUNT: usize = MAX_LEVEL_SIZE;

/// Upper bound on the number of split-and-retry rounds of one put.
pub const MAX_SPLIT_ATTEMPTS: usize = HASH_CODE_BITS as usize;

const _: () = assert!(
    MAX_LEVEL_SIZE == 1 << MAX_LEVEL_DEPTH,
    "MAX_LEVEL_SIZE must equal 2^MAX_LEVEL_DEPTH"
);

const _: () = assert!(LEVEL_MASK == MAX_LEVEL_SIZE - 1, "LEVEL_MASK mismatch");

// ============================================================================
// DIRECTORY FILE LAYOUT
// ============================================================================

/// Bytes at the start of directory page 0: tree size (i32) and tombstone (i32).
pub const DIRECTORY_HEADER_SIZE: usize = 8;

/// Bytes of one serialized directory node.
/// max left child depth (u8), max right child depth (u8), local depth (u8),
/// followed by 256 little-endian i64 slots.
pub const DIRECTORY_NODE_SIZE: usize = 3 + MAX_LEVEL_SIZE * 8;

/// Directory nodes stored on page 0, after the header.
pub const NODES_PER_FIRST_PAGE: usize = (PAGE_SIZE - DIRECTORY_HEADER_SIZE) / DIRECTORY_NODE_SIZE;

/// Directory nodes stored on every following page.
pub const NODES_PER_PAGE: usize = PAGE_SIZE / DIRECTORY_NODE_SIZE;

const _: () = assert!(
    NODES_PER_FIRST_PAGE >= 1,
    "at least one directory node must fit on the first directory page"
);

// ============================================================================
// BUCKET LAYOUT
// ============================================================================

/// Bytes of the bucket header.
/// free pointer (i32), depth (u8), size (i32), split history (64 x i64),
/// next removed bucket (i64).
pub const BUCKET_HEADER_SIZE: usize = 4 + 1 + 4 + 64 * 8 + 8;

/// Bytes of one offset table slot.
pub const BUCKET_OFFSET_SIZE: usize = 4;

/// Bytes of the hash code stored in front of every entry body.
pub const ENTRY_HASH_SIZE: usize = 8;

/// Bytes available to offset table and entry bodies.
pub const BUCKET_CAPACITY: usize = PAGE_SIZE - BUCKET_HEADER_SIZE;

/// Largest entry body (hash, raw key, raw value) an empty bucket can hold.
pub const MAX_ENTRY_SIZE: usize = BUCKET_CAPACITY - BUCKET_OFFSET_SIZE;

/// A bucket whose content shrinks below this many bytes is a merge candidate.
pub const MERGE_THRESHOLD: usize = BUCKET_CAPACITY / 5;

/// Default bound on the serialized key size in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 10 * 1024;

const _: () = assert!(BUCKET_HEADER_SIZE == 529, "bucket header layout changed");

const _: () = assert!(
    DEFAULT_MAX_KEY_SIZE < MAX_ENTRY_SIZE,
    "DEFAULT_MAX_KEY_SIZE must leave room for the value in an empty bucket"
);

// ============================================================================
// NULL BUCKET LAYOUT
// ============================================================================

/// Bytes in front of the null-key value: present flag (u8) and length (i32).
pub const NULL_BUCKET_HEADER_SIZE: usize = 5;

/// Largest raw value the null-key side table can hold.
pub const MAX_NULL_VALUE_SIZE: usize = PAGE_SIZE - NULL_BUCKET_HEADER_SIZE;

// ============================================================================
// FILE NAMING
// ============================================================================

/// Metadata file extension (format identity, record count, bucket free list).
pub const METADATA_FILE_EXTENSION: &str = ".him";

/// Directory file extension.
pub const DIRECTORY_FILE_EXTENSION: &str = ".hit";

/// Bucket file extension.
pub const BUCKET_FILE_EXTENSION: &str = ".hib";

/// Null-key side table extension.
pub const NULL_BUCKET_FILE_EXTENSION: &str = ".hnb";

// ============================================================================
// WAL CONFIGURATION
// ============================================================================

/// Directory under the store root that holds the WAL.
pub const WAL_DIR_NAME: &str = "wal";

/// Name of the single WAL segment file.
pub const WAL_SEGMENT_NAME: &str = "wal.000001";

/// Size of the WAL frame header in bytes.
/// Each frame contains: file id, operation id, page number, file size in
/// pages, frame kind and a CRC-64 checksum.
pub const WAL_FRAME_HEADER_SIZE: usize = 40;

/// Size of a WAL frame carrying a page image.
pub const WAL_PAGE_FRAME_SIZE: usize = WAL_FRAME_HEADER_SIZE + PAGE_SIZE;

/// WAL size in bytes that triggers a checkpoint after a commit.
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 64 * 1024 * 1024;

// ============================================================================
// REDO DELTAS
// ============================================================================

/// Unchanged runs shorter than this are folded into the surrounding delta.
pub const DELTA_MERGE_GAP: usize = 8;
