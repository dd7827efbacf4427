//! # Hash Functions
//!
//! The index places an entry by a 64-bit hash of its encoded key. The top
//! bits select directory slots level by level, so the hash function decides
//! how evenly buckets fill.
//!
//! - [`Xxh3Hash`] (id 1): xxh3-64 over the encoded key. The default.
//! - [`IdentityHash`] (id 2): the first eight encoded bytes read big-endian,
//!   zero-padded. Keys that encode big-endian (such as `U64Codec`) keep their
//!   numeric order in hash order, which makes traversal order predictable.
//!
//! The id is persisted in the index metadata; reopening an index with a
//! different hash function is refused.

use xxhash_rust::xxh3::xxh3_64;

pub trait HashFunction: Send + Sync + 'static {
    /// Persisted identifier of the function.
    const ID: u16;

    fn hash(&self, encoded_key: &[u8]) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3Hash;

impl HashFunction for Xxh3Hash {
    const ID: u16 = 1;

    fn hash(&self, encoded_key: &[u8]) -> u64 {
        xxh3_64(encoded_key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHash;

impl HashFunction for IdentityHash {
    const ID: u16 = 2;

    fn hash(&self, encoded_key: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        let n = encoded_key.len().min(8);
        buf[..n].copy_from_slice(&encoded_key[..n]);
        u64::from_be_bytes(buf)
    }
}
