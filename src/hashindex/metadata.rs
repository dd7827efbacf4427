//! # Index Metadata Page
//!
//! Page 0 of the `.him` file starts with a 64-byte header describing how the
//! index was created, how many records it holds and where the bucket free
//! list starts.
//!
//! ```text
//! Offset  Size  Field
//! 0       8     magic "TURHASH\0"
//! 8       4     version
//! 12      2     key codec id
//! 14      2     value codec id
//! 16      2     hash function id
//! 18      2     flags (bit 0: null keys, bit 1: encrypted keys)
//! 20      4     max key size
//! 24      8     records
//! 32      8     bucket tombstone (-1 when the free list is empty)
//! 40      24    reserved
//! ```

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::HashIndexError;

pub const METADATA_MAGIC: &[u8; 8] = b"TURHASH\0";
pub const METADATA_VERSION: u32 = 1;
pub const METADATA_HEADER_SIZE: usize = 64;

const FLAG_NULL_KEYS: u16 = 1;
const FLAG_ENCRYPTED: u16 = 1 << 1;

/// What an index was created with; reopening must request the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexIdentity {
    pub key_codec: u16,
    pub value_codec: u16,
    pub hash_function: u16,
    pub null_keys: bool,
    pub encrypted: bool,
}

impl IndexIdentity {
    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.null_keys {
            flags |= FLAG_NULL_KEYS;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        flags
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MetadataHeader {
    magic: [u8; 8],
    version: U32,
    key_codec: U16,
    value_codec: U16,
    hash_function: U16,
    flags: U16,
    max_key_size: U32,
    records: I64,
    bucket_tombstone: I64,
    reserved: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<MetadataHeader>() == METADATA_HEADER_SIZE);

impl MetadataHeader {
    zerocopy_accessors! {
        key_codec: u16,
        value_codec: u16,
        hash_function: u16,
        max_key_size: u32,
        records: i64,
        bucket_tombstone: i64,
    }

    pub fn new(identity: IndexIdentity, max_key_size: u32) -> Self {
        Self {
            magic: *METADATA_MAGIC,
            version: U32::new(METADATA_VERSION),
            key_codec: U16::new(identity.key_codec),
            value_codec: U16::new(identity.value_codec),
            hash_function: U16::new(identity.hash_function),
            flags: U16::new(identity.flags()),
            max_key_size: U32::new(max_key_size),
            records: I64::new(0),
            bucket_tombstone: I64::new(-1),
            reserved: [0u8; 24],
        }
    }

    fn check(&self) -> Result<()> {
        if &self.magic != METADATA_MAGIC {
            return Err(HashIndexError::corrupted("invalid magic bytes in index metadata").into());
        }
        if self.version.get() != METADATA_VERSION {
            return Err(HashIndexError::corrupted(format!(
                "unsupported metadata version: {} (expected {})",
                self.version.get(),
                METADATA_VERSION
            ))
            .into());
        }
        Ok(())
    }

    pub fn from_page(page: &[u8]) -> Result<&Self> {
        ensure!(
            page.len() >= METADATA_HEADER_SIZE,
            "buffer too small for MetadataHeader: {} < {}",
            page.len(),
            METADATA_HEADER_SIZE
        );
        let header = Self::ref_from_bytes(&page[..METADATA_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse MetadataHeader: {:?}", e))?;
        header.check()?;
        Ok(header)
    }

    pub fn from_page_mut(page: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            page.len() >= METADATA_HEADER_SIZE,
            "buffer too small for MetadataHeader: {} < {}",
            page.len(),
            METADATA_HEADER_SIZE
        );
        let header = Self::mut_from_bytes(&mut page[..METADATA_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse MetadataHeader: {:?}", e))?;
        header.check()?;
        Ok(header)
    }

    pub fn write_to(&self, page: &mut [u8]) {
        page[..METADATA_HEADER_SIZE].copy_from_slice(self.as_bytes());
    }

    pub fn null_keys(&self) -> bool {
        self.flags.get() & FLAG_NULL_KEYS != 0
    }

    pub fn encrypted(&self) -> bool {
        self.flags.get() & FLAG_ENCRYPTED != 0
    }

    pub fn identity(&self) -> IndexIdentity {
        IndexIdentity {
            key_codec: self.key_codec(),
            value_codec: self.value_codec(),
            hash_function: self.hash_function(),
            null_keys: self.null_keys(),
            encrypted: self.encrypted(),
        }
    }

    /// Fails with `ConfigMismatch` on the first field that differs.
    pub fn ensure_identity(&self, index: &str, requested: &IndexIdentity) -> Result<()> {
        let stored = self.identity();
        let fields: [(&'static str, String, String); 5] = [
            ("key codec", stored.key_codec.to_string(), requested.key_codec.to_string()),
            ("value codec", stored.value_codec.to_string(), requested.value_codec.to_string()),
            ("hash function", stored.hash_function.to_string(), requested.hash_function.to_string()),
            ("null keys", stored.null_keys.to_string(), requested.null_keys.to_string()),
            ("encryption", stored.encrypted.to_string(), requested.encrypted.to_string()),
        ];

        for (field, stored, requested) in fields {
            if stored != requested {
                return Err(HashIndexError::ConfigMismatch {
                    index: index.to_string(),
                    field,
                    stored,
                    requested,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn bucket_free_list(&self) -> Option<u32> {
        let raw = self.bucket_tombstone();
        (raw >= 0).then_some(raw as u32)
    }

    pub fn set_bucket_free_list(&mut self, page: Option<u32>) {
        self.set_bucket_tombstone(page.map_or(-1, |p| p as i64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    fn identity() -> IndexIdentity {
        IndexIdentity {
            key_codec: 1,
            value_codec: 3,
            hash_function: 1,
            null_keys: true,
            encrypted: false,
        }
    }

    #[test]
    fn header_round_trips_through_a_page() {
        let mut page = vec![0u8; PAGE_SIZE];
        MetadataHeader::new(identity(), 512).write_to(&mut page);

        let header = MetadataHeader::from_page_mut(&mut page).unwrap();
        header.set_records(42);
        header.set_bucket_free_list(Some(7));

        let header = MetadataHeader::from_page(&page).unwrap();
        assert_eq!(header.identity(), identity());
        assert_eq!(header.max_key_size(), 512);
        assert_eq!(header.records(), 42);
        assert_eq!(header.bucket_free_list(), Some(7));
    }

    #[test]
    fn zeroed_page_has_bad_magic() {
        let page = vec![0u8; PAGE_SIZE];
        let err = MetadataHeader::from_page(&page).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::Corrupted(_))
        ));
    }

    #[test]
    fn identity_mismatch_names_the_field() {
        let header = MetadataHeader::new(identity(), 512);
        let mut requested = identity();
        requested.hash_function = 2;

        let err = header.ensure_identity("idx", &requested).unwrap_err();
        match err.downcast_ref::<HashIndexError>() {
            Some(HashIndexError::ConfigMismatch { field, stored, requested, .. }) => {
                assert_eq!(*field, "hash function");
                assert_eq!(stored, "1");
                assert_eq!(requested, "2");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        header.ensure_identity("idx", &identity()).unwrap();
    }
}
