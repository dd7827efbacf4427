//! # Hash Table Builder
//!
//! `HashTableBuilder` collects everything that shapes an index before it is
//! created or opened: the key and value codecs, the hash function, an
//! optional key encryption and the [`IndexOptions`].
//!
//! ## Configuration Options
//!
//! | Option        | Default     | Persisted | Checked on open |
//! |---------------|-------------|-----------|-----------------|
//! | key codec     | required    | id        | yes             |
//! | value codec   | required    | id        | yes             |
//! | hash_function | `Xxh3Hash`  | id        | yes             |
//! | encryption    | none        | flag      | yes             |
//! | null_keys     | false       | flag      | yes             |
//! | max_key_size  | 10 KB       | value     | stored value wins |
//!
//! ## Usage Examples
//!
//! ```ignore
//! let manager = Arc::new(AtomicOperationsManager::open("./data", StoreOptions::default())?);
//!
//! let users = HashTable::builder("users", StringCodec, U64Codec)
//!     .null_keys(true)
//!     .create(&manager)?;
//!
//! let ordered = HashTable::builder("ids", U64Codec, BytesCodec)
//!     .hash_function(IdentityHash)
//!     .open(&manager)?;
//! ```

use std::sync::Arc;

use eyre::Result;

use super::entry::EntryCodec;
use super::table::HashTable;
use crate::codec::{Codec, Encryption};
use crate::config::IndexOptions;
use crate::hash::{HashFunction, Xxh3Hash};
use crate::storage::AtomicOperationsManager;

/// Builder for creating or opening a [`HashTable`].
///
/// Use `HashTable::builder()` to start one.
pub struct HashTableBuilder<KC, VC, H = Xxh3Hash> {
    name: String,
    key_codec: KC,
    value_codec: VC,
    hash_function: H,
    encryption: Option<Arc<dyn Encryption>>,
    options: IndexOptions,
}

impl<KC, VC> HashTable<KC, VC, Xxh3Hash>
where
    KC: Codec,
    VC: Codec,
    KC::Item: Clone,
{
    pub fn builder(name: &str, key_codec: KC, value_codec: VC) -> HashTableBuilder<KC, VC> {
        HashTableBuilder {
            name: name.to_string(),
            key_codec,
            value_codec,
            hash_function: Xxh3Hash,
            encryption: None,
            options: IndexOptions::default(),
        }
    }
}

impl<KC, VC, H> HashTableBuilder<KC, VC, H>
where
    KC: Codec,
    VC: Codec,
    KC::Item: Clone,
    H: HashFunction,
{
    /// Replaces the hash function. Its id is persisted.
    pub fn hash_function<H2: HashFunction>(self, hash_function: H2) -> HashTableBuilder<KC, VC, H2> {
        HashTableBuilder {
            name: self.name,
            key_codec: self.key_codec,
            value_codec: self.value_codec,
            hash_function,
            encryption: self.encryption,
            options: self.options,
        }
    }

    /// Encrypts keys at rest. Hashing and ordering still see the plain keys.
    pub fn encryption(mut self, encryption: Arc<dyn Encryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    pub fn null_keys(mut self, enabled: bool) -> Self {
        self.options = self.options.null_keys(enabled);
        self
    }

    /// Bound on the raw key size. Ignored by `open`, which uses the stored bound.
    pub fn max_key_size(mut self, bytes: usize) -> Self {
        self.options = self.options.max_key_size(bytes);
        self
    }

    fn parts(self) -> (String, EntryCodec<KC, VC>, H, IndexOptions) {
        (
            self.name,
            EntryCodec::new(self.key_codec, self.value_codec, self.encryption),
            self.hash_function,
            self.options,
        )
    }

    /// Creates the index files. Fails with `AlreadyExists` when they are present.
    pub fn create(self, manager: &Arc<AtomicOperationsManager>) -> Result<HashTable<KC, VC, H>> {
        let (name, entries, hasher, options) = self.parts();
        HashTable::create(manager, &name, entries, hasher, options)
    }

    /// Opens existing index files and checks them against this configuration.
    pub fn open(self, manager: &Arc<AtomicOperationsManager>) -> Result<HashTable<KC, VC, H>> {
        let (name, entries, hasher, options) = self.parts();
        HashTable::open(manager, &name, entries, hasher, options)
    }

    /// Opens the index when it exists, creates it otherwise.
    pub fn open_or_create(self, manager: &Arc<AtomicOperationsManager>) -> Result<HashTable<KC, VC, H>> {
        if HashTable::<KC, VC, H>::exists(manager, &self.name) {
            self.open(manager)
        } else {
            self.create(manager)
        }
    }
}
