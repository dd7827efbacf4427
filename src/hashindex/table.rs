//! # Hash Table
//!
//! `HashTable` is the public face of one on-disk hash index. It owns the four
//! files of the index and routes every call through the page store:
//!
//! ```text
//! <name>.him   metadata: identity, record count, bucket free list
//! <name>.hit   directory trie of 256-slot nodes
//! <name>.hib   buckets, one page each
//! <name>.hnb   value of the null key (only with null keys enabled)
//! ```
//!
//! ## Locking
//!
//! A mutation starts an atomic operation, which holds the write side of the
//! index's component lock, then takes the index's own write lock. Reads take
//! the component read lock and then the index read lock, and see committed
//! pages only.
//!
//! ## Mutations
//!
//! Every mutation runs in one atomic operation: the entry change, any splits
//! or merges it causes and the record count update commit together, or not at
//! all. An error anywhere rolls the whole operation back.
//!
//! ## Ordering
//!
//! Entries are ordered by `(hash, key)`. Buckets cover disjoint hash prefixes
//! and the directory lists them in prefix order, so ordered reads walk the
//! directory bucket by bucket. The range queries return the qualifying part of
//! one bucket; callers continue from the last key they saw.

use std::ops::Range;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::bucket::{BucketPage, BucketPageMut, SearchResult};
use super::cursor::{Cursor, Direction};
use super::directory::{Directory, NodeSlots};
use super::entry::{EncodedKey, Entry, EntryCodec};
use super::metadata::{IndexIdentity, MetadataHeader};
use super::null_bucket::{NullBucket, NullBucketMut};
use super::path::BucketPath;
use super::pointer::DirectoryPointer;
use super::split::{
    all_maps_contain_same_bucket, check_bucket_depth, merge_bucket_after_deletion,
    merge_node_to_parent, split_and_grow,
};
use super::traverse::{bucket_path, next_bucket, prev_bucket};
use crate::codec::Codec;
use crate::config::{
    IndexOptions, BUCKET_FILE_EXTENSION, DIRECTORY_FILE_EXTENSION, ENTRY_HASH_SIZE,
    MAX_ENTRY_SIZE, MAX_LEVEL_DEPTH, MAX_LEVEL_SIZE, MAX_SPLIT_ATTEMPTS,
    METADATA_FILE_EXTENSION, NULL_BUCKET_FILE_EXTENSION, ROOT_BUCKET_COUNT,
};
use crate::error::HashIndexError;
use crate::hash::{HashFunction, Xxh3Hash};
use crate::storage::{
    AtomicOperation, AtomicOperationsManager, ComponentLock, FileId, FileStore, PageKey, PageRead,
};

/// Decision of a `validated_put` validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validated<V> {
    /// Store this value.
    Put(V),
    /// Leave the index as it is.
    Ignore,
}

/// Decision of an `update` closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction<V> {
    Change(V),
    Remove,
    Nothing,
}

/// File ids of one index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexFiles {
    pub metadata: FileId,
    pub directory: Directory,
    pub buckets: FileId,
    pub null_bucket: Option<FileId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutOutcome {
    Inserted,
    Replaced,
    Unchanged,
    Full,
}

fn corrupted(message: impl Into<String>) -> eyre::Report {
    HashIndexError::corrupted(message).into()
}

fn file_name(name: &str, extension: &str) -> String {
    format!("{}{}", name, extension)
}

fn metadata_key(files: &IndexFiles) -> PageKey {
    PageKey::new(files.metadata, 0)
}

/// An on-disk extendible hash index mapping `KC::Item` keys to `VC::Item` values.
pub struct HashTable<KC: Codec, VC: Codec, H: HashFunction = Xxh3Hash> {
    name: String,
    manager: Arc<AtomicOperationsManager>,
    component: ComponentLock,
    entries: EntryCodec<KC, VC>,
    hasher: H,
    max_key_size: usize,
    null_keys: bool,
    files: RwLock<IndexFiles>,
}

impl<KC, VC, H> HashTable<KC, VC, H>
where
    KC: Codec,
    VC: Codec,
    KC::Item: Clone,
    H: HashFunction,
{
    fn identity(null_keys: bool, encrypted: bool) -> IndexIdentity {
        IndexIdentity {
            key_codec: KC::ID,
            value_codec: VC::ID,
            hash_function: H::ID,
            null_keys,
            encrypted,
        }
    }

    /// Whether an index called `name` exists in the manager's directory.
    pub fn exists(manager: &AtomicOperationsManager, name: &str) -> bool {
        manager.file_exists(&file_name(name, METADATA_FILE_EXTENSION))
    }

    pub(crate) fn create(
        manager: &Arc<AtomicOperationsManager>,
        name: &str,
        entries: EntryCodec<KC, VC>,
        hasher: H,
        options: IndexOptions,
    ) -> Result<Self> {
        if Self::exists(manager, name) {
            return Err(HashIndexError::AlreadyExists {
                index: name.to_string(),
            }
            .into());
        }

        let identity = Self::identity(options.null_keys, entries.is_encrypted());
        let mut added = Vec::new();
        let result = Self::create_files(manager, name, &entries, identity, options, &mut added);

        let files = match result {
            Ok(files) => files,
            Err(e) => {
                for file_id in added {
                    if let Err(cleanup) = manager.delete_file(file_id) {
                        debug!(index = name, error = %cleanup, "failed to remove partially created file");
                    }
                }
                return Err(e.wrap_err(format!("failed to create hash index '{}'", name)));
            }
        };

        debug!(index = name, null_keys = options.null_keys, encrypted = identity.encrypted, "created hash index");

        Ok(Self {
            name: name.to_string(),
            component: manager.component_lock(name),
            manager: Arc::clone(manager),
            entries,
            hasher,
            max_key_size: options.max_key_size,
            null_keys: options.null_keys,
            files: RwLock::new(files),
        })
    }

    fn create_files(
        manager: &AtomicOperationsManager,
        name: &str,
        entries: &EntryCodec<KC, VC>,
        identity: IndexIdentity,
        options: IndexOptions,
        added: &mut Vec<FileId>,
    ) -> Result<IndexFiles> {
        let mut add = |extension: &str| -> Result<FileId> {
            let file_id = manager.add_file(&file_name(name, extension))?;
            added.push(file_id);
            Ok(file_id)
        };

        let metadata = add(METADATA_FILE_EXTENSION)?;
        let directory = Directory::new(add(DIRECTORY_FILE_EXTENSION)?);
        let buckets = add(BUCKET_FILE_EXTENSION)?;
        let null_bucket = if options.null_keys {
            Some(add(NULL_BUCKET_FILE_EXTENSION)?)
        } else {
            None
        };

        let files = IndexFiles {
            metadata,
            directory,
            buckets,
            null_bucket,
        };

        let component = manager.component_lock(name);
        let mut op = manager.start_atomic_operation(&component);
        let result = (|| {
            let page_no = op.add_page(files.metadata)?;
            op.with_page_mut(PageKey::new(files.metadata, page_no), |page| {
                MetadataHeader::new(identity, options.max_key_size as u32).write_to(page);
                Ok(())
            })?;
            init_state(&mut op, &files, entries)
        })();

        match result {
            Ok(()) => op.commit()?,
            Err(e) => {
                op.rollback();
                return Err(e);
            }
        }
        Ok(files)
    }

    pub(crate) fn open(
        manager: &Arc<AtomicOperationsManager>,
        name: &str,
        entries: EntryCodec<KC, VC>,
        hasher: H,
        options: IndexOptions,
    ) -> Result<Self> {
        if !Self::exists(manager, name) {
            return Err(HashIndexError::NotFound {
                index: name.to_string(),
            }
            .into());
        }

        let store = manager.store();
        let metadata = manager.open_file(&file_name(name, METADATA_FILE_EXTENSION))?;
        let requested = Self::identity(options.null_keys, entries.is_encrypted());
        let max_key_size = store
            .with_page(PageKey::new(metadata, 0), |page| {
                let header = MetadataHeader::from_page(page)?;
                header.ensure_identity(name, &requested)?;
                Ok(header.max_key_size() as usize)
            })
            .wrap_err_with(|| format!("failed to open hash index '{}'", name))?;

        let directory = Directory::new(manager.open_file(&file_name(name, DIRECTORY_FILE_EXTENSION))?);
        directory
            .open(store)
            .wrap_err_with(|| format!("failed to open directory of hash index '{}'", name))?;
        let buckets = manager.open_file(&file_name(name, BUCKET_FILE_EXTENSION))?;
        let null_bucket = if options.null_keys {
            Some(manager.open_file(&file_name(name, NULL_BUCKET_FILE_EXTENSION))?)
        } else {
            None
        };

        debug!(index = name, max_key_size, "opened hash index");

        Ok(Self {
            name: name.to_string(),
            component: manager.component_lock(name),
            manager: Arc::clone(manager),
            entries,
            hasher,
            max_key_size,
            null_keys: options.null_keys,
            files: RwLock::new(IndexFiles {
                metadata,
                directory,
                buckets,
                null_bucket,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    pub fn supports_null_keys(&self) -> bool {
        self.null_keys
    }

    /// Runs `f` in a fresh atomic operation and commits it, or rolls it back on error.
    fn write<R>(&self, f: impl FnOnce(&mut AtomicOperation<'_>, &IndexFiles) -> Result<R>) -> Result<R> {
        let mut op = self.manager.start_atomic_operation(&self.component);
        let files = self.files.write();
        let result = f(&mut op, &files);
        drop(files);

        match result {
            Ok(value) => {
                op.commit()
                    .wrap_err_with(|| format!("failed to commit change to hash index '{}'", self.name))?;
                Ok(value)
            }
            Err(e) => {
                trace!(index = %self.name, op_id = op.id(), "rolling back hash index change");
                op.rollback();
                Err(e)
            }
        }
    }

    /// Runs `f` against committed pages.
    fn read<R>(&self, f: impl FnOnce(&FileStore, &IndexFiles) -> Result<R>) -> Result<R> {
        let _component = self.manager.acquire_read_lock(&self.component);
        let files = self.files.read();
        f(self.manager.store(), &files)
    }

    fn encode_key(&self, key: &KC::Item) -> Result<(EncodedKey, u64)> {
        let encoded = self.entries.encode_key(key)?;
        let hash = self.hasher.hash(&encoded.encoded);
        Ok((encoded, hash))
    }

    /// A key above `max_key_size` is never stored, so lookups can stop early.
    fn storable(&self, key: &EncodedKey) -> bool {
        key.raw.len() <= self.max_key_size
    }

    fn check_key_size(&self, key: &EncodedKey) -> Result<()> {
        if !self.storable(key) {
            return Err(HashIndexError::KeyTooLarge {
                size: key.raw.len(),
                max: self.max_key_size,
            }
            .into());
        }
        Ok(())
    }

    fn check_entry_size(key: &EncodedKey, value: &[u8]) -> Result<()> {
        let size = ENTRY_HASH_SIZE + key.raw.len() + value.len();
        if size > MAX_ENTRY_SIZE {
            return Err(HashIndexError::EntryTooLarge {
                size,
                max: MAX_ENTRY_SIZE,
            }
            .into());
        }
        Ok(())
    }

    fn null_file(&self, files: &IndexFiles) -> Result<FileId> {
        match files.null_bucket {
            Some(file_id) if self.null_keys => Ok(file_id),
            _ => Err(HashIndexError::NullKeyNotSupported {
                index: self.name.clone(),
            }
            .into()),
        }
    }

    fn locate<C: PageRead>(&self, ctx: &C, files: &IndexFiles, hash: u64) -> Result<(BucketPath, u32)> {
        let path = bucket_path(ctx, &files.directory, hash)?;
        let page = bucket_at(ctx, files, &path)?;
        Ok((path, page))
    }

    fn find_value<C: PageRead>(
        &self,
        ctx: &C,
        files: &IndexFiles,
        key: &EncodedKey,
        hash: u64,
    ) -> Result<Option<VC::Item>> {
        let (_, page) = self.locate(ctx, files, hash)?;
        ctx.with_page(PageKey::new(files.buckets, page), |data| {
            let bucket = BucketPage::from_page(data, &self.entries)?;
            match bucket.find(hash, |stored| self.entries.compare_raw_key(stored, &key.encoded))? {
                SearchResult::Found(index) => {
                    Ok(Some(self.entries.decode_value(bucket.entry_at(index)?.value)?))
                }
                SearchResult::NotFound(_) => Ok(None),
            }
        })
    }

    /// Value stored under `key`, or `None`.
    pub fn get(&self, key: &KC::Item) -> Result<Option<VC::Item>> {
        let (encoded, hash) = self.encode_key(key)?;
        if !self.storable(&encoded) {
            return Ok(None);
        }
        trace!(index = %self.name, hash, "get");
        self.read(|store, files| self.find_value(store, files, &encoded, hash))
    }

    pub fn contains_key(&self, key: &KC::Item) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Value stored under the null key, or `None`.
    pub fn get_null(&self) -> Result<Option<VC::Item>> {
        self.read(|store, files| {
            let file_id = self.null_file(files)?;
            read_null_value(store, file_id)?
                .map(|raw| self.entries.decode_value(&raw))
                .transpose()
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &KC::Item, value: &VC::Item) -> Result<()> {
        let (encoded, hash) = self.encode_key(key)?;
        self.check_key_size(&encoded)?;
        let raw = self.entries.encode_value(value);
        Self::check_entry_size(&encoded, &raw)?;
        trace!(index = %self.name, hash, "put");

        self.write(|op, files| self.put_raw(op, files, &encoded, hash, &raw))
    }

    /// Stores the value the validator settles on.
    ///
    /// The validator sees the key, the current value and the proposed value.
    /// Returns false when it answered [`Validated::Ignore`]. An error from the
    /// validator leaves the index unchanged.
    pub fn validated_put<F>(&self, key: &KC::Item, value: VC::Item, validator: F) -> Result<bool>
    where
        F: FnOnce(Option<&KC::Item>, Option<&VC::Item>, VC::Item) -> Result<Validated<VC::Item>>,
    {
        let (encoded, hash) = self.encode_key(key)?;
        self.check_key_size(&encoded)?;
        trace!(index = %self.name, hash, "validated put");

        self.write(|op, files| {
            let current = self.find_value(&*op, files, &encoded, hash)?;
            match validator(Some(key), current.as_ref(), value)? {
                Validated::Ignore => Ok(false),
                Validated::Put(value) => {
                    let raw = self.entries.encode_value(&value);
                    Self::check_entry_size(&encoded, &raw)?;
                    self.put_raw(op, files, &encoded, hash, &raw)?;
                    Ok(true)
                }
            }
        })
    }

    /// Stores `value` under the null key.
    pub fn put_null(&self, value: &VC::Item) -> Result<()> {
        let raw = self.entries.encode_value(value);
        self.write(|op, files| {
            let file_id = self.null_file(files)?;
            self.put_null_raw(op, files, file_id, &raw)
        })
    }

    /// Null-key counterpart of [`validated_put`](Self::validated_put); the
    /// validator receives `None` as key.
    pub fn validated_put_null<F>(&self, value: VC::Item, validator: F) -> Result<bool>
    where
        F: FnOnce(Option<&KC::Item>, Option<&VC::Item>, VC::Item) -> Result<Validated<VC::Item>>,
    {
        self.write(|op, files| {
            let file_id = self.null_file(files)?;
            let current = read_null_value(&*op, file_id)?
                .map(|raw| self.entries.decode_value(&raw))
                .transpose()?;
            match validator(None, current.as_ref(), value)? {
                Validated::Ignore => Ok(false),
                Validated::Put(value) => {
                    let raw = self.entries.encode_value(&value);
                    self.put_null_raw(op, files, file_id, &raw)?;
                    Ok(true)
                }
            }
        })
    }

    fn put_null_raw(
        &self,
        op: &mut AtomicOperation<'_>,
        files: &IndexFiles,
        file_id: FileId,
        raw: &[u8],
    ) -> Result<()> {
        if op.filled_up_to(file_id)? == 0 {
            op.add_page(file_id)?;
        }
        let existed = op.with_page_mut(PageKey::new(file_id, 0), |page| {
            let mut bucket = NullBucketMut::from_page(page)?;
            let existed = bucket.as_ref().value()?.is_some();
            bucket.set_value(raw)?;
            Ok(existed)
        })?;
        if !existed {
            add_records(op, files, 1)?;
        }
        Ok(())
    }

    fn put_raw(
        &self,
        op: &mut AtomicOperation<'_>,
        files: &IndexFiles,
        key: &EncodedKey,
        hash: u64,
        value: &[u8],
    ) -> Result<()> {
        let mut existed = false;

        for _ in 0..MAX_SPLIT_ATTEMPTS {
            let (path, page) = self.locate(&*op, files, hash)?;
            let outcome = op.with_page_mut(PageKey::new(files.buckets, page), |data| {
                let mut bucket = BucketPageMut::from_page(data, &self.entries)?;
                let found = bucket
                    .as_ref()
                    .find(hash, |stored| self.entries.compare_raw_key(stored, &key.encoded))?;

                match found {
                    SearchResult::Found(index) => {
                        let (same, same_len) = {
                            let view = bucket.as_ref();
                            let old = view.entry_at(index)?.value;
                            (old == value, old.len() == value.len())
                        };
                        if same {
                            return Ok(PutOutcome::Unchanged);
                        }
                        if same_len {
                            bucket.update_value(index, value)?;
                            return Ok(PutOutcome::Replaced);
                        }
                        bucket.delete_entry(index)?;
                        existed = true;
                        if bucket.insert_entry(index, hash, &key.raw, value)? {
                            Ok(PutOutcome::Replaced)
                        } else {
                            Ok(PutOutcome::Full)
                        }
                    }
                    SearchResult::NotFound(index) => {
                        if bucket.insert_entry(index, hash, &key.raw, value)? {
                            Ok(PutOutcome::Inserted)
                        } else {
                            Ok(PutOutcome::Full)
                        }
                    }
                }
            })?;

            match outcome {
                PutOutcome::Unchanged | PutOutcome::Replaced => return Ok(()),
                PutOutcome::Inserted => {
                    if !existed {
                        add_records(op, files, 1)?;
                    }
                    return Ok(());
                }
                PutOutcome::Full => split_and_grow(op, files, &self.entries, &path, page)?,
            }
        }

        Err(corrupted(format!(
            "hash {:#018x} found no room after {} splits",
            hash, MAX_SPLIT_ATTEMPTS
        )))
    }

    /// Removes `key` and returns its value.
    pub fn remove(&self, key: &KC::Item) -> Result<Option<VC::Item>> {
        let (encoded, hash) = self.encode_key(key)?;
        if !self.storable(&encoded) {
            return Ok(None);
        }
        trace!(index = %self.name, hash, "remove");
        self.write(|op, files| self.remove_raw(op, files, &encoded, hash))
    }

    pub fn remove_null(&self) -> Result<Option<VC::Item>> {
        self.write(|op, files| {
            let file_id = self.null_file(files)?;
            if op.filled_up_to(file_id)? == 0 {
                return Ok(None);
            }
            let removed = op.with_page_mut(PageKey::new(file_id, 0), |page| {
                let mut bucket = NullBucketMut::from_page(page)?;
                let value = bucket.as_ref().value()?.map(<[u8]>::to_vec);
                bucket.remove_value();
                Ok(value)
            })?;
            match removed {
                Some(raw) => {
                    add_records(op, files, -1)?;
                    Ok(Some(self.entries.decode_value(&raw)?))
                }
                None => Ok(None),
            }
        })
    }

    fn remove_raw(
        &self,
        op: &mut AtomicOperation<'_>,
        files: &IndexFiles,
        key: &EncodedKey,
        hash: u64,
    ) -> Result<Option<VC::Item>> {
        let (_, page) = self.locate(&*op, files, hash)?;
        let removed = op.with_page_mut(PageKey::new(files.buckets, page), |data| {
            let mut bucket = BucketPageMut::from_page(data, &self.entries)?;
            let found = bucket
                .as_ref()
                .find(hash, |stored| self.entries.compare_raw_key(stored, &key.encoded))?;
            match found {
                SearchResult::Found(index) => {
                    let value = self.entries.decode_value(bucket.as_ref().entry_at(index)?.value)?;
                    bucket.delete_entry(index)?;
                    Ok(Some(value))
                }
                SearchResult::NotFound(_) => Ok(None),
            }
        })?;

        let Some(value) = removed else {
            return Ok(None);
        };
        add_records(op, files, -1)?;
        self.shrink(op, files, hash)?;
        Ok(Some(value))
    }

    /// Merges buckets and folds nodes around `hash` for as long as possible.
    fn shrink(&self, op: &mut AtomicOperation<'_>, files: &IndexFiles, hash: u64) -> Result<()> {
        loop {
            let (path, page) = self.locate(&*op, files, hash)?;
            if merge_bucket_after_deletion(op, files, &self.entries, &path, page, hash)? {
                continue;
            }

            if path.parent().is_some() {
                let frame = *path.current();
                let node: NodeSlots = files.directory.node(&*op, frame.node_index)?;
                if all_maps_contain_same_bucket(&node, frame.hash_map_size()) {
                    merge_node_to_parent(op, &files.directory, &path)?;
                    continue;
                }
            }
            return Ok(());
        }
    }

    /// Applies the decision of `updater` to `key` in one atomic operation.
    ///
    /// Returns true when the index changed.
    pub fn update<F>(&self, key: &KC::Item, updater: F) -> Result<bool>
    where
        F: FnOnce(Option<&VC::Item>) -> Result<UpdateAction<VC::Item>>,
    {
        let (encoded, hash) = self.encode_key(key)?;
        trace!(index = %self.name, hash, "update");

        self.write(|op, files| {
            let current = self.find_value(&*op, files, &encoded, hash)?;
            match updater(current.as_ref())? {
                UpdateAction::Change(value) => {
                    self.check_key_size(&encoded)?;
                    let raw = self.entries.encode_value(&value);
                    Self::check_entry_size(&encoded, &raw)?;
                    self.put_raw(op, files, &encoded, hash, &raw)?;
                    Ok(true)
                }
                UpdateAction::Remove => Ok(self.remove_raw(op, files, &encoded, hash)?.is_some()),
                UpdateAction::Nothing => Ok(false),
            }
        })
    }

    /// Number of stored keys, the null key included.
    pub fn size(&self) -> Result<usize> {
        self.read(|store, files| {
            let records = store.with_page(metadata_key(files), |page| {
                Ok(MetadataHeader::from_page(page)?.records())
            })?;
            if records < 0 {
                return Err(corrupted(format!("negative record count {}", records)));
            }
            Ok(records as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Removes every entry and returns the index to its freshly created shape.
    pub fn clear(&self) -> Result<()> {
        self.write(|op, files| {
            if let Some(file_id) = files.null_bucket {
                op.truncate_file(file_id)?;
            }
            init_state(op, files, &self.entries)
        })?;
        debug!(index = %self.name, "cleared hash index");
        Ok(())
    }

    /// Number of live directory nodes.
    pub fn node_count(&self) -> Result<u32> {
        self.read(|store, files| files.directory.node_count(store))
    }

    fn decode_range(
        &self,
        bucket: &BucketPage<'_>,
        range: Range<usize>,
    ) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        range
            .map(|index| self.entries.decode_entry(bucket.entry_at(index)?))
            .collect()
    }

    /// Visits buckets in ascending order from the one holding `hash` until
    /// `visit` returns something.
    fn scan_forward<C: PageRead, R>(
        &self,
        ctx: &C,
        files: &IndexFiles,
        hash: u64,
        mut visit: impl FnMut(&BucketPage<'_>) -> Result<Option<R>>,
    ) -> Result<Option<R>> {
        let mut path = bucket_path(ctx, &files.directory, hash)?;
        loop {
            let page = bucket_at(ctx, files, &path)?;
            let (depth, found) = ctx.with_page(PageKey::new(files.buckets, page), |data| {
                let bucket = BucketPage::from_page(data, &self.entries)?;
                Ok((bucket.depth(), visit(&bucket)?))
            })?;
            if found.is_some() {
                return Ok(found);
            }
            match next_bucket(ctx, &files.directory, &path, depth)? {
                Some(next) => path = next,
                None => return Ok(None),
            }
        }
    }

    fn scan_backward<C: PageRead, R>(
        &self,
        ctx: &C,
        files: &IndexFiles,
        hash: u64,
        mut visit: impl FnMut(&BucketPage<'_>) -> Result<Option<R>>,
    ) -> Result<Option<R>> {
        let mut path = bucket_path(ctx, &files.directory, hash)?;
        loop {
            let page = bucket_at(ctx, files, &path)?;
            let (depth, found) = ctx.with_page(PageKey::new(files.buckets, page), |data| {
                let bucket = BucketPage::from_page(data, &self.entries)?;
                Ok((bucket.depth(), visit(&bucket)?))
            })?;
            if found.is_some() {
                return Ok(found);
            }
            match prev_bucket(ctx, &files.directory, &path, depth)? {
                Some(prev) => path = prev,
                None => return Ok(None),
            }
        }
    }

    /// Smallest entry in `(hash, key)` order.
    pub fn first_entry(&self) -> Result<Option<Entry<KC::Item, VC::Item>>> {
        self.read(|store, files| {
            self.scan_forward(store, files, 0, |bucket| {
                if bucket.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.entries.decode_entry(bucket.entry_at(0)?)?))
            })
        })
    }

    /// Largest entry in `(hash, key)` order.
    pub fn last_entry(&self) -> Result<Option<Entry<KC::Item, VC::Item>>> {
        self.read(|store, files| {
            self.scan_backward(store, files, u64::MAX, |bucket| {
                if bucket.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.entries.decode_entry(bucket.entry_at(bucket.size() - 1)?)?))
            })
        })
    }

    /// Entries of the first non-empty bucket.
    pub(crate) fn first_entries(&self) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        self.read(|store, files| {
            let found = self.scan_forward(store, files, 0, |bucket| {
                if bucket.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.decode_range(bucket, 0..bucket.size())?))
            })?;
            Ok(found.unwrap_or_default())
        })
    }

    /// Entries of the last non-empty bucket.
    pub(crate) fn last_entries(&self) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        self.read(|store, files| {
            let found = self.scan_backward(store, files, u64::MAX, |bucket| {
                if bucket.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.decode_range(bucket, 0..bucket.size())?))
            })?;
            Ok(found.unwrap_or_default())
        })
    }

    fn forward_from(
        &self,
        key: &KC::Item,
        start: impl Fn(SearchResult) -> usize,
        limit: Option<usize>,
    ) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        let (encoded, hash) = self.encode_key(key)?;
        self.read(|store, files| {
            let found = self.scan_forward(store, files, hash, |bucket| {
                let search =
                    bucket.find(hash, |stored| self.entries.compare_raw_key(stored, &encoded.encoded))?;
                let from = start(search);
                if from >= bucket.size() {
                    return Ok(None);
                }
                let to = match limit {
                    Some(limit) if limit > 0 => bucket.size().min(from + limit),
                    _ => bucket.size(),
                };
                Ok(Some(self.decode_range(bucket, from..to)?))
            })?;
            Ok(found.unwrap_or_default())
        })
    }

    fn backward_from(
        &self,
        key: &KC::Item,
        end: impl Fn(SearchResult) -> usize,
    ) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        let (encoded, hash) = self.encode_key(key)?;
        self.read(|store, files| {
            let found = self.scan_backward(store, files, hash, |bucket| {
                let search =
                    bucket.find(hash, |stored| self.entries.compare_raw_key(stored, &encoded.encoded))?;
                let to = end(search);
                if to == 0 {
                    return Ok(None);
                }
                Ok(Some(self.decode_range(bucket, 0..to)?))
            })?;
            Ok(found.unwrap_or_default())
        })
    }

    /// Entries `>= key` from the bucket holding the smallest of them, in ascending order.
    pub fn ceiling_entries(&self, key: &KC::Item) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        self.forward_from(key, SearchResult::index, None)
    }

    /// Entries `> key` from the bucket holding the smallest of them, at most
    /// `limit` of them (`None` or `Some(0)` for no limit).
    pub fn higher_entries(
        &self,
        key: &KC::Item,
        limit: Option<usize>,
    ) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        self.forward_from(
            key,
            |search| match search {
                SearchResult::Found(index) => index + 1,
                SearchResult::NotFound(index) => index,
            },
            limit,
        )
    }

    /// Entries `<= key` from the bucket holding the largest of them, in ascending order.
    pub fn floor_entries(&self, key: &KC::Item) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        self.backward_from(key, |search| match search {
            SearchResult::Found(index) => index + 1,
            SearchResult::NotFound(index) => index,
        })
    }

    /// Entries `< key` from the bucket holding the largest of them, in ascending order.
    pub fn lower_entries(&self, key: &KC::Item) -> Result<Vec<Entry<KC::Item, VC::Item>>> {
        self.backward_from(key, SearchResult::index)
    }

    /// Ascending iterator over all entries except the null key.
    pub fn iter(&self) -> Cursor<'_, KC, VC, H> {
        Cursor::new(self, Direction::Ascending)
    }

    /// Descending iterator over all entries except the null key.
    pub fn iter_rev(&self) -> Cursor<'_, KC, VC, H> {
        Cursor::new(self, Direction::Descending)
    }

    /// Walks every bucket and checks depth prefixes, entry order and the record count.
    pub fn verify(&self) -> Result<()> {
        self.read(|store, files| {
            let mut entries = 0usize;
            let mut previous: Option<u64> = None;

            self.scan_forward(store, files, 0, |bucket| {
                let raw = bucket.to_owned_entries()?;
                check_bucket_depth(&raw, bucket.depth())?;
                for entry in &raw {
                    if previous.is_some_and(|p| p > entry.hash) {
                        return Err(corrupted(format!(
                            "hash {:#018x} follows the larger hash {:#018x}",
                            entry.hash,
                            previous.unwrap_or_default()
                        )));
                    }
                    previous = Some(entry.hash);
                }
                entries += raw.len();
                Ok(None::<()>)
            })?;

            if let Some(file_id) = files.null_bucket {
                if read_null_value(store, file_id)?.is_some() {
                    entries += 1;
                }
            }

            let records = store.with_page(metadata_key(files), |page| {
                Ok(MetadataHeader::from_page(page)?.records())
            })?;
            if records != entries as i64 {
                return Err(corrupted(format!(
                    "record count {} differs from {} stored entries",
                    records, entries
                )));
            }
            Ok(())
        })
    }

    /// Checkpoints the WAL so every committed change sits in the index files.
    pub fn flush(&self) -> Result<()> {
        self.manager.checkpoint()
    }

    /// Flushes and unmaps the index files.
    pub fn close(self) -> Result<()> {
        let _component = self.manager.acquire_read_lock(&self.component);
        let files = self.files.read();
        self.manager.checkpoint()?;
        for file_id in file_ids(&files) {
            self.manager.close_file(file_id)?;
        }
        debug!(index = %self.name, "closed hash index");
        Ok(())
    }

    /// Removes the index files from disk.
    pub fn delete(self) -> Result<()> {
        let _component = self.manager.acquire_read_lock(&self.component);
        let files = self.files.read();
        for file_id in file_ids(&files) {
            self.manager
                .delete_file(file_id)
                .wrap_err_with(|| format!("failed to delete hash index '{}'", self.name))?;
        }
        debug!(index = %self.name, "deleted hash index");
        Ok(())
    }
}

fn file_ids(files: &IndexFiles) -> Vec<FileId> {
    let mut ids = vec![files.metadata, files.directory.file_id(), files.buckets];
    ids.extend(files.null_bucket);
    ids
}

fn bucket_at<C: PageRead>(ctx: &C, files: &IndexFiles, path: &BucketPath) -> Result<u32> {
    let frame = path.current();
    let ptr = files.directory.pointer(ctx, frame.node_index, frame.slot())?;
    ptr.bucket_page().ok_or_else(|| {
        corrupted(format!(
            "slot {} of node {} holds {:?} where a bucket was expected",
            frame.slot(),
            frame.node_index,
            ptr
        ))
    })
}

fn read_null_value<C: PageRead>(ctx: &C, file_id: FileId) -> Result<Option<Vec<u8>>> {
    if ctx.filled_up_to(file_id)? == 0 {
        return Ok(None);
    }
    ctx.with_page(PageKey::new(file_id, 0), |page| {
        Ok(NullBucket::from_page(page)?.value()?.map(<[u8]>::to_vec))
    })
}

fn add_records(op: &mut AtomicOperation<'_>, files: &IndexFiles, delta: i64) -> Result<()> {
    op.with_page_mut(metadata_key(files), |page| {
        let header = MetadataHeader::from_page_mut(page)?;
        header.set_records(header.records() + delta);
        Ok(())
    })
}

/// Lays out an empty index: 256 buckets of depth 8 behind the root node.
fn init_state(
    op: &mut AtomicOperation<'_>,
    files: &IndexFiles,
    layout: &dyn super::bucket::EntryLayout,
) -> Result<()> {
    op.truncate_file(files.buckets)?;
    for _ in 0..ROOT_BUCKET_COUNT {
        let page_no = op.add_page(files.buckets)?;
        op.with_page_mut(PageKey::new(files.buckets, page_no), |page| {
            BucketPageMut::format(page, layout, MAX_LEVEL_DEPTH)?;
            Ok(())
        })?;
    }

    files.directory.init(op)?;
    let mut root: NodeSlots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
    for (page, slot) in root.iter_mut().enumerate() {
        *slot = DirectoryPointer::Bucket(page as u64);
    }
    let index = files.directory.add_node(op, 0, 0, MAX_LEVEL_DEPTH, &root)?;
    if index != 0 {
        return Err(corrupted(format!("root node was stored at index {}", index)));
    }

    op.with_page_mut(metadata_key(files), |page| {
        let header = MetadataHeader::from_page_mut(page)?;
        header.set_records(0);
        header.set_bucket_free_list(None);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{StringCodec, U64Codec};
    use crate::config::StoreOptions;
    use crate::hash::IdentityHash;
    use tempfile::tempdir;

    type Table = HashTable<U64Codec, StringCodec, IdentityHash>;

    fn manager(dir: &std::path::Path) -> Arc<AtomicOperationsManager> {
        Arc::new(AtomicOperationsManager::open(dir, StoreOptions::default().sync_on_commit(false)).unwrap())
    }

    fn table(mgr: &Arc<AtomicOperationsManager>, options: IndexOptions) -> Table {
        HashTable::create(
            mgr,
            "t",
            EntryCodec::new(U64Codec, StringCodec, None),
            IdentityHash,
            options,
        )
        .unwrap()
    }

    /// Key whose identity hash starts with `prefix` in the top byte.
    fn key(prefix: u8, low: u64) -> u64 {
        ((prefix as u64) << 56) | low
    }

    #[test]
    fn fresh_index_has_one_node_and_no_records() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());

        assert_eq!(t.size().unwrap(), 0);
        assert_eq!(t.node_count().unwrap(), 1);
        assert_eq!(t.get(&1).unwrap(), None);
        assert_eq!(t.first_entry().unwrap(), None);
        assert_eq!(t.last_entry().unwrap(), None);
        t.verify().unwrap();
    }

    #[test]
    fn put_get_replace_remove() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());

        t.put(&7, &"seven".to_string()).unwrap();
        t.put(&7, &"SEVEN".to_string()).unwrap();
        assert_eq!(t.size().unwrap(), 1);
        assert_eq!(t.get(&7).unwrap().as_deref(), Some("SEVEN"));

        t.put(&7, &"a longer seven".to_string()).unwrap();
        assert_eq!(t.size().unwrap(), 1);
        assert_eq!(t.get(&7).unwrap().as_deref(), Some("a longer seven"));

        assert_eq!(t.remove(&7).unwrap().as_deref(), Some("a longer seven"));
        assert_eq!(t.remove(&7).unwrap(), None);
        assert_eq!(t.size().unwrap(), 0);
    }

    #[test]
    fn filling_one_prefix_grows_the_directory() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());
        let value = "v".repeat(200);

        for low in 0..400u64 {
            t.put(&key(0x42, low << 20), &value).unwrap();
        }

        assert_eq!(t.size().unwrap(), 400);
        assert!(t.node_count().unwrap() > 1);
        for low in 0..400u64 {
            assert_eq!(t.get(&key(0x42, low << 20)).unwrap().as_ref(), Some(&value));
        }
        t.verify().unwrap();
    }

    #[test]
    fn removing_everything_folds_the_directory_back() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());
        let value = "v".repeat(200);

        for low in 0..400u64 {
            t.put(&key(0x42, low << 20), &value).unwrap();
        }
        let grown = t.node_count().unwrap();

        for low in 0..400u64 {
            assert!(t.remove(&key(0x42, low << 20)).unwrap().is_some());
        }

        assert_eq!(t.size().unwrap(), 0);
        assert!(t.node_count().unwrap() < grown);
        t.verify().unwrap();

        t.put(&key(0x42, 1), &value).unwrap();
        assert_eq!(t.get(&key(0x42, 1)).unwrap().as_ref(), Some(&value));
    }

    #[test]
    fn split_pages_record_their_origin_and_are_reused_after_merges() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());
        let value = "v".repeat(200);
        let files = *t.files.read();
        let store = mgr.store();

        for low in 0..80u64 {
            t.put(&key(0x42, low << 20), &value).unwrap();
        }
        let first_split = PageKey::new(files.buckets, ROOT_BUCKET_COUNT as u32);
        let origin = store
            .with_page(first_split, |p| {
                Ok(BucketPage::from_page(p, &t.entries)?.split_history(MAX_LEVEL_DEPTH))
            })
            .unwrap();
        assert_eq!(origin, Some(0x42));
        let pages = store.filled_up_to(files.buckets).unwrap();

        for low in 0..80u64 {
            t.remove(&key(0x42, low << 20)).unwrap();
        }
        let free = store
            .with_page(metadata_key(&files), |p| Ok(MetadataHeader::from_page(p)?.bucket_free_list()))
            .unwrap();
        assert!(free.is_some());

        for low in 0..80u64 {
            t.put(&key(0x42, low << 20), &value).unwrap();
        }
        assert!(store.filled_up_to(files.buckets).unwrap() <= pages);
        t.verify().unwrap();
    }

    #[test]
    fn equal_hashes_overflow_a_bucket() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t: HashTable<StringCodec, StringCodec, IdentityHash> = HashTable::create(
            &mgr,
            "same",
            EntryCodec::new(StringCodec, StringCodec, None),
            IdentityHash,
            IndexOptions::default(),
        )
        .unwrap();
        let value = "x".repeat(1000);

        // Equal-length keys share their length prefix, so the identity hash
        // only sees the first four characters.
        let mut overflow = None;
        for i in 0..40 {
            if let Err(e) = t.put(&format!("kkkk{:0>3}", i), &value) {
                overflow = Some(e);
                break;
            }
        }

        let err = overflow.expect("equal hashes must overflow");
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::BucketOverflow { .. })
        ));
        t.verify().unwrap();
    }

    #[test]
    fn oversized_keys_and_entries_are_rejected() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t: HashTable<StringCodec, StringCodec> = HashTable::create(
            &mgr,
            "big",
            EntryCodec::new(StringCodec, StringCodec, None),
            Xxh3Hash,
            IndexOptions::default().max_key_size(16),
        )
        .unwrap();

        let err = t.put(&"k".repeat(32), &String::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::KeyTooLarge { size: 36, max: 16 })
        ));

        let err = t.put(&"k".to_string(), &"v".repeat(MAX_ENTRY_SIZE)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::EntryTooLarge { .. })
        ));
        assert_eq!(t.size().unwrap(), 0);
    }

    #[test]
    fn oversized_lookup_keys_are_simply_absent() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t: HashTable<StringCodec, StringCodec> = HashTable::create(
            &mgr,
            "big",
            EntryCodec::new(StringCodec, StringCodec, None),
            Xxh3Hash,
            IndexOptions::default().max_key_size(16),
        )
        .unwrap();
        t.put(&"a".to_string(), &"1".to_string()).unwrap();
        let long = "k".repeat(64);

        assert_eq!(t.get(&long).unwrap(), None);
        assert!(!t.contains_key(&long).unwrap());
        assert_eq!(t.remove(&long).unwrap(), None);
        t.ceiling_entries(&long).unwrap();
        t.floor_entries(&long).unwrap();
        t.higher_entries(&long, None).unwrap();
        t.lower_entries(&long).unwrap();

        assert!(!t.update(&long, |_| Ok(UpdateAction::Nothing)).unwrap());
        assert!(!t.update(&long, |_| Ok(UpdateAction::Remove)).unwrap());
        let err = t
            .update(&long, |current| {
                assert!(current.is_none());
                Ok(UpdateAction::Change("v".to_string()))
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::KeyTooLarge { size: 68, max: 16 })
        ));

        let err = t
            .validated_put(&long, "v".to_string(), |_, _, v| Ok(Validated::Put(v)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::KeyTooLarge { .. })
        ));

        assert_eq!(t.size().unwrap(), 1);
        assert_eq!(t.get(&"a".to_string()).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn range_queries_stay_inside_one_bucket() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());

        for k in [key(1, 10), key(1, 20), key(1, 30), key(9, 5)] {
            t.put(&k, &k.to_string()).unwrap();
        }

        let keys = |entries: Vec<Entry<u64, String>>| entries.into_iter().map(|e| e.key).collect::<Vec<_>>();

        assert_eq!(keys(t.ceiling_entries(&key(1, 20)).unwrap()), vec![key(1, 20), key(1, 30)]);
        assert_eq!(keys(t.higher_entries(&key(1, 20), None).unwrap()), vec![key(1, 30)]);
        assert_eq!(keys(t.higher_entries(&key(1, 0), Some(2)).unwrap()), vec![key(1, 10), key(1, 20)]);
        assert_eq!(keys(t.higher_entries(&key(1, 30), None).unwrap()), vec![key(9, 5)]);
        assert_eq!(keys(t.floor_entries(&key(1, 20)).unwrap()), vec![key(1, 10), key(1, 20)]);
        assert_eq!(keys(t.lower_entries(&key(1, 10)).unwrap()), Vec::<u64>::new());
        assert_eq!(keys(t.lower_entries(&key(9, 0)).unwrap()), vec![key(1, 10), key(1, 20), key(1, 30)]);
        assert_eq!(keys(t.floor_entries(&u64::MAX).unwrap()), vec![key(9, 5)]);

        assert_eq!(t.first_entry().unwrap().map(|e| e.key), Some(key(1, 10)));
        assert_eq!(t.last_entry().unwrap().map(|e| e.key), Some(key(9, 5)));
    }

    #[test]
    fn null_key_counts_toward_size() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default().null_keys(true));

        assert_eq!(t.get_null().unwrap(), None);
        t.put_null(&"nothing".to_string()).unwrap();
        t.put_null(&"still nothing".to_string()).unwrap();
        t.put(&1, &"one".to_string()).unwrap();

        assert_eq!(t.size().unwrap(), 2);
        assert_eq!(t.get_null().unwrap().as_deref(), Some("still nothing"));
        assert_eq!(t.iter().count(), 1);
        t.verify().unwrap();

        assert_eq!(t.remove_null().unwrap().as_deref(), Some("still nothing"));
        assert_eq!(t.remove_null().unwrap(), None);
        assert_eq!(t.size().unwrap(), 1);
    }

    #[test]
    fn null_key_requires_the_option() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());

        let err = t.put_null(&"x".to_string()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::NullKeyNotSupported { .. })
        ));
    }

    #[test]
    fn validator_can_ignore_or_rewrite() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());

        let stored = t
            .validated_put(&3, "draft".to_string(), |key, current, value| {
                assert_eq!(key, Some(&3));
                assert_eq!(current, None);
                Ok(Validated::Put(value.to_uppercase()))
            })
            .unwrap();
        assert!(stored);
        assert_eq!(t.get(&3).unwrap().as_deref(), Some("DRAFT"));

        let stored = t
            .validated_put(&3, "other".to_string(), |_, current, _| {
                assert_eq!(current.map(String::as_str), Some("DRAFT"));
                Ok(Validated::Ignore)
            })
            .unwrap();
        assert!(!stored);
        assert_eq!(t.get(&3).unwrap().as_deref(), Some("DRAFT"));
    }

    #[test]
    fn update_applies_each_action() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default());

        assert!(t.update(&5, |_| Ok(UpdateAction::Change("five".to_string()))).unwrap());
        assert!(!t.update(&5, |_| Ok(UpdateAction::Nothing)).unwrap());
        assert!(t
            .update(&5, |current| Ok(UpdateAction::Change(format!("{}!", current.unwrap()))))
            .unwrap());
        assert_eq!(t.get(&5).unwrap().as_deref(), Some("five!"));

        assert!(t.update(&5, |_| Ok(UpdateAction::Remove)).unwrap());
        assert!(!t.update(&5, |_| Ok(UpdateAction::Remove)).unwrap());
        assert_eq!(t.size().unwrap(), 0);
    }

    #[test]
    fn clear_resets_the_structure() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let t = table(&mgr, IndexOptions::default().null_keys(true));
        let value = "v".repeat(300);

        for low in 0..200u64 {
            t.put(&key(7, low << 16), &value).unwrap();
        }
        t.put_null(&value).unwrap();

        t.clear().unwrap();

        assert_eq!(t.size().unwrap(), 0);
        assert_eq!(t.node_count().unwrap(), 1);
        assert_eq!(t.get_null().unwrap(), None);
        assert_eq!(t.get(&key(7, 0)).unwrap(), None);
        t.verify().unwrap();
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let _t = table(&mgr, IndexOptions::default());

        let err = HashTable::<U64Codec, StringCodec, IdentityHash>::create(
            &mgr,
            "t",
            EntryCodec::new(U64Codec, StringCodec, None),
            IdentityHash,
            IndexOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::AlreadyExists { .. })
        ));
    }

    mod directory_shape {
        use std::collections::HashSet;

        use proptest::prelude::*;

        use super::*;
        use crate::hashindex::path::PathFrame;
        use crate::hashindex::split::{find_parent_node_start_index, parent_start_index_matches};

        /// Walks every live node from the root, checks how its parent refers
        /// to it and that it could not have been folded. Returns the node count.
        fn check_directory(t: &Table) -> usize {
            let files = *t.files.read();
            let store = t.manager.store();
            let directory = files.directory;
            let local = directory.local_depth(store, 0).unwrap();
            let root = BucketPath::new(PathFrame {
                hash_map_offset: 0,
                item_index: 0,
                node_index: 0,
                node_local_depth: local,
                node_global_depth: local,
            });

            let mut seen = HashSet::from([0u32]);
            let mut stack = vec![root];
            while let Some(path) = stack.pop() {
                let frame = *path.current();
                let slots = directory.node(store, frame.node_index).unwrap();
                if path.parent().is_some() {
                    assert!(
                        !all_maps_contain_same_bucket(&slots, frame.hash_map_size()),
                        "node {} holds one bucket per map and should have been folded",
                        frame.node_index
                    );
                }

                for (slot, ptr) in slots.iter().enumerate() {
                    let DirectoryPointer::Node { index, offset } = *ptr else {
                        continue;
                    };
                    let child_local = directory.local_depth(store, index).unwrap();
                    let mut child = path.clone();
                    child.replace_current(frame.at_slot(slot));
                    child.push(PathFrame {
                        hash_map_offset: offset as usize,
                        item_index: 0,
                        node_index: index,
                        node_local_depth: child_local,
                        node_global_depth: frame.node_global_depth + child_local,
                    });

                    let start = find_parent_node_start_index(&child).unwrap();
                    assert!(
                        parent_start_index_matches(store, &directory, &child, start).unwrap(),
                        "node {} is not referenced from slot {} of node {}",
                        index,
                        start,
                        frame.node_index
                    );
                    assert_eq!(offset as usize, (slot - start) << child_local);

                    if seen.insert(index) {
                        stack.push(child);
                    }
                }
            }
            seen.len()
        }

        fn clustered_key() -> impl Strategy<Value = u64> {
            (0u64..4, 0u64..256).prop_map(|(prefix, x)| (prefix << 56) | (x << 40))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(12))]

            #[test]
            fn nodes_stay_linked_and_foldable_nodes_are_folded(
                ops in prop::collection::vec((any::<bool>(), clustered_key()), 1..300)
            ) {
                let dir = tempdir().unwrap();
                let mgr = manager(dir.path());
                let t = table(&mgr, IndexOptions::default());
                let value = "v".repeat(200);

                for (i, (insert, k)) in ops.iter().enumerate() {
                    if *insert {
                        t.put(k, &value).unwrap();
                    } else {
                        t.remove(k).unwrap();
                    }
                    if i % 25 == 0 {
                        prop_assert_eq!(check_directory(&t), t.node_count().unwrap() as usize);
                    }
                }

                prop_assert_eq!(check_directory(&t), t.node_count().unwrap() as usize);
                t.verify().unwrap();
            }
        }
    }
}
