//! # Bucket Pages
//!
//! A bucket is one page of the bucket file. It keeps its entries sorted by
//! `(hash, key)` behind an offset table, with entry bodies packed from the end
//! of the page toward the table.
//!
//! ## Page Layout
//!
//! ```text
//! +--------------------------------------------------------------+
//! | Header (529 bytes)                                           |
//! |   free_pointer i32 | depth u8 | size i32                     |
//! |   split_history [i64; 64] | next_removed_bucket i64          |
//! +--------------------------------------------------------------+
//! | Offset table: size x i32, ascending (hash, key) order ->     |
//! +--------------------------------------------------------------+
//! |                     free space                               |
//! +--------------------------------------------------------------+
//! | <- entry bodies, newest at free_pointer                      |
//! |    [hash: i64 LE][raw key][raw value]                        |
//! +--------------------------------------------------------------+ PAGE_SIZE
//! ```
//!
//! Offsets are absolute page positions. Raw keys and values carry their own
//! lengths, so stepping over an entry needs the index's [`EntryLayout`] but
//! never a full decode.
//!
//! ## Depth
//!
//! `depth` is the number of leading hash bits shared by every entry of the
//! bucket. A bucket of depth `d` is referenced by `2^(global - d)` slots of the
//! node whose global depth is `global`.
//!
//! ## Split History and Free List
//!
//! `split_history[d]` records the page the bucket split from when it moved to
//! depth `d + 1`. `next_removed_bucket` links pages freed by merges into the
//! free list whose head lives in the index metadata; -1 terminates it.

use std::cmp::Ordering;

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, I64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    BUCKET_CAPACITY, BUCKET_HEADER_SIZE, BUCKET_OFFSET_SIZE, ENTRY_HASH_SIZE, HASH_CODE_BITS,
    PAGE_SIZE,
};
use crate::error::HashIndexError;

/// Tells a bucket how long the raw key and raw value at a position are.
pub trait EntryLayout {
    fn key_len(&self, bytes: &[u8]) -> Result<usize>;

    fn value_len(&self, bytes: &[u8]) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

impl SearchResult {
    pub fn index(self) -> usize {
        match self {
            SearchResult::Found(i) | SearchResult::NotFound(i) => i,
        }
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BucketHeader {
    free_pointer: I32,
    depth: u8,
    size: I32,
    split_history: [I64; HASH_CODE_BITS as usize],
    next_removed_bucket: I64,
}

const _: () = assert!(std::mem::size_of::<BucketHeader>() == BUCKET_HEADER_SIZE);

impl BucketHeader {
    zerocopy_accessors! {
        free_pointer: i32,
        size: i32,
        next_removed_bucket: i64,
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: u8) {
        self.depth = depth;
    }
}

/// An entry borrowed from a bucket page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEntryRef<'a> {
    pub hash: u64,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl RawEntryRef<'_> {
    pub fn to_owned_entry(&self) -> RawEntry {
        RawEntry {
            hash: self.hash,
            key: self.key.to_vec(),
            value: self.value.to_vec(),
        }
    }
}

/// An entry copied out of a bucket page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub hash: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawEntry {
    pub fn body_size(&self) -> usize {
        ENTRY_HASH_SIZE + self.key.len() + self.value.len()
    }
}

fn corrupted(message: String) -> eyre::Report {
    HashIndexError::Corrupted(message).into()
}

fn read_i32(bytes: &[u8], pos: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[pos..pos + 4]);
    i32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[pos..pos + 8]);
    u64::from_le_bytes(buf)
}

fn check_header(header: &BucketHeader) -> Result<()> {
    let size = header.size();
    let free = header.free_pointer();
    let table_end = BUCKET_HEADER_SIZE as i64 + size as i64 * BUCKET_OFFSET_SIZE as i64;

    if size < 0 || (free as i64) < table_end || free as usize > PAGE_SIZE {
        return Err(corrupted(format!(
            "bucket header out of range: size={} free_pointer={}",
            size, free
        )));
    }
    if header.depth() > HASH_CODE_BITS {
        return Err(corrupted(format!("bucket depth {} exceeds 64", header.depth())));
    }
    Ok(())
}

pub struct BucketPage<'a> {
    header: &'a BucketHeader,
    body: &'a [u8],
    layout: &'a dyn EntryLayout,
}

impl<'a> BucketPage<'a> {
    pub fn from_page(data: &'a [u8], layout: &'a dyn EntryLayout) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let (header, body) = BucketHeader::ref_from_prefix(data)
            .map_err(|e| eyre::eyre!("failed to parse BucketHeader: {:?}", e))?;
        check_header(header)?;

        Ok(Self {
            header,
            body,
            layout,
        })
    }

    pub fn depth(&self) -> u8 {
        self.header.depth()
    }

    pub fn size(&self) -> usize {
        self.header.size() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn free_pointer(&self) -> usize {
        self.header.free_pointer() as usize
    }

    /// Bytes used by entry bodies and the offset table.
    pub fn content_size(&self) -> usize {
        (PAGE_SIZE - self.free_pointer()) + self.size() * BUCKET_OFFSET_SIZE
    }

    pub fn free_space(&self) -> usize {
        BUCKET_CAPACITY - self.content_size()
    }

    /// Page this bucket split from when it went from depth `depth` to `depth + 1`.
    pub fn split_history(&self, depth: u8) -> Option<u32> {
        let raw = self.header.split_history.get(depth as usize)?.get();
        (raw >= 0).then_some(raw as u32)
    }

    pub fn next_removed_bucket(&self) -> Option<u32> {
        let raw = self.header.next_removed_bucket();
        (raw >= 0).then_some(raw as u32)
    }

    fn offset_at(&self, index: usize) -> Result<usize> {
        ensure!(
            index < self.size(),
            "entry index {} out of bounds (size={})",
            index,
            self.size()
        );
        let raw = read_i32(self.body, index * BUCKET_OFFSET_SIZE);
        if raw < self.header.free_pointer() || raw as usize >= PAGE_SIZE {
            return Err(corrupted(format!(
                "entry offset {} outside the body area [{}, {})",
                raw,
                self.free_pointer(),
                PAGE_SIZE
            )));
        }
        Ok(raw as usize)
    }

    pub fn entry_at(&self, index: usize) -> Result<RawEntryRef<'a>> {
        let pos = self.offset_at(index)? - BUCKET_HEADER_SIZE;
        let body: &'a [u8] = self.body;

        ensure!(
            pos + ENTRY_HASH_SIZE <= body.len(),
            "entry {} truncated before its hash",
            index
        );
        let hash = read_u64(body, pos);
        let key_start = pos + ENTRY_HASH_SIZE;
        let key_len = self.layout.key_len(&body[key_start..])?;
        let value_start = key_start + key_len;
        let value_len = self.layout.value_len(&body[value_start..])?;

        Ok(RawEntryRef {
            hash,
            key: &body[key_start..value_start],
            value: &body[value_start..value_start + value_len],
        })
    }

    pub fn hash_at(&self, index: usize) -> Result<u64> {
        let pos = self.offset_at(index)? - BUCKET_HEADER_SIZE;
        ensure!(
            pos + ENTRY_HASH_SIZE <= self.body.len(),
            "entry {} truncated before its hash",
            index
        );
        Ok(read_u64(self.body, pos))
    }

    pub fn entry_size_at(&self, index: usize) -> Result<usize> {
        let entry = self.entry_at(index)?;
        Ok(ENTRY_HASH_SIZE + entry.key.len() + entry.value.len())
    }

    /// Binary search by hash, then by key through `cmp`. Keys are only
    /// decoded for entries whose hash matches.
    ///
    /// `cmp` receives a stored raw key and orders it against the key searched for.
    pub fn find(
        &self,
        hash: u64,
        mut cmp: impl FnMut(&[u8]) -> Result<Ordering>,
    ) -> Result<SearchResult> {
        let mut lo = 0;
        let mut hi = self.size();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ord = match self.hash_at(mid)?.cmp(&hash) {
                Ordering::Equal => cmp(self.entry_at(mid)?.key)?,
                other => other,
            };
            match ord {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
            }
        }

        Ok(SearchResult::NotFound(lo))
    }

    pub fn raw_entries(&self) -> impl Iterator<Item = Result<RawEntryRef<'a>>> + '_ {
        (0..self.size()).map(move |i| self.entry_at(i))
    }

    pub fn to_owned_entries(&self) -> Result<Vec<RawEntry>> {
        self.raw_entries().map(|e| e.map(|e| e.to_owned_entry())).collect()
    }
}

pub struct BucketPageMut<'a> {
    header: &'a mut BucketHeader,
    body: &'a mut [u8],
    layout: &'a dyn EntryLayout,
}

impl<'a> BucketPageMut<'a> {
    pub fn from_page(data: &'a mut [u8], layout: &'a dyn EntryLayout) -> Result<Self> {
        BucketPage::from_page(data, layout)?;
        Self::split(data, layout)
    }

    /// Formats a fresh page as an empty bucket of `depth` with no history.
    pub fn format(data: &'a mut [u8], layout: &'a dyn EntryLayout, depth: u8) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        data[..BUCKET_HEADER_SIZE].fill(0);

        let mut page = Self::split(data, layout)?;
        for slot in page.header.split_history.iter_mut() {
            *slot = I64::new(-1);
        }
        page.header.set_next_removed_bucket(-1);
        page.reset(depth);
        Ok(page)
    }

    fn split(data: &'a mut [u8], layout: &'a dyn EntryLayout) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let (header, body) = BucketHeader::mut_from_prefix(data)
            .map_err(|e| eyre::eyre!("failed to parse BucketHeader: {:?}", e))?;
        Ok(Self {
            header,
            body,
            layout,
        })
    }

    pub fn as_ref(&self) -> BucketPage<'_> {
        BucketPage {
            header: self.header,
            body: self.body,
            layout: self.layout,
        }
    }

    /// Empties the bucket and sets its depth, keeping the split history.
    pub fn reset(&mut self, depth: u8) {
        self.header.set_free_pointer(PAGE_SIZE as i32);
        self.header.set_depth(depth);
        self.header.set_size(0);
    }

    pub fn set_depth(&mut self, depth: u8) {
        self.header.set_depth(depth);
    }

    pub fn set_split_history(&mut self, depth: u8, page: u32) {
        if let Some(slot) = self.header.split_history.get_mut(depth as usize) {
            *slot = I64::new(page as i64);
        }
    }

    pub fn set_next_removed_bucket(&mut self, next: Option<u32>) {
        self.header
            .set_next_removed_bucket(next.map_or(-1, |page| page as i64));
    }

    fn write_offset(&mut self, index: usize, offset: usize) {
        let pos = index * BUCKET_OFFSET_SIZE;
        self.body[pos..pos + BUCKET_OFFSET_SIZE].copy_from_slice(&(offset as i32).to_le_bytes());
    }

    /// Inserts an entry at `index` of the offset table.
    ///
    /// Returns false, leaving the page untouched, when the entry does not fit.
    pub fn insert_entry(&mut self, index: usize, hash: u64, key: &[u8], value: &[u8]) -> Result<bool> {
        let size = self.as_ref().size();
        ensure!(
            index <= size,
            "insert index {} out of bounds (size={})",
            index,
            size
        );

        let entry_size = ENTRY_HASH_SIZE + key.len() + value.len();
        let free = self.as_ref().free_pointer();
        let table_end = BUCKET_HEADER_SIZE + (size + 1) * BUCKET_OFFSET_SIZE;
        if free < entry_size || free - entry_size < table_end {
            return Ok(false);
        }

        let new_free = free - entry_size;
        let pos = new_free - BUCKET_HEADER_SIZE;
        self.body[pos..pos + ENTRY_HASH_SIZE].copy_from_slice(&hash.to_le_bytes());
        let key_start = pos + ENTRY_HASH_SIZE;
        self.body[key_start..key_start + key.len()].copy_from_slice(key);
        let value_start = key_start + key.len();
        self.body[value_start..value_start + value.len()].copy_from_slice(value);

        let table_from = index * BUCKET_OFFSET_SIZE;
        let table_to = size * BUCKET_OFFSET_SIZE;
        self.body
            .copy_within(table_from..table_to, table_from + BUCKET_OFFSET_SIZE);
        self.write_offset(index, new_free);

        self.header.set_size(size as i32 + 1);
        self.header.set_free_pointer(new_free as i32);
        Ok(true)
    }

    /// Appends an entry that sorts after every stored entry.
    pub fn append_entry(&mut self, hash: u64, key: &[u8], value: &[u8]) -> Result<bool> {
        let size = self.as_ref().size();
        self.insert_entry(size, hash, key, value)
    }

    /// Removes the entry at `index` and compacts the body area.
    pub fn delete_entry(&mut self, index: usize) -> Result<()> {
        let (size, free, pos, entry_size) = {
            let page = self.as_ref();
            let pos = page.offset_at(index)?;
            (page.size(), page.free_pointer(), pos, page.entry_size_at(index)?)
        };

        let from = free - BUCKET_HEADER_SIZE;
        let to = pos - BUCKET_HEADER_SIZE;
        self.body.copy_within(from..to, from + entry_size);

        for j in 0..size {
            let offset = read_i32(self.body, j * BUCKET_OFFSET_SIZE) as usize;
            if offset < pos {
                self.write_offset(j, offset + entry_size);
            }
        }

        let table_from = (index + 1) * BUCKET_OFFSET_SIZE;
        let table_to = size * BUCKET_OFFSET_SIZE;
        self.body
            .copy_within(table_from..table_to, index * BUCKET_OFFSET_SIZE);

        self.header.set_size(size as i32 - 1);
        self.header.set_free_pointer((free + entry_size) as i32);
        Ok(())
    }

    /// Overwrites the value at `index` with one of the same length.
    pub fn update_value(&mut self, index: usize, value: &[u8]) -> Result<()> {
        let (value_pos, old_len) = {
            let page = self.as_ref();
            let pos = page.offset_at(index)? - BUCKET_HEADER_SIZE;
            let entry = page.entry_at(index)?;
            (pos + ENTRY_HASH_SIZE + entry.key.len(), entry.value.len())
        };
        ensure!(
            old_len == value.len(),
            "in-place update needs equal value lengths: {} != {}",
            old_len,
            value.len()
        );
        self.body[value_pos..value_pos + value.len()].copy_from_slice(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BUCKET_CAPACITY;

    /// Keys and values prefixed with a one-byte length.
    struct ByteLen;

    impl EntryLayout for ByteLen {
        fn key_len(&self, bytes: &[u8]) -> Result<usize> {
            Ok(1 + bytes[0] as usize)
        }

        fn value_len(&self, bytes: &[u8]) -> Result<usize> {
            Ok(1 + bytes[0] as usize)
        }
    }

    fn item(s: &str) -> Vec<u8> {
        let mut v = vec![s.len() as u8];
        v.extend_from_slice(s.as_bytes());
        v
    }

    fn by_key(target: &[u8]) -> impl FnMut(&[u8]) -> Result<Ordering> + '_ {
        move |stored| Ok(stored.cmp(target))
    }

    fn make_page(depth: u8) -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        BucketPageMut::format(&mut data, &ByteLen, depth).unwrap();
        data
    }

    #[test]
    fn formatted_bucket_is_empty() {
        let data = make_page(8);
        let page = BucketPage::from_page(&data, &ByteLen).unwrap();

        assert_eq!(page.depth(), 8);
        assert_eq!(page.size(), 0);
        assert_eq!(page.free_pointer(), PAGE_SIZE);
        assert_eq!(page.content_size(), 0);
        assert_eq!(page.split_history(8), None);
        assert_eq!(page.next_removed_bucket(), None);
    }

    #[test]
    fn zeroed_page_is_rejected() {
        let data = vec![0u8; PAGE_SIZE];
        let err = BucketPage::from_page(&data, &ByteLen).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<HashIndexError>(),
            Some(HashIndexError::Corrupted(_))
        ));
    }

    #[test]
    fn insert_keeps_offset_table_order() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();

        assert!(page.insert_entry(0, 20, &item("b"), &item("2")).unwrap());
        assert!(page.insert_entry(0, 10, &item("a"), &item("1")).unwrap());
        assert!(page.insert_entry(2, 30, &item("c"), &item("3")).unwrap());

        let view = page.as_ref();
        let hashes: Vec<u64> = view.raw_entries().map(|e| e.unwrap().hash).collect();
        assert_eq!(hashes, vec![10, 20, 30]);
        assert_eq!(view.entry_at(1).unwrap().key, item("b").as_slice());
        assert_eq!(view.entry_at(2).unwrap().value, item("3").as_slice());
    }

    #[test]
    fn find_orders_by_hash_then_key() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();
        page.append_entry(5, &item("a"), &item("x")).unwrap();
        page.append_entry(7, &item("a"), &item("x")).unwrap();
        page.append_entry(7, &item("c"), &item("x")).unwrap();
        page.append_entry(9, &item("a"), &item("x")).unwrap();

        let view = page.as_ref();
        assert_eq!(view.find(7, by_key(&item("c"))).unwrap(), SearchResult::Found(2));
        assert_eq!(view.find(7, by_key(&item("b"))).unwrap(), SearchResult::NotFound(2));
        assert_eq!(view.find(1, by_key(&item("a"))).unwrap(), SearchResult::NotFound(0));
        assert_eq!(view.find(10, by_key(&item("a"))).unwrap(), SearchResult::NotFound(4));
    }

    #[test]
    fn delete_compacts_bodies() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();
        page.append_entry(1, &item("one"), &item("1")).unwrap();
        page.append_entry(2, &item("two"), &item("22")).unwrap();
        page.append_entry(3, &item("three"), &item("333")).unwrap();
        let before = page.as_ref().free_pointer();

        page.delete_entry(1).unwrap();

        let view = page.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.free_pointer(), before + 8 + 4 + 3);
        assert_eq!(view.entry_at(0).unwrap().key, item("one").as_slice());
        assert_eq!(view.entry_at(1).unwrap().key, item("three").as_slice());
        assert_eq!(view.entry_at(1).unwrap().value, item("333").as_slice());
    }

    #[test]
    fn delete_then_insert_reuses_space() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();
        page.append_entry(1, &item("k"), &item("v")).unwrap();
        page.delete_entry(0).unwrap();

        assert_eq!(page.as_ref().content_size(), 0);
        assert!(page.append_entry(2, &item("k2"), &item("v2")).unwrap());
    }

    #[test]
    fn full_bucket_refuses_insert() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();
        let value = item(&"v".repeat(200));

        let mut hash = 0;
        while page.append_entry(hash, &item("key"), &value).unwrap() {
            hash += 1;
        }

        let view = page.as_ref();
        assert!(view.content_size() <= BUCKET_CAPACITY);
        assert_eq!(view.size() as u64, hash);
        let last = view.entry_at(view.size() - 1).unwrap();
        assert_eq!(last.value, value.as_slice());
    }

    #[test]
    fn update_value_requires_same_length() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();
        page.append_entry(1, &item("k"), &item("aa")).unwrap();

        page.update_value(0, &item("bb")).unwrap();
        assert_eq!(page.as_ref().entry_at(0).unwrap().value, item("bb").as_slice());

        assert!(page.update_value(0, &item("ccc")).is_err());
    }

    #[test]
    fn reset_keeps_split_history() {
        let mut data = make_page(8);
        let mut page = BucketPageMut::from_page(&mut data, &ByteLen).unwrap();
        page.append_entry(1, &item("k"), &item("v")).unwrap();
        page.set_split_history(8, 17);
        page.set_next_removed_bucket(Some(3));

        page.reset(9);

        let view = page.as_ref();
        assert_eq!(view.depth(), 9);
        assert!(view.is_empty());
        assert_eq!(view.split_history(8), Some(17));
        assert_eq!(view.next_removed_bucket(), Some(3));
    }
}
