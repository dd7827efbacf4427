//! # Splits and Merges
//!
//! Structural changes of the directory and the bucket file. Every function
//! here runs inside the atomic operation of the put or remove that needs it.
//!
//! ## Growth
//!
//! A full bucket of depth `d` splits into itself and a new page, both at
//! depth `d + 1`. How the directory absorbs the split depends on the node
//! holding the bucket's slot:
//!
//! ```text
//! d + 1 <= global depth of the node   rewrite the bucket's slot range:
//!                                     lower half -> old page, upper -> new
//!
//! local depth < 8                     split the node: each half of its
//!                                     slots doubles into a node of local
//!                                     depth + 1, the parent re-points
//!
//! local depth == 8                    add a child node below the bucket's
//!                                     slot and the slots sharing its range
//! ```
//!
//! ## Shrink
//!
//! After a removal, a bucket deeper than 8 whose content fell to
//! `MERGE_THRESHOLD` merges with its buddy (the bucket whose prefix differs
//! in the last bit) when the buddy has the same depth and both fit one page.
//! The merged entries land in the lower page at depth `d - 1`, the upper page
//! goes onto the bucket free list in the metadata page.
//!
//! A child node whose hash maps each hold a single bucket folds back into its
//! parent.

use std::ops::Range;

use eyre::Result;
use tracing::debug;

use super::bucket::{BucketPage, BucketPageMut, EntryLayout, RawEntry};
use super::directory::{Directory, NodeSlots};
use super::metadata::MetadataHeader;
use super::path::{BucketPath, PathFrame};
use super::pointer::DirectoryPointer;
use super::table::IndexFiles;
use super::traverse::bucket_path;
use crate::config::{
    HASH_CODE_BITS, MAX_LEVEL_DEPTH, MAX_LEVEL_SIZE, MERGE_THRESHOLD,
};
use crate::error::HashIndexError;
use crate::storage::{AtomicOperation, PageKey, PageRead};

const HALF: usize = MAX_LEVEL_SIZE / 2;

fn corrupted(message: impl Into<String>) -> eyre::Report {
    HashIndexError::corrupted(message).into()
}

/// Outcome of a bucket split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSplit {
    pub updated: DirectoryPointer,
    pub new: DirectoryPointer,
    pub new_depth: u8,
}

fn prefix(hash: u64, depth: u8) -> u64 {
    if depth == 0 {
        0
    } else {
        hash >> (HASH_CODE_BITS - depth)
    }
}

/// Checks that all entries share their top `depth` hash bits.
pub fn check_bucket_depth(entries: &[RawEntry], depth: u8) -> Result<()> {
    let Some(first) = entries.first() else {
        return Ok(());
    };
    let expected = prefix(first.hash, depth);
    match entries.iter().find(|e| prefix(e.hash, depth) != expected) {
        Some(stray) => Err(corrupted(format!(
            "hash {:#018x} does not share the {}-bit prefix of hash {:#018x}",
            stray.hash, depth, first.hash
        ))),
        None => Ok(()),
    }
}

fn metadata_key(files: &IndexFiles) -> PageKey {
    PageKey::new(files.metadata, 0)
}

/// Takes a page from the bucket free list, or appends one.
fn allocate_bucket(
    op: &mut AtomicOperation<'_>,
    files: &IndexFiles,
    layout: &dyn EntryLayout,
) -> Result<u32> {
    let head = op.with_page(metadata_key(files), |page| {
        Ok(MetadataHeader::from_page(page)?.bucket_free_list())
    })?;

    let Some(page_no) = head else {
        return op.add_page(files.buckets);
    };

    let next = op.with_page(PageKey::new(files.buckets, page_no), |page| {
        Ok(BucketPage::from_page(page, layout)?.next_removed_bucket())
    })?;
    op.with_page_mut(metadata_key(files), |page| {
        MetadataHeader::from_page_mut(page)?.set_bucket_free_list(next);
        Ok(())
    })?;
    debug!(page = page_no, "reused bucket page from the free list");
    Ok(page_no)
}

fn release_bucket(
    op: &mut AtomicOperation<'_>,
    files: &IndexFiles,
    layout: &dyn EntryLayout,
    page_no: u32,
) -> Result<()> {
    let head = op.with_page(metadata_key(files), |page| {
        Ok(MetadataHeader::from_page(page)?.bucket_free_list())
    })?;
    op.with_page_mut(PageKey::new(files.buckets, page_no), |page| {
        let mut bucket = BucketPageMut::from_page(page, layout)?;
        let depth = bucket.as_ref().depth();
        bucket.reset(depth);
        bucket.set_next_removed_bucket(head);
        Ok(())
    })?;
    op.with_page_mut(metadata_key(files), |page| {
        MetadataHeader::from_page_mut(page)?.set_bucket_free_list(Some(page_no));
        Ok(())
    })
}

fn read_entries<C: PageRead>(
    ctx: &C,
    files: &IndexFiles,
    layout: &dyn EntryLayout,
    page_no: u32,
) -> Result<(u8, Vec<RawEntry>)> {
    ctx.with_page(PageKey::new(files.buckets, page_no), |page| {
        let bucket = BucketPage::from_page(page, layout)?;
        Ok((bucket.depth(), bucket.to_owned_entries()?))
    })
}

fn write_entries(bucket: &mut BucketPageMut<'_>, entries: &[RawEntry]) -> Result<()> {
    for entry in entries {
        if !bucket.append_entry(entry.hash, &entry.key, &entry.value)? {
            return Err(corrupted("redistributed entries do not fit their bucket"));
        }
    }
    Ok(())
}

/// Splits bucket `page_no` by the next hash bit.
pub(crate) fn split_bucket(
    op: &mut AtomicOperation<'_>,
    files: &IndexFiles,
    layout: &dyn EntryLayout,
    page_no: u32,
) -> Result<BucketSplit> {
    let (depth, entries) = read_entries(&*op, files, layout, page_no)?;
    if depth >= HASH_CODE_BITS {
        let hash = entries.first().map_or(0, |e| e.hash);
        return Err(HashIndexError::BucketOverflow { hash }.into());
    }
    check_bucket_depth(&entries, depth)?;

    let new_depth = depth + 1;
    let (stay, moved): (Vec<RawEntry>, Vec<RawEntry>) = entries
        .into_iter()
        .partition(|e| prefix(e.hash, new_depth) & 1 == 0);
    check_bucket_depth(&stay, new_depth)?;
    check_bucket_depth(&moved, new_depth)?;

    let new_page = allocate_bucket(op, files, layout)?;
    op.with_page_mut(PageKey::new(files.buckets, new_page), |page| {
        let mut bucket = BucketPageMut::format(page, layout, new_depth)?;
        bucket.set_split_history(depth, page_no);
        write_entries(&mut bucket, &moved)
    })?;
    op.with_page_mut(PageKey::new(files.buckets, page_no), |page| {
        let mut bucket = BucketPageMut::from_page(page, layout)?;
        bucket.reset(new_depth);
        write_entries(&mut bucket, &stay)
    })?;

    debug!(
        page = page_no,
        new_page,
        new_depth,
        kept = stay.len(),
        moved = moved.len(),
        "split bucket"
    );

    Ok(BucketSplit {
        updated: DirectoryPointer::Bucket(page_no as u64),
        new: DirectoryPointer::Bucket(new_page as u64),
        new_depth,
    })
}

/// Splits the bucket `path` names and makes the directory reflect it.
pub(crate) fn split_and_grow(
    op: &mut AtomicOperation<'_>,
    files: &IndexFiles,
    layout: &dyn EntryLayout,
    path: &BucketPath,
    page_no: u32,
) -> Result<()> {
    let split = split_bucket(op, files, layout, page_no)?;
    let frame = *path.current();
    let directory = &files.directory;

    if split.new_depth <= frame.node_global_depth {
        update_node_after_bucket_split(op, directory, path, &split)
    } else if frame.node_local_depth < MAX_LEVEL_DEPTH {
        split_node_and_update(op, directory, path, &split)
    } else {
        add_new_level_node(op, directory, path, &split)
    }
}

/// Points every slot under (`node`, `slot`) at `ptr`, descending into child nodes.
pub fn update_bucket(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    node: u32,
    slot: usize,
    ptr: DirectoryPointer,
) -> Result<()> {
    match directory.pointer(&*op, node, slot)? {
        DirectoryPointer::Node { index, offset } => {
            let local = directory.local_depth(&*op, index)?;
            for i in 0..1usize << local {
                update_bucket(op, directory, index, offset as usize + i, ptr)?;
            }
            Ok(())
        }
        _ => directory.set_pointer(op, node, slot, ptr),
    }
}

/// Rewrites the slots of the split bucket's old prefix: lower half to the
/// updated page, upper half to the new one.
pub fn update_node_after_bucket_split(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    path: &BucketPath,
    split: &BucketSplit,
) -> Result<()> {
    let range = path
        .prefix_range(split.new_depth - 1)
        .ok_or_else(|| corrupted("split bucket is deeper than its directory node"))?;
    let node = path.frame(range.level).node_index;
    let half = range.len / 2;

    for slot in range.first_slot..range.first_slot + half {
        update_bucket(op, directory, node, slot, split.updated)?;
    }
    for slot in range.first_slot + half..range.first_slot + range.len {
        update_bucket(op, directory, node, slot, split.new)?;
    }
    Ok(())
}

/// True when every hash map of `slots` holds a single bucket.
pub fn all_maps_contain_same_bucket(slots: &NodeSlots, map_size: usize) -> bool {
    slots
        .chunks(map_size)
        .all(|map| !map[0].is_node() && map.iter().all(|p| *p == map[0]))
}

/// First parent slot owned by the node `path` ends in.
pub fn find_parent_node_start_index(path: &BucketPath) -> Result<usize> {
    let parent = path
        .parent()
        .ok_or_else(|| corrupted("directory node below the root has no parent"))?;
    let pointers = 1usize << (MAX_LEVEL_DEPTH - path.current().node_local_depth);
    Ok(parent.slot() / pointers * pointers)
}

pub(crate) fn parent_start_index_matches<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    path: &BucketPath,
    start: usize,
) -> Result<bool> {
    let node_index = path.current().node_index;
    let Some(parent) = path.parent() else {
        return Ok(false);
    };
    let slots = directory.node(ctx, parent.node_index)?;
    let first = slots
        .iter()
        .position(|p| matches!(p, DirectoryPointer::Node { index, .. } if *index == node_index));
    Ok(first == Some(start))
}

fn split_node(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    frame: &PathFrame,
) -> Result<(NodeSlots, bool, bool)> {
    let node = directory.node(&*op, frame.node_index)?;
    let map_size = 1usize << (frame.node_local_depth + 1);

    let mut updated: NodeSlots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
    let mut new_node: NodeSlots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
    for i in 0..HALF {
        updated[2 * i] = node[i];
        updated[2 * i + 1] = node[i];
        new_node[2 * i] = node[HALF + i];
        new_node[2 * i + 1] = node[HALF + i];
    }

    let all_left_equal = all_maps_contain_same_bucket(&updated, map_size);
    let all_right_equal = all_maps_contain_same_bucket(&new_node, map_size);

    directory.set_node(op, frame.node_index, &updated)?;
    directory.set_local_depth(op, frame.node_index, frame.node_local_depth + 1)?;

    Ok((new_node, all_left_equal, all_right_equal))
}

fn split_node_and_update(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    path: &BucketPath,
    split: &BucketSplit,
) -> Result<()> {
    let frame = *path.current();
    if path.parent().is_none() {
        return Err(corrupted(format!(
            "node {} of local depth {} has no parent",
            frame.node_index, frame.node_local_depth
        )));
    }

    let (new_node, all_left_equal, all_right_equal) = split_node(op, directory, &frame)?;
    if all_left_equal && all_right_equal {
        return Err(corrupted(format!(
            "split of node {} left no hash map holding the split bucket",
            frame.node_index
        )));
    }

    let local = frame.node_local_depth + 1;
    let new_node_index = if !all_right_equal || frame.slot() >= HALF {
        Some(directory.add_node(op, 0, 0, local, &new_node)?)
    } else {
        None
    };

    let doubled_offset = frame.hash_map_offset * 2;
    let (node_index, hash_map_offset, left_equal, right_equal) = if doubled_offset < MAX_LEVEL_SIZE {
        (frame.node_index, doubled_offset, false, all_right_equal)
    } else {
        let index = new_node_index
            .ok_or_else(|| corrupted("split bucket moved to a node that was not allocated"))?;
        (index, doubled_offset - MAX_LEVEL_SIZE, all_left_equal, false)
    };

    let mut updated_path = path.clone();
    updated_path.replace_current(PathFrame {
        hash_map_offset,
        item_index: frame.item_index * 2,
        node_index,
        node_local_depth: local,
        node_global_depth: frame.node_global_depth + 1,
    });
    update_node_after_bucket_split(op, directory, &updated_path, split)?;

    update_nodes_after_split(
        op,
        directory,
        path,
        &new_node,
        left_equal,
        right_equal,
        new_node_index,
    )?;

    if left_equal {
        directory.delete_node(op, frame.node_index)?;
    }

    debug!(
        node = frame.node_index,
        new_node = ?new_node_index,
        local_depth = local,
        folded_left = left_equal,
        folded_right = right_equal,
        "split directory node"
    );
    Ok(())
}

/// Re-points the parent slots of a node that was split in two halves.
///
/// A half whose maps each hold one bucket is folded into the parent instead
/// of being referenced.
fn update_nodes_after_split(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    path: &BucketPath,
    new_node: &NodeSlots,
    left_equal: bool,
    right_equal: bool,
    new_node_index: Option<u32>,
) -> Result<()> {
    let frame = *path.current();
    let parent = *path
        .parent()
        .ok_or_else(|| corrupted("directory node below the root has no parent"))?;
    let start = find_parent_node_start_index(path)?;
    if cfg!(debug_assertions) && !parent_start_index_matches(&*op, directory, path, start)? {
        return Err(corrupted(format!(
            "parent {} does not reference node {} from slot {}",
            parent.node_index, frame.node_index, start
        )));
    }

    let local = frame.node_local_depth + 1;
    let map_size = 1usize << local;
    let pointers = 1usize << (MAX_LEVEL_DEPTH - local);

    for i in 0..pointers {
        let ptr = if left_equal {
            directory.pointer(&*op, frame.node_index, i * map_size)?
        } else {
            DirectoryPointer::node(frame.node_index, i * map_size)
        };
        directory.set_pointer(op, parent.node_index, start + i, ptr)?;
    }

    for i in 0..pointers {
        let ptr = if right_equal {
            new_node[i * map_size]
        } else {
            let index = new_node_index
                .ok_or_else(|| corrupted("right half of a split node was not allocated"))?;
            DirectoryPointer::node(index, i * map_size)
        };
        directory.set_pointer(op, parent.node_index, start + pointers + i, ptr)?;
    }

    update_max_child_depth(op, directory, &parent, local)
}

fn update_max_child_depth(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    parent: &PathFrame,
    child_depth: u8,
) -> Result<()> {
    let node = parent.node_index;
    if parent.slot() < HALF {
        if child_depth > directory.max_left_child_depth(&*op, node)? {
            directory.set_max_left_child_depth(op, node, child_depth)?;
        }
    } else if child_depth > directory.max_right_child_depth(&*op, node)? {
        directory.set_max_right_child_depth(op, node, child_depth)?;
    }
    Ok(())
}

/// Largest local depth among the child nodes referenced from `slots`.
pub fn max_level_depth<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    node: u32,
    slots: Range<usize>,
) -> Result<u8> {
    let pointers = directory.node(ctx, node)?;
    let mut current = None;
    let mut max_depth = 0;

    for ptr in &pointers[slots] {
        if let DirectoryPointer::Node { index, .. } = *ptr {
            if current == Some(index) {
                continue;
            }
            current = Some(index);
            max_depth = max_depth.max(directory.local_depth(ctx, index)?);
        }
    }
    Ok(max_depth)
}

/// Hangs a new child node below a full root-level slot range.
fn add_new_level_node(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    path: &BucketPath,
    split: &BucketSplit,
) -> Result<()> {
    let frame = *path.current();
    let item = frame.slot();
    let (half, cached) = if item < HALF {
        (0..HALF, directory.max_left_child_depth(&*op, frame.node_index)?)
    } else {
        (HALF..MAX_LEVEL_SIZE, directory.max_right_child_depth(&*op, frame.node_index)?)
    };

    let max_depth = max_level_depth(&*op, directory, frame.node_index, half)?;
    if max_depth != cached {
        debug!(
            node = frame.node_index,
            cached,
            actual = max_depth,
            "stale max child depth"
        );
    }

    let new_depth = max_depth.max(1);
    let interval = 1usize << (MAX_LEVEL_DEPTH - new_depth);
    let start = item / interval * interval;
    let map_size = 1usize << new_depth;

    let mut slots: NodeSlots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
    for i in 0..interval {
        let slot = start + i;
        let map = &mut slots[i * map_size..(i + 1) * map_size];
        if slot == item {
            let (lower, upper) = map.split_at_mut(map_size / 2);
            lower.fill(split.updated);
            upper.fill(split.new);
        } else {
            let ptr = directory.pointer(&*op, frame.node_index, slot)?;
            if ptr.is_node() {
                return Err(corrupted(format!(
                    "slot {} of node {} already references a child node",
                    slot, frame.node_index
                )));
            }
            map.fill(ptr);
        }
    }

    let new_index = directory.add_node(op, 0, 0, new_depth, &slots)?;
    for i in 0..interval {
        directory.set_pointer(
            op,
            frame.node_index,
            start + i,
            DirectoryPointer::node(new_index, i * map_size),
        )?;
    }

    update_max_child_depth(op, directory, &frame, new_depth)?;

    debug!(
        parent = frame.node_index,
        node = new_index,
        local_depth = new_depth,
        slots = interval,
        "added directory level"
    );
    Ok(())
}

/// Merges the bucket holding `hash` with its buddy when both are small enough.
///
/// Returns true when a merge happened.
pub(crate) fn merge_bucket_after_deletion(
    op: &mut AtomicOperation<'_>,
    files: &IndexFiles,
    layout: &dyn EntryLayout,
    path: &BucketPath,
    page_no: u32,
    hash: u64,
) -> Result<bool> {
    let (depth, content) = op.with_page(PageKey::new(files.buckets, page_no), |page| {
        let bucket = BucketPage::from_page(page, layout)?;
        Ok((bucket.depth(), bucket.content_size()))
    })?;
    if depth <= MAX_LEVEL_DEPTH || content > MERGE_THRESHOLD {
        return Ok(false);
    }

    let bit = 1u64 << (HASH_CODE_BITS - depth);
    let directory = &files.directory;
    let buddy_path = bucket_path(&*op, directory, hash ^ bit)?;
    let buddy_frame = buddy_path.current();
    let buddy_page = match directory.pointer(&*op, buddy_frame.node_index, buddy_frame.slot())? {
        DirectoryPointer::Bucket(page) if page as u32 != page_no => page as u32,
        _ => return Ok(false),
    };

    let (buddy_depth, buddy_free) = op.with_page(PageKey::new(files.buckets, buddy_page), |page| {
        let bucket = BucketPage::from_page(page, layout)?;
        Ok((bucket.depth(), bucket.free_space()))
    })?;
    if buddy_depth != depth || content > buddy_free {
        return Ok(false);
    }

    let (lower, upper) = if hash & bit == 0 {
        (page_no, buddy_page)
    } else {
        (buddy_page, page_no)
    };

    // The upper half was carved out of the lower page when it reached this depth.
    let origin = op.with_page(PageKey::new(files.buckets, upper), |page| {
        Ok(BucketPage::from_page(page, layout)?.split_history(depth - 1))
    })?;
    if origin != Some(lower) {
        return Err(corrupted(format!(
            "bucket {} at depth {} records {:?} as its split origin, its buddy is {}",
            upper, depth, origin, lower
        )));
    }

    let (_, mut entries) = read_entries(&*op, files, layout, lower)?;
    let (_, upper_entries) = read_entries(&*op, files, layout, upper)?;
    entries.extend(upper_entries);
    check_bucket_depth(&entries, depth - 1)?;

    op.with_page_mut(PageKey::new(files.buckets, lower), |page| {
        let mut bucket = BucketPageMut::from_page(page, layout)?;
        bucket.reset(depth - 1);
        write_entries(&mut bucket, &entries)
    })?;
    release_bucket(op, files, layout, upper)?;

    let range = path
        .prefix_range(depth - 1)
        .ok_or_else(|| corrupted("merged bucket is deeper than its directory node"))?;
    let node = path.frame(range.level).node_index;
    for slot in range.first_slot..range.first_slot + range.len {
        update_bucket(op, directory, node, slot, DirectoryPointer::Bucket(lower as u64))?;
    }

    debug!(
        page = lower,
        freed = upper,
        depth = depth - 1,
        entries = entries.len(),
        "merged buckets"
    );
    Ok(true)
}

/// Folds the node `path` ends in back into its parent slots.
pub fn merge_node_to_parent(
    op: &mut AtomicOperation<'_>,
    directory: &Directory,
    path: &BucketPath,
) -> Result<()> {
    let frame = *path.current();
    let parent = *path
        .parent()
        .ok_or_else(|| corrupted("the root node has no parent to merge into"))?;
    let start = find_parent_node_start_index(path)?;
    let map_size = 1usize << frame.node_local_depth;
    let node = directory.node(&*op, frame.node_index)?;

    for (k, slot) in (0..MAX_LEVEL_SIZE).step_by(map_size).enumerate() {
        directory.set_pointer(op, parent.node_index, start + k, node[slot])?;
    }
    directory.delete_node(op, frame.node_index)?;

    if parent.slot() < HALF {
        if directory.max_left_child_depth(&*op, parent.node_index)? == frame.node_local_depth {
            let depth = max_level_depth(&*op, directory, parent.node_index, 0..HALF)?;
            directory.set_max_left_child_depth(op, parent.node_index, depth)?;
        }
    } else if directory.max_right_child_depth(&*op, parent.node_index)? == frame.node_local_depth {
        let depth = max_level_depth(&*op, directory, parent.node_index, HALF..MAX_LEVEL_SIZE)?;
        directory.set_max_right_child_depth(op, parent.node_index, depth)?;
    }

    debug!(
        node = frame.node_index,
        parent = parent.node_index,
        "merged directory node into its parent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64) -> RawEntry {
        RawEntry {
            hash,
            key: vec![],
            value: vec![],
        }
    }

    #[test]
    fn depth_check_accepts_shared_prefix() {
        let entries = vec![entry(0xAB00_0000_0000_0001), entry(0xAB7F_FFFF_FFFF_FFFF)];
        check_bucket_depth(&entries, 9).unwrap();
        check_bucket_depth(&entries, 8).unwrap();
        assert!(check_bucket_depth(&entries, 10).is_err());
        check_bucket_depth(&[], 64).unwrap();
    }

    #[test]
    fn uniform_maps_are_detected() {
        let mut slots: NodeSlots = [DirectoryPointer::Bucket(1); MAX_LEVEL_SIZE];
        for slot in slots.iter_mut().skip(4) {
            *slot = DirectoryPointer::Bucket(2);
        }
        assert!(all_maps_contain_same_bucket(&slots, 4));
        assert!(!all_maps_contain_same_bucket(&slots, 8));

        slots[0] = DirectoryPointer::node(3, 0);
        slots[1] = DirectoryPointer::node(3, 0);
        slots[2] = DirectoryPointer::node(3, 0);
        slots[3] = DirectoryPointer::node(3, 0);
        assert!(!all_maps_contain_same_bucket(&slots, 4));
    }

    #[test]
    fn parent_start_index_is_aligned_to_the_node_span() {
        let root = PathFrame {
            hash_map_offset: 0,
            item_index: 77,
            node_index: 0,
            node_local_depth: 8,
            node_global_depth: 8,
        };
        let mut path = BucketPath::new(root);
        path.push(PathFrame {
            hash_map_offset: 8,
            item_index: 3,
            node_index: 4,
            node_local_depth: 3,
            node_global_depth: 11,
        });

        assert_eq!(find_parent_node_start_index(&path).unwrap(), 64);
        assert!(find_parent_node_start_index(&BucketPath::new(root)).is_err());
    }
}
