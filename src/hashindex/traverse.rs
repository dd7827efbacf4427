//! # Directory Walks
//!
//! Resolving a hash to its bucket, and stepping from one bucket to the next
//! or previous one in hash order.
//!
//! Buckets are visited in the order of their hash prefixes. Stepping forward
//! from a bucket of depth `d` skips every slot covered by its `d`-bit prefix,
//! then scans for the next slot holding a bucket, descending into child nodes
//! and climbing back to the parent when a node is exhausted:
//!
//! ```text
//! root          [ b0 | b0 | N1:0 | N1:128 | b3 | ... ]
//!                           │        │
//! N1 (local 7)              ▼        ▼
//!               [ b7 ... b7 | b8 ... b9 ]
//!
//! next(b0) = b7, next(b7) = b8, next(b9) = b3
//! ```
//!
//! A child node of local depth `L` owns `256 >> L` consecutive parent slots,
//! aligned to that size, one per hash map.

use eyre::Result;

use super::directory::Directory;
use super::path::{BucketPath, PathFrame};
use super::pointer::DirectoryPointer;
use crate::config::{HASH_CODE_BITS, MAX_LEVEL_DEPTH, MAX_LEVEL_SIZE};
use crate::error::HashIndexError;
use crate::storage::PageRead;

fn item_index(hash: u64, global: u8, local: u8) -> usize {
    ((hash >> (HASH_CODE_BITS - global)) & ((1u64 << local) - 1)) as usize
}

fn child_frame<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    parent: &PathFrame,
    index: u32,
    offset: u8,
) -> Result<PathFrame> {
    let local = directory.local_depth(ctx, index)?;
    let global = parent.node_global_depth as u16 + local as u16;
    if global > HASH_CODE_BITS as u16 {
        return Err(HashIndexError::corrupted(format!(
            "directory path exceeds {} hash bits at node {}",
            HASH_CODE_BITS, index
        ))
        .into());
    }
    let offset = offset as usize;
    if offset % (1 << local) != 0 || offset + (1 << local) > MAX_LEVEL_SIZE {
        return Err(HashIndexError::corrupted(format!(
            "hash map offset {} is invalid for node {} of local depth {}",
            offset, index, local
        ))
        .into());
    }

    Ok(PathFrame {
        hash_map_offset: offset,
        item_index: 0,
        node_index: index,
        node_local_depth: local,
        node_global_depth: global as u8,
    })
}

/// Follows `hash` from the root to the slot naming its bucket.
pub fn bucket_path<C: PageRead>(ctx: &C, directory: &Directory, hash: u64) -> Result<BucketPath> {
    let local = directory.local_depth(ctx, 0)?;
    let mut path = BucketPath::new(PathFrame {
        hash_map_offset: 0,
        item_index: item_index(hash, local, local),
        node_index: 0,
        node_local_depth: local,
        node_global_depth: local,
    });

    loop {
        let current = *path.current();
        match directory.pointer(ctx, current.node_index, current.slot())? {
            DirectoryPointer::Node { index, offset } => {
                let mut child = child_frame(ctx, directory, &current, index, offset)?;
                child.item_index = item_index(hash, child.node_global_depth, child.node_local_depth);
                path.push(child);
            }
            _ => return Ok(path),
        }
    }
}

fn depth_error(path: &BucketPath, bucket_depth: u8) -> eyre::Report {
    HashIndexError::corrupted(format!(
        "bucket depth {} exceeds the global depth {} of its node",
        bucket_depth,
        path.current().node_global_depth
    ))
    .into()
}

/// Path of the first non-empty slot after the bucket `path` names.
pub fn next_bucket<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    path: &BucketPath,
    bucket_depth: u8,
) -> Result<Option<BucketPath>> {
    let range = path
        .prefix_range(bucket_depth)
        .ok_or_else(|| depth_error(path, bucket_depth))?;
    let frame = *path.frame(range.level);
    let mut start = path.truncated(range.level);
    let next = range.first_slot + range.len;

    if next >= MAX_LEVEL_SIZE {
        match next_level_up(&start) {
            Some(up) => start = up,
            None => return Ok(None),
        }
    } else {
        start.replace_current(frame.at_slot(next));
    }

    next_non_empty_node(ctx, directory, start)
}

/// Scans forward from the current slot of `path` for a bucket.
pub fn next_non_empty_node<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    mut path: BucketPath,
) -> Result<Option<BucketPath>> {
    'nodes: loop {
        let frame = *path.current();
        let node = directory.node(ctx, frame.node_index)?;

        for slot in frame.slot()..MAX_LEVEL_SIZE {
            match node[slot] {
                DirectoryPointer::Empty => {}
                DirectoryPointer::Bucket(_) => {
                    path.replace_current(frame.at_slot(slot));
                    return Ok(Some(path));
                }
                DirectoryPointer::Node { index, offset } => {
                    path.replace_current(frame.at_slot(slot));
                    let child = child_frame(ctx, directory, &frame, index, offset)?;
                    path.push(child);
                    continue 'nodes;
                }
            }
        }

        match next_level_up(&path) {
            Some(up) => path = up,
            None => return Ok(None),
        }
    }
}

/// Moves to the first parent slot after the ones owned by the current node.
pub fn next_level_up(path: &BucketPath) -> Option<BucketPath> {
    let mut path = path.clone();
    loop {
        let parent = *path.parent()?;
        let pointers = 1usize << (MAX_LEVEL_DEPTH - path.current().node_local_depth);
        let next = (parent.slot() / pointers + 1) * pointers;

        path = path.up()?;
        if next < MAX_LEVEL_SIZE {
            path.replace_current(parent.at_slot(next));
            return Some(path);
        }
    }
}

/// Path of the last non-empty slot before the bucket `path` names.
pub fn prev_bucket<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    path: &BucketPath,
    bucket_depth: u8,
) -> Result<Option<BucketPath>> {
    let range = path
        .prefix_range(bucket_depth)
        .ok_or_else(|| depth_error(path, bucket_depth))?;
    let frame = *path.frame(range.level);
    let mut start = path.truncated(range.level);

    if range.first_slot == 0 {
        match prev_level_up(&start) {
            Some(up) => start = up,
            None => return Ok(None),
        }
    } else {
        start.replace_current(frame.at_slot(range.first_slot - 1));
    }

    prev_non_empty_node(ctx, directory, start)
}

/// Scans backward from the current slot of `path` for a bucket.
pub fn prev_non_empty_node<C: PageRead>(
    ctx: &C,
    directory: &Directory,
    mut path: BucketPath,
) -> Result<Option<BucketPath>> {
    'nodes: loop {
        let frame = *path.current();
        let node = directory.node(ctx, frame.node_index)?;

        for slot in (0..=frame.slot()).rev() {
            match node[slot] {
                DirectoryPointer::Empty => {}
                DirectoryPointer::Bucket(_) => {
                    path.replace_current(frame.at_slot(slot));
                    return Ok(Some(path));
                }
                DirectoryPointer::Node { index, offset } => {
                    path.replace_current(frame.at_slot(slot));
                    let child = child_frame(ctx, directory, &frame, index, offset)?;
                    let last = child.hash_map_offset + child.hash_map_size() - 1;
                    path.push(child.at_slot(last));
                    continue 'nodes;
                }
            }
        }

        match prev_level_up(&path) {
            Some(up) => path = up,
            None => return Ok(None),
        }
    }
}

/// Moves to the last parent slot before the ones owned by the current node.
pub fn prev_level_up(path: &BucketPath) -> Option<BucketPath> {
    let mut path = path.clone();
    loop {
        let parent = *path.parent()?;
        let pointers = 1usize << (MAX_LEVEL_DEPTH - path.current().node_local_depth);
        let first = parent.slot() / pointers * pointers;

        path = path.up()?;
        if first > 0 {
            path.replace_current(parent.at_slot(first - 1));
            return Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::hashindex::directory::NodeSlots;
    use crate::storage::AtomicOperationsManager;
    use tempfile::tempdir;

    /// Root slots 0..128 point to the maps of node 1 (local 1), slots
    /// 128..256 to buckets 1000 + slot. Node 1 maps 0..4 are
    /// [10, 11], [12, 12], [Empty, Empty], [13, 14]; map s >= 4 is [200 + s; 2].
    fn build(mgr: &AtomicOperationsManager) -> Directory {
        let id = mgr.add_file("walk.hit").unwrap();
        let directory = Directory::new(id);
        let lock = mgr.component_lock("walk");
        let mut op = mgr.start_atomic_operation(&lock);
        directory.init(&mut op).unwrap();

        let mut root: NodeSlots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
        for (slot, ptr) in root.iter_mut().enumerate() {
            *ptr = if slot < 128 {
                DirectoryPointer::node(1, slot * 2)
            } else {
                DirectoryPointer::Bucket(1000 + slot as u64)
            };
        }
        directory.add_node(&mut op, 1, 0, 8, &root).unwrap();

        let mut child: NodeSlots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
        let first_maps = [10, 11, 12, 12, 0, 0, 13, 14];
        for (slot, ptr) in child.iter_mut().enumerate() {
            let page = if slot < first_maps.len() {
                first_maps[slot]
            } else {
                200 + (slot / 2) as u64
            };
            if page != 0 {
                *ptr = DirectoryPointer::Bucket(page);
            }
        }
        directory.add_node(&mut op, 0, 0, 1, &child).unwrap();
        op.commit().unwrap();
        directory
    }

    fn bucket_of<C: PageRead>(ctx: &C, directory: &Directory, path: &BucketPath) -> u64 {
        let frame = path.current();
        match directory.pointer(ctx, frame.node_index, frame.slot()).unwrap() {
            DirectoryPointer::Bucket(page) => page,
            other => panic!("slot holds {:?}", other),
        }
    }

    fn depth_of(page: u64) -> u8 {
        match page {
            10 | 11 | 13 | 14 => 9,
            _ => 8,
        }
    }

    fn open(dir: &std::path::Path) -> (AtomicOperationsManager, Directory) {
        let mgr = AtomicOperationsManager::open(dir, StoreOptions::default()).unwrap();
        let directory = build(&mgr);
        (mgr, directory)
    }

    #[test]
    fn resolves_through_child_nodes() {
        let dir = tempdir().unwrap();
        let (mgr, directory) = open(dir.path());
        let store = mgr.store();

        let hash = (3u64 << 56) | (1u64 << 55);
        let path = bucket_path(store, &directory, hash).unwrap();
        assert_eq!(path.depth(), 2);
        assert_eq!(path.current().node_global_depth, 9);
        assert_eq!(bucket_of(store, &directory, &path), 14);

        let path = bucket_path(store, &directory, 200u64 << 56).unwrap();
        assert_eq!(path.depth(), 1);
        assert_eq!(bucket_of(store, &directory, &path), 1200);
    }

    #[test]
    fn next_walks_buckets_in_hash_order() {
        let dir = tempdir().unwrap();
        let (mgr, directory) = open(dir.path());
        let store = mgr.store();

        let mut path = bucket_path(store, &directory, 0).unwrap();
        let mut seen = vec![bucket_of(store, &directory, &path)];
        for _ in 0..6 {
            let depth = depth_of(*seen.last().unwrap());
            path = next_bucket(store, &directory, &path, depth).unwrap().unwrap();
            seen.push(bucket_of(store, &directory, &path));
        }

        assert_eq!(seen, vec![10, 11, 12, 13, 14, 204, 205]);
    }

    #[test]
    fn next_climbs_out_of_an_exhausted_child() {
        let dir = tempdir().unwrap();
        let (mgr, directory) = open(dir.path());
        let store = mgr.store();

        let path = bucket_path(store, &directory, 127u64 << 56).unwrap();
        assert_eq!(bucket_of(store, &directory, &path), 327);

        let next = next_bucket(store, &directory, &path, 8).unwrap().unwrap();
        assert_eq!(next.depth(), 1);
        assert_eq!(bucket_of(store, &directory, &next), 1128);
    }

    #[test]
    fn prev_walks_buckets_in_reverse_hash_order() {
        let dir = tempdir().unwrap();
        let (mgr, directory) = open(dir.path());
        let store = mgr.store();

        let mut path = bucket_path(store, &directory, 5u64 << 56).unwrap();
        let mut seen = vec![bucket_of(store, &directory, &path)];
        for _ in 0..6 {
            let depth = depth_of(*seen.last().unwrap());
            path = prev_bucket(store, &directory, &path, depth).unwrap().unwrap();
            seen.push(bucket_of(store, &directory, &path));
        }

        assert_eq!(seen, vec![205, 204, 14, 13, 12, 11, 10]);
        assert!(prev_bucket(store, &directory, &path, 9).unwrap().is_none());
    }

    #[test]
    fn prev_descends_into_the_last_map_of_a_child() {
        let dir = tempdir().unwrap();
        let (mgr, directory) = open(dir.path());
        let store = mgr.store();

        let path = bucket_path(store, &directory, 128u64 << 56).unwrap();
        assert_eq!(bucket_of(store, &directory, &path), 1128);

        let prev = prev_bucket(store, &directory, &path, 8).unwrap().unwrap();
        assert_eq!(prev.depth(), 2);
        assert_eq!(bucket_of(store, &directory, &prev), 327);
    }

    #[test]
    fn next_after_the_last_bucket_is_none() {
        let dir = tempdir().unwrap();
        let (mgr, directory) = open(dir.path());
        let store = mgr.store();

        let path = bucket_path(store, &directory, u64::MAX).unwrap();
        assert_eq!(bucket_of(store, &directory, &path), 1255);
        assert!(next_bucket(store, &directory, &path, 8).unwrap().is_none());
    }
}
