//! # Directory File
//!
//! The directory is a trie of fixed-size nodes stored back to back in the
//! `.hit` file. Node 0 is the root.
//!
//! ```text
//! page 0:  [tree_size: i32][tombstone: i32][node 0][node 1] ... [node 6]
//! page 1:  [node 7] ... [node 13]
//! page n:  [node 7n] ... [node 7n + 6]
//!
//! node:    [max_left: u8][max_right: u8][local_depth: u8][slot: i64; 256]
//! ```
//!
//! `tree_size` is the next never-used node index. Freed nodes form a list
//! headed by `tombstone` (-1 when empty) and linked through their raw slot 0.
//!
//! `max_left` and `max_right` cache the largest local depth among the child
//! nodes referenced from slots `0..128` and `128..256`.

use eyre::Result;
use zerocopy::little_endian::{I32, I64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::pointer::DirectoryPointer;
use crate::config::{
    DIRECTORY_HEADER_SIZE, DIRECTORY_NODE_SIZE, MAX_LEVEL_DEPTH, MAX_LEVEL_SIZE,
    NODES_PER_FIRST_PAGE, NODES_PER_PAGE,
};
use crate::error::HashIndexError;
use crate::storage::{AtomicOperation, FileId, PageKey, PageRead};

/// The 256 slots of one node.
pub type NodeSlots = [DirectoryPointer; MAX_LEVEL_SIZE];

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct DirectoryHeader {
    tree_size: I32,
    tombstone: I32,
}

impl DirectoryHeader {
    zerocopy_accessors! {
        tree_size: i32,
        tombstone: i32,
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeEntry {
    max_left: u8,
    max_right: u8,
    local_depth: u8,
    slots: [I64; MAX_LEVEL_SIZE],
}

const _: () = assert!(std::mem::size_of::<DirectoryHeader>() == DIRECTORY_HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<NodeEntry>() == DIRECTORY_NODE_SIZE);

fn header(page: &[u8]) -> Result<&DirectoryHeader> {
    DirectoryHeader::ref_from_prefix(page)
        .map(|(h, _)| h)
        .map_err(|e| eyre::eyre!("failed to parse DirectoryHeader: {:?}", e))
}

fn header_mut(page: &mut [u8]) -> Result<&mut DirectoryHeader> {
    DirectoryHeader::mut_from_prefix(page)
        .map(|(h, _)| h)
        .map_err(|e| eyre::eyre!("failed to parse DirectoryHeader: {:?}", e))
}

fn node_entry(page: &[u8], offset: usize) -> Result<&NodeEntry> {
    NodeEntry::ref_from_bytes(&page[offset..offset + DIRECTORY_NODE_SIZE])
        .map_err(|e| eyre::eyre!("failed to parse directory node: {:?}", e))
}

fn node_entry_mut(page: &mut [u8], offset: usize) -> Result<&mut NodeEntry> {
    NodeEntry::mut_from_bytes(&mut page[offset..offset + DIRECTORY_NODE_SIZE])
        .map_err(|e| eyre::eyre!("failed to parse directory node: {:?}", e))
}

/// Page number and byte offset of node `index`.
pub fn node_location(index: u32) -> (u32, usize) {
    let index = index as usize;
    if index < NODES_PER_FIRST_PAGE {
        return (0, DIRECTORY_HEADER_SIZE + index * DIRECTORY_NODE_SIZE);
    }
    let rel = index - NODES_PER_FIRST_PAGE;
    (
        1 + (rel / NODES_PER_PAGE) as u32,
        (rel % NODES_PER_PAGE) * DIRECTORY_NODE_SIZE,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    file_id: FileId,
}

impl Directory {
    pub fn new(file_id: FileId) -> Self {
        Self { file_id }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    fn header_key(&self) -> PageKey {
        PageKey::new(self.file_id, 0)
    }

    /// Empties the directory: one page, no nodes, no free list.
    pub fn init(&self, op: &mut AtomicOperation<'_>) -> Result<()> {
        op.truncate_file(self.file_id)?;
        let page_no = op.add_page(self.file_id)?;
        op.with_page_mut(PageKey::new(self.file_id, page_no), |page| {
            let header = header_mut(page)?;
            header.set_tree_size(0);
            header.set_tombstone(-1);
            Ok(())
        })
    }

    /// Checks that the directory holds at least the root node.
    pub fn open<C: PageRead>(&self, ctx: &C) -> Result<()> {
        if ctx.filled_up_to(self.file_id)? == 0 {
            return Err(HashIndexError::corrupted("directory file is empty").into());
        }
        let tree_size = self.tree_size(ctx)?;
        if tree_size == 0 {
            return Err(HashIndexError::corrupted("directory has no root node").into());
        }
        let (last_page, _) = node_location(tree_size - 1);
        if last_page >= ctx.filled_up_to(self.file_id)? {
            return Err(HashIndexError::corrupted(format!(
                "directory tree size {} exceeds the file length",
                tree_size
            ))
            .into());
        }
        Ok(())
    }

    pub fn tree_size<C: PageRead>(&self, ctx: &C) -> Result<u32> {
        ctx.with_page(self.header_key(), |page| {
            let size = header(page)?.tree_size();
            if size < 0 {
                return Err(HashIndexError::corrupted(format!("negative tree size {}", size)).into());
            }
            Ok(size as u32)
        })
    }

    fn tombstone<C: PageRead>(&self, ctx: &C) -> Result<Option<u32>> {
        ctx.with_page(self.header_key(), |page| {
            let t = header(page)?.tombstone();
            Ok((t >= 0).then_some(t as u32))
        })
    }

    fn with_node<C: PageRead, R>(
        &self,
        ctx: &C,
        index: u32,
        f: impl FnOnce(&NodeEntry) -> Result<R>,
    ) -> Result<R> {
        let (page_no, offset) = node_location(index);
        ctx.with_page(PageKey::new(self.file_id, page_no), |page| {
            f(node_entry(page, offset)?)
        })
    }

    fn with_node_mut<R>(
        &self,
        op: &mut AtomicOperation<'_>,
        index: u32,
        f: impl FnOnce(&mut NodeEntry) -> Result<R>,
    ) -> Result<R> {
        let (page_no, offset) = node_location(index);
        op.with_page_mut(PageKey::new(self.file_id, page_no), |page| {
            f(node_entry_mut(page, offset)?)
        })
    }

    /// Stores a node, reusing a freed index when there is one.
    pub fn add_node(
        &self,
        op: &mut AtomicOperation<'_>,
        max_left: u8,
        max_right: u8,
        local_depth: u8,
        slots: &NodeSlots,
    ) -> Result<u32> {
        let index = match self.tombstone(&*op)? {
            Some(index) => {
                let next = self.with_node(&*op, index, |node| Ok(node.slots[0].get()))?;
                op.with_page_mut(self.header_key(), |page| {
                    header_mut(page)?.set_tombstone(next as i32);
                    Ok(())
                })?;
                index
            }
            None => {
                let index = self.tree_size(&*op)?;
                let (page_no, _) = node_location(index);
                while op.filled_up_to(self.file_id)? <= page_no {
                    op.add_page(self.file_id)?;
                }
                op.with_page_mut(self.header_key(), |page| {
                    header_mut(page)?.set_tree_size(index as i32 + 1);
                    Ok(())
                })?;
                index
            }
        };

        self.with_node_mut(op, index, |node| {
            node.max_left = max_left;
            node.max_right = max_right;
            node.local_depth = local_depth;
            for (raw, ptr) in node.slots.iter_mut().zip(slots.iter()) {
                *raw = I64::new(ptr.encode());
            }
            Ok(())
        })?;

        Ok(index)
    }

    /// Pushes node `index` onto the free list.
    pub fn delete_node(&self, op: &mut AtomicOperation<'_>, index: u32) -> Result<()> {
        let previous = self.tombstone(&*op)?.map_or(-1, |t| t as i64);
        self.with_node_mut(op, index, |node| {
            node.max_left = 0;
            node.max_right = 0;
            node.local_depth = 0;
            for raw in node.slots.iter_mut() {
                *raw = I64::new(0);
            }
            node.slots[0] = I64::new(previous);
            Ok(())
        })?;
        op.with_page_mut(self.header_key(), |page| {
            header_mut(page)?.set_tombstone(index as i32);
            Ok(())
        })
    }

    pub fn node<C: PageRead>(&self, ctx: &C, index: u32) -> Result<NodeSlots> {
        self.with_node(ctx, index, |node| {
            let mut slots = [DirectoryPointer::Empty; MAX_LEVEL_SIZE];
            for (slot, raw) in slots.iter_mut().zip(node.slots.iter()) {
                *slot = DirectoryPointer::decode(raw.get());
            }
            Ok(slots)
        })
    }

    pub fn set_node(&self, op: &mut AtomicOperation<'_>, index: u32, slots: &NodeSlots) -> Result<()> {
        self.with_node_mut(op, index, |node| {
            for (raw, ptr) in node.slots.iter_mut().zip(slots.iter()) {
                *raw = I64::new(ptr.encode());
            }
            Ok(())
        })
    }

    pub fn pointer<C: PageRead>(&self, ctx: &C, index: u32, slot: usize) -> Result<DirectoryPointer> {
        self.with_node(ctx, index, |node| {
            Ok(DirectoryPointer::decode(node.slots[slot].get()))
        })
    }

    pub fn set_pointer(
        &self,
        op: &mut AtomicOperation<'_>,
        index: u32,
        slot: usize,
        ptr: DirectoryPointer,
    ) -> Result<()> {
        self.with_node_mut(op, index, |node| {
            node.slots[slot] = I64::new(ptr.encode());
            Ok(())
        })
    }

    /// Local depth of a live node; 0 or more than 8 is corruption.
    pub fn local_depth<C: PageRead>(&self, ctx: &C, index: u32) -> Result<u8> {
        let depth = self.with_node(ctx, index, |node| Ok(node.local_depth))?;
        if depth == 0 || depth > MAX_LEVEL_DEPTH {
            return Err(HashIndexError::corrupted(format!(
                "directory node {} has local depth {}",
                index, depth
            ))
            .into());
        }
        Ok(depth)
    }

    pub fn set_local_depth(&self, op: &mut AtomicOperation<'_>, index: u32, depth: u8) -> Result<()> {
        self.with_node_mut(op, index, |node| {
            node.local_depth = depth;
            Ok(())
        })
    }

    pub fn max_left_child_depth<C: PageRead>(&self, ctx: &C, index: u32) -> Result<u8> {
        self.with_node(ctx, index, |node| Ok(node.max_left))
    }

    pub fn set_max_left_child_depth(
        &self,
        op: &mut AtomicOperation<'_>,
        index: u32,
        depth: u8,
    ) -> Result<()> {
        self.with_node_mut(op, index, |node| {
            node.max_left = depth;
            Ok(())
        })
    }

    pub fn max_right_child_depth<C: PageRead>(&self, ctx: &C, index: u32) -> Result<u8> {
        self.with_node(ctx, index, |node| Ok(node.max_right))
    }

    pub fn set_max_right_child_depth(
        &self,
        op: &mut AtomicOperation<'_>,
        index: u32,
        depth: u8,
    ) -> Result<()> {
        self.with_node_mut(op, index, |node| {
            node.max_right = depth;
            Ok(())
        })
    }

    /// Number of live nodes.
    pub fn node_count<C: PageRead>(&self, ctx: &C) -> Result<u32> {
        let tree_size = self.tree_size(ctx)?;
        let mut free = 0u32;
        let mut next = self.tombstone(ctx)?;

        while let Some(index) = next {
            free += 1;
            if free > tree_size || index >= tree_size {
                return Err(HashIndexError::corrupted("directory free list is cyclic").into());
            }
            let raw = self.with_node(ctx, index, |node| Ok(node.slots[0].get()))?;
            next = (raw >= 0).then_some(raw as u32);
        }

        Ok(tree_size - free)
    }
}
