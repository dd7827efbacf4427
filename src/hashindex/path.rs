//! # Bucket Paths
//!
//! A `BucketPath` records how a lookup reached a bucket: one frame per
//! directory node visited, root first. Splits, merges and traversal walk this
//! stack upward to find the node that owns a bucket's whole slot range.
//!
//! ```text
//! frame 0: root       offset 0   item 0x9C   local 8  global 8
//! frame 1: node 4     offset 64  item 5      local 6  global 14
//!                     └──────────┬─────────┘
//!                      slot 69 of node 4 names the bucket
//! ```
//!
//! `hash_map_offset` is the first slot of the hash map inside the node,
//! `item_index` the position inside that map. A node of local depth `L` holds
//! `256 >> L` maps of `1 << L` slots each.

use smallvec::SmallVec;

/// Slots of one node covered by a hash prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixRange {
    /// Path level of the node holding the range.
    pub level: usize,
    pub first_slot: usize,
    pub len: usize,
}

/// One visited directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathFrame {
    pub hash_map_offset: usize,
    pub item_index: usize,
    pub node_index: u32,
    pub node_local_depth: u8,
    pub node_global_depth: u8,
}

impl PathFrame {
    /// Slot inside the node.
    pub fn slot(&self) -> usize {
        self.hash_map_offset + self.item_index
    }

    pub fn hash_map_size(&self) -> usize {
        1 << self.node_local_depth
    }

    /// Number of hash bits consumed above this node.
    pub fn start_depth(&self) -> u8 {
        self.node_global_depth - self.node_local_depth
    }

    /// Same node, positioned at `slot`.
    pub fn at_slot(&self, slot: usize) -> PathFrame {
        let map_size = self.hash_map_size();
        let hash_map_offset = slot / map_size * map_size;
        PathFrame {
            hash_map_offset,
            item_index: slot - hash_map_offset,
            ..*self
        }
    }
}

/// Stack of frames from the root to the node naming a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPath {
    frames: SmallVec<[PathFrame; 8]>,
}

impl BucketPath {
    pub fn new(root: PathFrame) -> Self {
        let mut frames = SmallVec::new();
        frames.push(root);
        Self { frames }
    }

    pub fn current(&self) -> &PathFrame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn parent(&self) -> Option<&PathFrame> {
        let len = self.frames.len();
        (len >= 2).then(|| &self.frames[len - 2])
    }

    /// Frame at `level`, the root being level 0.
    pub fn frame(&self, level: usize) -> &PathFrame {
        &self.frames[level]
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: PathFrame) {
        self.frames.push(frame);
    }

    pub fn replace_current(&mut self, frame: PathFrame) {
        let last = self.frames.len() - 1;
        self.frames[last] = frame;
    }

    /// Slots covered by the `depth`-bit prefix of the bucket this path names.
    ///
    /// The range lives in the deepest node that starts at or above `depth`.
    /// Returns `None` when `depth` exceeds the global depth of the path.
    pub fn prefix_range(&self, depth: u8) -> Option<PrefixRange> {
        if depth > self.current().node_global_depth {
            return None;
        }
        let level = (0..self.frames.len())
            .rev()
            .find(|&level| self.frames[level].start_depth() <= depth)?;
        let frame = &self.frames[level];
        let len = 1usize << (frame.node_global_depth - depth);
        let first_slot = frame.hash_map_offset + (frame.item_index & !(len - 1));

        Some(PrefixRange {
            level,
            first_slot,
            len,
        })
    }

    /// The path up to and including `level`.
    pub fn truncated(&self, level: usize) -> BucketPath {
        BucketPath {
            frames: self.frames[..=level].iter().copied().collect(),
        }
    }

    /// The path ending at the parent, if there is one.
    pub fn up(&self) -> Option<BucketPath> {
        let len = self.frames.len();
        (len >= 2).then(|| self.truncated(len - 2))
    }
}
