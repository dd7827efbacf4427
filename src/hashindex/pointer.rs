//! # Directory Slot Pointers
//!
//! Each directory slot is a little-endian `i64` that is empty, names a bucket
//! page, or names a hash map inside another directory node:
//!
//! ```text
//! raw == 0                   Empty
//! raw  > 0                   Bucket(page = raw - 1)
//! raw  < 0                   Node { index, offset }
//!                            raw = i64::MIN | index << 8 | offset
//! ```
//!
//! The sign bit marks node references; the low byte is the slot offset of the
//! referenced hash map inside the child node.

use crate::config::LEVEL_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DirectoryPointer {
    #[default]
    Empty,
    Bucket(u64),
    Node { index: u32, offset: u8 },
}

impl DirectoryPointer {
    pub fn decode(raw: i64) -> Self {
        match raw {
            0 => DirectoryPointer::Empty,
            r if r > 0 => DirectoryPointer::Bucket((r - 1) as u64),
            r => DirectoryPointer::Node {
                index: ((r & i64::MAX) >> 8) as u32,
                offset: (r & LEVEL_MASK as i64) as u8,
            },
        }
    }

    pub fn encode(self) -> i64 {
        match self {
            DirectoryPointer::Empty => 0,
            DirectoryPointer::Bucket(page) => page as i64 + 1,
            DirectoryPointer::Node { index, offset } => {
                i64::MIN | ((index as i64) << 8) | offset as i64
            }
        }
    }

    pub fn node(index: u32, offset: usize) -> Self {
        DirectoryPointer::Node {
            index,
            offset: offset as u8,
        }
    }

    pub fn bucket_page(self) -> Option<u32> {
        match self {
            DirectoryPointer::Bucket(page) => Some(page as u32),
            _ => None,
        }
    }

    pub fn is_node(self) -> bool {
        matches!(self, DirectoryPointer::Node { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(DirectoryPointer::Empty.encode(), 0);
        assert_eq!(DirectoryPointer::decode(0), DirectoryPointer::Empty);
    }

    #[test]
    fn bucket_page_is_offset_by_one() {
        assert_eq!(DirectoryPointer::Bucket(0).encode(), 1);
        assert_eq!(DirectoryPointer::decode(256), DirectoryPointer::Bucket(255));
    }

    #[test]
    fn node_reference_sets_sign_bit() {
        let ptr = DirectoryPointer::node(3, 128);
        let raw = ptr.encode();

        assert!(raw < 0);
        assert_eq!(raw & 0xFF, 128);
        assert_eq!(DirectoryPointer::decode(raw), ptr);
    }

    #[test]
    fn largest_node_index_survives() {
        let ptr = DirectoryPointer::Node {
            index: u32::MAX,
            offset: 255,
        };
        assert_eq!(DirectoryPointer::decode(ptr.encode()), ptr);
    }
}
