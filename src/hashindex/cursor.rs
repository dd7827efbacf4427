//! Ordered iteration over a [`HashTable`].
//!
//! A cursor holds one bucket's worth of decoded entries and no lock. When the
//! batch runs out it asks the table for the entries after (or before) the
//! last key it returned, so concurrent changes behind the cursor are never
//! seen and changes ahead of it are.

use std::collections::VecDeque;

use eyre::Result;

use super::entry::Entry;
use super::table::HashTable;
use crate::codec::Codec;
use crate::hash::HashFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

pub struct Cursor<'a, KC: Codec, VC: Codec, H: HashFunction> {
    table: &'a HashTable<KC, VC, H>,
    direction: Direction,
    batch: VecDeque<Entry<KC::Item, VC::Item>>,
    last_key: Option<KC::Item>,
    done: bool,
}

impl<'a, KC, VC, H> Cursor<'a, KC, VC, H>
where
    KC: Codec,
    VC: Codec,
    KC::Item: Clone,
    H: HashFunction,
{
    pub(crate) fn new(table: &'a HashTable<KC, VC, H>, direction: Direction) -> Self {
        Self {
            table,
            direction,
            batch: VecDeque::new(),
            last_key: None,
            done: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let mut batch = match (self.direction, &self.last_key) {
            (Direction::Ascending, None) => self.table.first_entries()?,
            (Direction::Ascending, Some(key)) => self.table.higher_entries(key, None)?,
            (Direction::Descending, None) => self.table.last_entries()?,
            (Direction::Descending, Some(key)) => self.table.lower_entries(key)?,
        };
        if self.direction == Direction::Descending {
            batch.reverse();
        }
        if batch.is_empty() {
            self.done = true;
        }
        self.batch = batch.into();
        Ok(())
    }
}

impl<KC, VC, H> Iterator for Cursor<'_, KC, VC, H>
where
    KC: Codec,
    VC: Codec,
    KC::Item: Clone,
    H: HashFunction,
{
    type Item = Result<(KC::Item, VC::Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch.is_empty() && !self.done {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }

        let entry = self.batch.pop_front()?;
        self.last_key = Some(entry.key.clone());
        Some(Ok((entry.key, entry.value)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use crate::codec::{StringCodec, U64Codec};
    use crate::config::StoreOptions;
    use crate::hash::IdentityHash;
    use crate::hashindex::HashTable;
    use crate::storage::AtomicOperationsManager;

    fn table(dir: &std::path::Path) -> HashTable<U64Codec, StringCodec, IdentityHash> {
        let mgr = Arc::new(AtomicOperationsManager::open(dir, StoreOptions::default()).unwrap());
        HashTable::builder("cursor", U64Codec, StringCodec)
            .hash_function(IdentityHash)
            .create(&mgr)
            .unwrap()
    }

    #[test]
    fn walks_buckets_in_both_directions() {
        let dir = tempdir().unwrap();
        let t = table(dir.path());
        let keys: Vec<u64> = vec![3 << 56, (3 << 56) + 1, 200 << 56, 17, u64::MAX];
        for k in &keys {
            t.put(k, &k.to_string()).unwrap();
        }

        let forward: Vec<u64> = t.iter().map(|r| r.unwrap().0).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(forward, sorted);

        let backward: Vec<u64> = t.iter_rev().map(|r| r.unwrap().0).collect();
        sorted.reverse();
        assert_eq!(backward, sorted);
    }

    #[test]
    fn sees_inserts_ahead_and_skips_deletes() {
        let dir = tempdir().unwrap();
        let t = table(dir.path());
        t.put(&(1 << 56), &"a".to_string()).unwrap();
        t.put(&(5 << 56), &"b".to_string()).unwrap();

        let mut cursor = t.iter();
        assert_eq!(cursor.next().unwrap().unwrap().0, 1 << 56);

        t.remove(&(5 << 56)).unwrap();
        t.put(&(9 << 56), &"c".to_string()).unwrap();

        let rest: Vec<u64> = cursor.map(|r| r.unwrap().0).collect();
        assert_eq!(rest, vec![9 << 56]);
    }

    #[test]
    fn empty_table_yields_nothing() {
        let dir = tempdir().unwrap();
        let t = table(dir.path());
        assert!(t.iter().next().is_none());
        assert!(t.iter_rev().next().is_none());
    }
}
