//! Single-page side table holding the value of the null key.
//!
//! ```text
//! [present: u8][len: i32 LE][raw value: len bytes]
//! ```

use eyre::{ensure, Result};

use crate::config::{MAX_NULL_VALUE_SIZE, NULL_BUCKET_HEADER_SIZE, PAGE_SIZE};
use crate::error::HashIndexError;

pub struct NullBucket<'a> {
    data: &'a [u8],
}

impl<'a> NullBucket<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        Ok(Self { data })
    }

    /// Raw value of the null key, if one is stored.
    pub fn value(&self) -> Result<Option<&'a [u8]>> {
        if self.data[0] == 0 {
            return Ok(None);
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&self.data[1..NULL_BUCKET_HEADER_SIZE]);
        let len = i32::from_le_bytes(len);
        if len < 0 || len as usize > MAX_NULL_VALUE_SIZE {
            return Err(HashIndexError::corrupted(format!("null bucket value length {}", len)).into());
        }
        let start = NULL_BUCKET_HEADER_SIZE;
        Ok(Some(&self.data[start..start + len as usize]))
    }
}

pub struct NullBucketMut<'a> {
    data: &'a mut [u8],
}

impl<'a> NullBucketMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        NullBucket::from_page(data)?;
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> NullBucket<'_> {
        NullBucket { data: self.data }
    }

    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        if value.len() > MAX_NULL_VALUE_SIZE {
            return Err(HashIndexError::EntryTooLarge {
                size: value.len(),
                max: MAX_NULL_VALUE_SIZE,
            }
            .into());
        }
        self.data[0] = 1;
        self.data[1..NULL_BUCKET_HEADER_SIZE].copy_from_slice(&(value.len() as i32).to_le_bytes());
        let start = NULL_BUCKET_HEADER_SIZE;
        self.data[start..start + value.len()].copy_from_slice(value);
        Ok(())
    }

    pub fn remove_value(&mut self) {
        self.data[..NULL_BUCKET_HEADER_SIZE].fill(0);
    }
}
