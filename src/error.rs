//! # Hash Index Errors
//!
//! Fallible functions in turhash return `eyre::Result`. Errors that a caller
//! may want to react to programmatically are raised as [`HashIndexError`] and
//! travel inside the `eyre::Report`; recover them with `downcast_ref`:
//!
//! ```ignore
//! match table.put(&key, &value) {
//!     Err(e) if matches!(
//!         e.downcast_ref::<HashIndexError>(),
//!         Some(HashIndexError::KeyTooLarge { .. })
//!     ) => { /* reject the request */ }
//!     other => other?,
//! }
//! ```
//!
//! I/O failures and WAL problems keep their context chain from
//! `wrap_err_with` and are not represented here.
//!
//! ## Categories
//!
//! | Variant              | Category      | Index state after the error     |
//! |----------------------|---------------|---------------------------------|
//! | KeyTooLarge          | validation    | unchanged                       |
//! | EntryTooLarge        | validation    | unchanged                       |
//! | NullKeyNotSupported  | validation    | unchanged                       |
//! | ConfigMismatch       | open          | not opened                      |
//! | NotFound             | open          | not opened                      |
//! | AlreadyExists        | create        | not created                     |
//! | Corrupted            | structural    | operation rolled back           |
//! | BucketOverflow       | structural    | operation rolled back           |

use thiserror::Error;

/// Errors raised by the hash index engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashIndexError {
    /// Serialized key exceeds the configured bound.
    #[error("serialized key of {size} bytes exceeds the maximum of {max} bytes")]
    KeyTooLarge { size: usize, max: usize },

    /// Entry can never fit into a bucket, not even an empty one.
    #[error("entry of {size} bytes exceeds the bucket capacity of {max} bytes")]
    EntryTooLarge { size: usize, max: usize },

    #[error("null keys are not supported by index '{index}'")]
    NullKeyNotSupported { index: String },

    /// Stored format identity differs from the one requested at open.
    #[error("index '{index}' was created with {field} = {stored}, open requested {requested}")]
    ConfigMismatch {
        index: String,
        field: &'static str,
        stored: String,
        requested: String,
    },

    #[error("index '{index}' does not exist")]
    NotFound { index: String },

    #[error("index '{index}' already exists")]
    AlreadyExists { index: String },

    /// A structural invariant of the directory or of a bucket does not hold.
    #[error("hash index is corrupted: {0}")]
    Corrupted(String),

    /// A bucket holds entries with equal 64-bit hashes that do not fit one page.
    #[error("bucket for hash {hash:#018x} cannot be split past 64 hash bits")]
    BucketOverflow { hash: u64 },
}

impl HashIndexError {
    pub fn corrupted(message: impl Into<String>) -> Self {
        HashIndexError::Corrupted(message.into())
    }

    /// Returns true for errors detected before the index was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            HashIndexError::KeyTooLarge { .. }
                | HashIndexError::EntryTooLarge { .. }
                | HashIndexError::NullKeyNotSupported { .. }
        )
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HashIndexError::Corrupted(_) | HashIndexError::BucketOverflow { .. }
        )
    }
}

/// Extracts the [`HashIndexError`] carried by a report, if any.
pub fn index_error(report: &eyre::Report) -> Option<&HashIndexError> {
    report.downcast_ref::<HashIndexError>()
}
