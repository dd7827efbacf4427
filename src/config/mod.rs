//! # turhash Configuration Module
//!
//! Constants of the on-disk format live in [`constants`]; runtime knobs for the
//! store and for individual indexes live in [`options`].
//!
//! ## Module Organization
//!
//! - [`constants`]: Numeric configuration values with dependency documentation
//! - [`options`]: `StoreOptions` and `IndexOptions` builders

pub mod constants;
pub mod options;

pub use constants::*;
pub use options::{IndexOptions, StoreOptions};
