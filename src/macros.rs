//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in turhash.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32, U64, I32, I64). Bucket, directory and
//! metadata headers are all declared this way so that the on-disk byte order
//! is fixed regardless of the host.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{I32, I64};
//!
//! #[repr(C)]
//! struct Header {
//!     free_pointer: I32,
//!     records: I64,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         free_pointer: i32,
//!         records: i64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn free_pointer(&self) -> i32 { self.free_pointer.get() }
//! // pub fn set_free_pointer(&mut self, val: i32) { self.free_pointer = I32::new(val); }
//! // pub fn records(&self) -> i64 { self.records.get() }
//! // pub fn set_records(&mut self, val: i64) { self.records = I64::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, $native:ty, $wrapper:ident) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> $native {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: $native) {
                self.$field = ::zerocopy::little_endian::$wrapper::new(val);
            }
        }
    };
    (@dispatch $field:ident, u16) => {
        $crate::zerocopy_accessors!(@impl $field, u16, U16);
    };
    (@dispatch $field:ident, u32) => {
        $crate::zerocopy_accessors!(@impl $field, u32, U32);
    };
    (@dispatch $field:ident, u64) => {
        $crate::zerocopy_accessors!(@impl $field, u64, U64);
    };
    (@dispatch $field:ident, i32) => {
        $crate::zerocopy_accessors!(@impl $field, i32, I32);
    };
    (@dispatch $field:ident, i64) => {
        $crate::zerocopy_accessors!(@impl $field, i64, I64);
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@dispatch $field, $ty);
        )*
    };
}
