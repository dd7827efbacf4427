//! # Key and Value Codecs
//!
//! A [`Codec`] turns a typed key or value into the bytes stored in a bucket
//! and back. The hash index never interprets these bytes itself; it only asks
//! a codec how long an encoded item is, so entries can be stepped over inside
//! a bucket page without decoding them.
//!
//! ## Stock Codecs
//!
//! | Codec                | ID | Item      | Encoding                               |
//! |----------------------|----|-----------|----------------------------------------|
//! | `U64Codec`           | 1  | `u64`     | 8 bytes, big-endian                    |
//! | `I64Codec`           | 2  | `i64`     | 8 bytes, big-endian, sign bit flipped  |
//! | `StringCodec`        | 3  | `String`  | `[len: u32 LE][utf-8 bytes]`           |
//! | `BytesCodec`         | 4  | `Vec<u8>` | `[len: u32 LE][bytes]`                 |
//! | `CaseFoldStringCodec`| 5  | `String`  | as `StringCodec`, lowercased first     |
//!
//! Codec ids are persisted in the index metadata and checked when an index is
//! opened, so an index cannot be reopened with a codec that reads its bytes
//! differently.
//!
//! ## Preprocessing
//!
//! `preprocess` normalizes a key before it is hashed and stored. The hash is
//! computed over the encoded, preprocessed key, so two keys that preprocess
//! to the same item are the same key.
//!
//! ## Encryption
//!
//! An [`Encryption`] transforms encoded keys at rest. Values are stored as
//! encoded. An encrypted key is stored as `[len: i32 LE][ciphertext]`.

use std::borrow::Cow;
use std::cmp::Ordering;

use eyre::{ensure, Result, WrapErr};

/// Serializer for one key or value type.
pub trait Codec: Send + Sync + 'static {
    type Item;

    /// Persisted identifier of the encoding.
    const ID: u16;

    fn encode(&self, item: &Self::Item, out: &mut Vec<u8>);

    /// Length of the encoded item at the start of `bytes`.
    fn encoded_len(&self, bytes: &[u8]) -> Result<usize>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Item>;

    /// Orders two encoded items the way the items themselves order.
    ///
    /// The default compares the encodings bytewise, which is right for
    /// order-preserving encodings.
    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }

    fn preprocess<'a>(&self, item: &'a Self::Item) -> Cow<'a, Self::Item>
    where
        Self::Item: Clone,
    {
        Cow::Borrowed(item)
    }

    fn to_bytes(&self, item: &Self::Item) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(item, &mut out);
        out
    }
}

/// Transformation applied to encoded keys before they are stored.
pub trait Encryption: Send + Sync {
    fn name(&self) -> &str;

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>>;
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    ensure!(
        bytes.len() >= N,
        "truncated {}: need {} bytes, have {}",
        what,
        N,
        bytes.len()
    );
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    Ok(buf)
}

fn prefixed_len(bytes: &[u8], what: &str) -> Result<usize> {
    let len = u32::from_le_bytes(fixed::<4>(bytes, what)?) as usize;
    ensure!(
        bytes.len() >= 4 + len,
        "truncated {}: length prefix says {} bytes, have {}",
        what,
        len,
        bytes.len() - 4
    );
    Ok(4 + len)
}

fn compare_prefixed(a: &[u8], b: &[u8], what: &str) -> Result<Ordering> {
    let a_len = prefixed_len(a, what)?;
    let b_len = prefixed_len(b, what)?;
    Ok(a[4..a_len].cmp(&b[4..b_len]))
}

fn encode_prefixed(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Unsigned 64-bit integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl Codec for U64Codec {
    type Item = u64;
    const ID: u16 = 1;

    fn encode(&self, item: &u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&item.to_be_bytes());
    }

    fn encoded_len(&self, bytes: &[u8]) -> Result<usize> {
        fixed::<8>(bytes, "u64")?;
        Ok(8)
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64> {
        Ok(u64::from_be_bytes(fixed::<8>(bytes, "u64")?))
    }
}

/// Signed 64-bit integers; the encoding sorts like the numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl Codec for I64Codec {
    type Item = i64;
    const ID: u16 = 2;

    fn encode(&self, item: &i64, out: &mut Vec<u8>) {
        out.extend_from_slice(&((*item as u64) ^ (1 << 63)).to_be_bytes());
    }

    fn encoded_len(&self, bytes: &[u8]) -> Result<usize> {
        fixed::<8>(bytes, "i64")?;
        Ok(8)
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64> {
        let raw = u64::from_be_bytes(fixed::<8>(bytes, "i64")?);
        Ok((raw ^ (1 << 63)) as i64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Item = String;
    const ID: u16 = 3;

    fn encode(&self, item: &String, out: &mut Vec<u8>) {
        encode_prefixed(item.as_bytes(), out);
    }

    fn encoded_len(&self, bytes: &[u8]) -> Result<usize> {
        prefixed_len(bytes, "string")
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        compare_prefixed(a, b, "string")
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        let len = prefixed_len(bytes, "string")?;
        String::from_utf8(bytes[4..len].to_vec()).wrap_err("stored string is not valid UTF-8")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;
    const ID: u16 = 4;

    fn encode(&self, item: &Vec<u8>, out: &mut Vec<u8>) {
        encode_prefixed(item, out);
    }

    fn encoded_len(&self, bytes: &[u8]) -> Result<usize> {
        prefixed_len(bytes, "byte string")
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        compare_prefixed(a, b, "byte string")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let len = prefixed_len(bytes, "byte string")?;
        Ok(bytes[4..len].to_vec())
    }
}

/// Strings compared without regard to case.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseFoldStringCodec;

impl Codec for CaseFoldStringCodec {
    type Item = String;
    const ID: u16 = 5;

    fn encode(&self, item: &String, out: &mut Vec<u8>) {
        StringCodec.encode(item, out);
    }

    fn encoded_len(&self, bytes: &[u8]) -> Result<usize> {
        StringCodec.encoded_len(bytes)
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        StringCodec.compare(a, b)
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        StringCodec.decode(bytes)
    }

    fn preprocess<'a>(&self, item: &'a String) -> Cow<'a, String> {
        if item.chars().any(char::is_uppercase) {
            Cow::Owned(item.to_lowercase())
        } else {
            Cow::Borrowed(item)
        }
    }
}
