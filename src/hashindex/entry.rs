//! Typed entries and their raw bucket form.
//!
//! A raw key is the codec encoding of the preprocessed key, or
//! `[len: i32 LE][ciphertext]` when the index encrypts keys. Hashing and
//! ordering always work on the plain encoding.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};

use super::bucket::{EntryLayout, RawEntryRef};
use crate::codec::{Codec, Encryption};

/// One decoded key/value pair together with its hash code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    pub hash: u64,
    pub key: K,
    pub value: V,
}

/// A key ready for lookup: `encoded` feeds the hash, `raw` is what a bucket stores.
#[derive(Debug, Clone)]
pub struct EncodedKey {
    pub encoded: Vec<u8>,
    pub raw: Vec<u8>,
}

pub struct EntryCodec<KC, VC> {
    key_codec: KC,
    value_codec: VC,
    encryption: Option<Arc<dyn Encryption>>,
}

impl<KC: Codec, VC: Codec> EntryCodec<KC, VC> {
    pub fn new(key_codec: KC, value_codec: VC, encryption: Option<Arc<dyn Encryption>>) -> Self {
        Self {
            key_codec,
            value_codec,
            encryption,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn encode_key(&self, key: &KC::Item) -> Result<EncodedKey>
    where
        KC::Item: Clone,
    {
        let key = self.key_codec.preprocess(key);
        let encoded = self.key_codec.to_bytes(&key);

        let raw = match &self.encryption {
            Some(encryption) => {
                let cipher = encryption
                    .encrypt(&encoded)
                    .wrap_err_with(|| format!("key encryption with '{}' failed", encryption.name()))?;
                let mut raw = Vec::with_capacity(4 + cipher.len());
                raw.extend_from_slice(&(cipher.len() as i32).to_le_bytes());
                raw.extend_from_slice(&cipher);
                raw
            }
            None => encoded.clone(),
        };

        Ok(EncodedKey { encoded, raw })
    }

    pub fn encode_value(&self, value: &VC::Item) -> Vec<u8> {
        self.value_codec.to_bytes(value)
    }

    /// Plain codec encoding of a stored raw key.
    pub fn plain_key<'a>(&self, raw: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        match &self.encryption {
            Some(encryption) => {
                let len = self.key_len(raw)?;
                let plain = encryption
                    .decrypt(&raw[4..len])
                    .wrap_err_with(|| format!("key decryption with '{}' failed", encryption.name()))?;
                Ok(Cow::Owned(plain))
            }
            None => Ok(Cow::Borrowed(raw)),
        }
    }

    pub fn decode_key(&self, raw: &[u8]) -> Result<KC::Item> {
        self.key_codec.decode(&self.plain_key(raw)?)
    }

    pub fn decode_value(&self, raw: &[u8]) -> Result<VC::Item> {
        self.value_codec.decode(raw)
    }

    /// Orders a stored raw key against a plain encoded key.
    pub fn compare_raw_key(&self, stored: &[u8], encoded: &[u8]) -> Result<Ordering> {
        self.key_codec.compare(&self.plain_key(stored)?, encoded)
    }

    pub fn decode_entry(&self, raw: RawEntryRef<'_>) -> Result<Entry<KC::Item, VC::Item>> {
        Ok(Entry {
            hash: raw.hash,
            key: self.decode_key(raw.key)?,
            value: self.decode_value(raw.value)?,
        })
    }
}

impl<KC: Codec, VC: Codec> EntryLayout for EntryCodec<KC, VC> {
    fn key_len(&self, bytes: &[u8]) -> Result<usize> {
        if self.encryption.is_none() {
            return self.key_codec.encoded_len(bytes);
        }
        ensure!(bytes.len() >= 4, "truncated encrypted key length");
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[..4]);
        let len = i32::from_le_bytes(len);
        ensure!(
            len >= 0 && bytes.len() >= 4 + len as usize,
            "encrypted key length {} out of range",
            len
        );
        Ok(4 + len as usize)
    }

    fn value_len(&self, bytes: &[u8]) -> Result<usize> {
        self.value_codec.encoded_len(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CaseFoldStringCodec, StringCodec, U64Codec};

    struct Xor(u8);

    impl Encryption for Xor {
        fn name(&self) -> &str {
            "xor"
        }

        fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
            Ok(plain.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
            self.encrypt(cipher)
        }
    }

    #[test]
    fn plain_keys_are_stored_as_encoded() {
        let codec = EntryCodec::new(U64Codec, StringCodec, None);
        let key = codec.encode_key(&7).unwrap();

        assert_eq!(key.raw, key.encoded);
        assert_eq!(codec.key_len(&key.raw).unwrap(), 8);
        assert_eq!(codec.decode_key(&key.raw).unwrap(), 7);
    }

    #[test]
    fn encrypted_keys_carry_a_length_prefix() {
        let codec = EntryCodec::new(StringCodec, U64Codec, Some(Arc::new(Xor(0x5A)) as Arc<dyn Encryption>));
        let key = codec.encode_key(&"secret".to_string()).unwrap();

        assert_ne!(&key.raw[4..], key.encoded.as_slice());
        assert_eq!(codec.key_len(&key.raw).unwrap(), key.raw.len());
        assert_eq!(codec.decode_key(&key.raw).unwrap(), "secret");
        assert_eq!(codec.compare_raw_key(&key.raw, &key.encoded).unwrap(), Ordering::Equal);
    }

    #[test]
    fn preprocess_runs_before_encoding() {
        let codec = EntryCodec::new(CaseFoldStringCodec, U64Codec, None);
        let upper = codec.encode_key(&"KEY".to_string()).unwrap();
        let lower = codec.encode_key(&"key".to_string()).unwrap();
        assert_eq!(upper.encoded, lower.encoded);
    }

    #[test]
    fn decode_entry_uses_both_codecs() {
        let codec = EntryCodec::new(U64Codec, StringCodec, None);
        let key = codec.encode_key(&3).unwrap();
        let value = codec.encode_value(&"three".to_string());

        let entry = codec
            .decode_entry(RawEntryRef {
                hash: 99,
                key: &key.raw,
                value: &value,
            })
            .unwrap();
        assert_eq!(entry, Entry { hash: 99, key: 3, value: "three".to_string() });
    }
}
