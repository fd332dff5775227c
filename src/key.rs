//! Key types and their snapshot encodings.
//!
//! Snapshots record the key type as a numeric tag in the header so that a
//! tree instantiated over one key type refuses a snapshot written with
//! another. Two encodings exist, matching the tags:
//!
//! - tag 0: signed 32-bit integers, little-endian
//! - tag 1: byte strings, `u32` length prefix followed by the bytes
//!
//! `String` keys share tag 1 with `Vec<u8>`; they decode the same bytes
//! and additionally require valid UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Key-type tag stored in a snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeyType {
    /// Signed 32-bit integer keys.
    Int = 0,
    /// Variable-length byte-string keys.
    Bytes = 1,
}

impl TryFrom<u32> for KeyType {
    type Error = Error;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(KeyType::Int),
            1 => Ok(KeyType::Bytes),
            other => Err(Error::UnsupportedKeyType(other)),
        }
    }
}

/// A key storable in a [`BPlusTree`].
///
/// Implementations pair a total order with a binary encoding. `decode`
/// must accept exactly what `encode` produces, and must fail with
/// [`Error::Truncated`] rather than panic when the buffer runs short.
///
/// [`BPlusTree`]: crate::BPlusTree
pub trait IndexKey: Ord + Clone + Send + Sync + 'static {
    /// Tag recorded in the snapshot header for this key type.
    const KEY_TYPE: KeyType;

    /// Append the binary encoding of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Decode one key from the front of `buf`, advancing it.
    ///
    /// # Errors
    ///
    /// [`Error::Truncated`] if `buf` holds fewer bytes than the encoding
    /// requires; [`Error::Corrupted`] if the bytes are not a valid key.
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

impl IndexKey for i32 {
    const KEY_TYPE: KeyType = KeyType::Int;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::Truncated);
        }
        Ok(buf.get_i32_le())
    }
}

impl IndexKey for Vec<u8> {
    const KEY_TYPE: KeyType = KeyType::Bytes;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = decode_len(buf)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(bytes)
    }
}

impl IndexKey for String {
    const KEY_TYPE: KeyType = KeyType::Bytes;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = decode_len(buf)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        String::from_utf8(bytes).map_err(|_| Error::Corrupted("string key is not valid utf-8"))
    }
}

/// Read a `u32` length prefix and bound-check it against the buffer.
fn decode_len(buf: &mut Bytes) -> Result<usize> {
    if buf.remaining() < 4 {
        return Err(Error::Truncated);
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(Error::Truncated);
    }
    Ok(len)
}
