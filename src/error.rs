//! Error taxonomy for snapshot i/o and validation.
//!
//! Tree operations themselves are infallible: `find` signals absence by
//! returning `0` and `remove` is a silent no-op on a missing key. Errors
//! only arise from snapshot i/o, snapshot decoding, and the structural
//! validator.

use std::io;

use thiserror::Error;

use crate::key::KeyType;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by [`BPlusTree::serialize`], [`BPlusTree::deserialize`]
/// and [`BPlusTree::validate`].
///
/// [`BPlusTree::serialize`]: crate::BPlusTree::serialize
/// [`BPlusTree::deserialize`]: crate::BPlusTree::deserialize
/// [`BPlusTree::validate`]: crate::BPlusTree::validate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// File open, read, or write failure during snapshot i/o.
    #[error("snapshot i/o: {0}")]
    Io(#[from] io::Error),

    /// The snapshot data ended in the middle of a record.
    #[error("snapshot data truncated")]
    Truncated,

    /// A record type byte that is neither leaf (1) nor internal (0).
    #[error("unknown node type {0:#04x} in snapshot data")]
    UnknownNodeType(u8),

    /// The header carries a key-type tag outside the supported set.
    #[error("unsupported key type tag {0}")]
    UnsupportedKeyType(u32),

    /// The snapshot was written with a different key type than the tree it
    /// is being restored into.
    #[error("key type mismatch: snapshot holds {found:?}, tree expects {expected:?}")]
    KeyTypeMismatch {
        /// Key type of the tree instance.
        expected: KeyType,
        /// Key type recorded in the snapshot header.
        found: KeyType,
    },

    /// The snapshot violates the format in some other way: dangling or
    /// duplicate node ids, a negative size, an order below the minimum.
    #[error("snapshot corrupted: {0}")]
    Corrupted(&'static str),

    /// A structural invariant does not hold.
    #[error("validation failed: {0}")]
    Validation(String),
}
