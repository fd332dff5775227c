//! # crabtree
//!
//! A concurrent, in-memory B+ tree index mapping ordered keys to opaque
//! 64-bit values, with whole-tree snapshots to a `.header`/`.data` file
//! pair.
//!
//! ## Design
//!
//! Concurrency uses fine-grained latch crabbing instead of a tree-wide
//! lock:
//!
//! - Every node carries its own reader/writer latch.
//! - Readers hold at most two shared latches at a time while descending:
//!   the child's latch is acquired before the parent's is released.
//! - Writers keep the exclusively latched suffix of the root-to-leaf path
//!   whose nodes could still be changed by a split or merge, releasing
//!   ancestors as soon as a descendant is proven safe.
//! - Range scans walk the doubly linked leaf list with shared-latch lock
//!   coupling.
//!
//! Structure mutations (split, borrow, merge, root replacement) happen
//! entirely under those latches. Nodes removed from the tree are reclaimed
//! through [`seize`], so a thread that raced the removal never touches
//! freed memory.
//!
//! Snapshots serialize the whole tree under an exclusive tree-wide latch;
//! see [`BPlusTree::serialize`] and [`BPlusTree::deserialize`].
//!
//! ## Example
//!
//! ```rust
//! use crabtree::BPlusTree;
//!
//! let tree = BPlusTree::new(4);
//! tree.insert(7, 700);
//! tree.insert(3, 300);
//! assert_eq!(tree.find(&7), 700);
//! assert_eq!(tree.range_find(&3, &7), vec![(3, 300), (7, 700)]);
//! tree.remove(&7);
//! assert_eq!(tree.find(&7), 0);
//! ```

pub mod error;
pub mod key;
mod latch;
mod node;
mod tracing_helpers;
mod tree;

pub use error::{Error, Result};
pub use key::{IndexKey, KeyType};
pub use tree::BPlusTree;
