//! The tree handle and its point/range operations.
//!
//! # Concurrency model
//!
//! Every operation takes the snapshot latch shared and runs inside a
//! [`seize`] guard. Descent follows the latch-crabbing protocol in
//! [`descend`]: readers hold at most two shared latches at a time, writers
//! keep the exclusively latched suffix of the path whose nodes a split or
//! merge might still change. Structural maintenance lives in [`split`] and
//! [`underflow`]; the snapshot codec in [`snapshot`] runs under the
//! exclusive snapshot latch instead of node latches.
//!
//! Latch ordering is strictly parent before child, and left before right
//! among leaves, so waits cannot cycle.

use std::fmt as StdFmt;
use std::ptr as StdPtr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use seize::Collector;

use crate::key::IndexKey;
use crate::node::{Node, NodeRef};

mod descend;
mod snapshot;
mod split;
mod underflow;
mod validate;

use descend::WriteIntent;

// ============================================================================
//  BPlusTree
// ============================================================================

/// Root and head-leaf pointers, guarded by one mutex so they move
/// together.
struct RootSet<K> {
    /// Topmost node; null until the first insert.
    root: NodeRef<K>,
    /// Leftmost leaf, the start of the leaf list; null while `root` is.
    head_leaf: NodeRef<K>,
}

/// A concurrent B+ tree index from ordered keys to opaque `u64` values.
///
/// The tree is parameterized by its *order*: the maximum number of keys a
/// node may hold. Value `0` is reserved to mean "absent"; [`find`] returns
/// it for missing keys and callers should not store it.
///
/// All operations take `&self` and may be called from any number of
/// threads; mutations on distinct keys whose latch zones do not overlap
/// proceed in parallel.
///
/// [`find`]: BPlusTree::find
pub struct BPlusTree<K: IndexKey> {
    /// Maximum keys per node. Replaced wholesale by [`BPlusTree::deserialize`].
    order: AtomicUsize,
    /// Root and head-leaf pointers behind the root guard.
    roots: Mutex<RootSet<K>>,
    /// Taken shared by every tree operation, exclusive by the snapshot
    /// codec and the validator.
    snapshot_latch: RwLock<()>,
    /// Deferred reclamation for nodes delinked while other threads may
    /// still hold stale pointers to them.
    collector: Collector,
    /// Live entry count.
    len: AtomicUsize,
}

// SAFETY: nodes are only reached through the latching protocol; the raw
// pointers in `RootSet` are guarded by the root mutex plus node latches,
// and delinked nodes are reclaimed through the collector.
unsafe impl<K: IndexKey> Send for BPlusTree<K> {}
unsafe impl<K: IndexKey> Sync for BPlusTree<K> {}

impl<K: IndexKey> BPlusTree<K> {
    /// Create an empty tree of the given order.
    ///
    /// # Panics
    ///
    /// Panics if `order < 2`: a node must be able to hold two keys for a
    /// split to leave both halves non-empty.
    #[must_use]
    pub fn new(order: usize) -> Self {
        assert!(order >= 2, "order must be at least 2, got {order}");
        Self {
            order: AtomicUsize::new(order),
            roots: Mutex::new(RootSet {
                root: StdPtr::null_mut(),
                head_leaf: StdPtr::null_mut(),
            }),
            snapshot_latch: RwLock::new(()),
            collector: Collector::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Current order (maximum keys per node).
    #[must_use]
    pub fn order(&self) -> usize {
        self.order.load(Ordering::Acquire)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the tree holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    //  Point and range operations
    // ========================================================================

    /// Look up `key`, returning its value or `0` when absent.
    pub fn find(&self, key: &K) -> u64 {
        let _snap = self.snapshot_latch.read();
        let _guard = self.collector.enter();
        let Some(leaf) = self.descend_read(key) else {
            return 0;
        };
        // SAFETY: the descent returned `leaf` with its shared latch held.
        unsafe {
            let data = (*leaf).data();
            let index = data.find_index(key);
            let value = if index < data.len() && data.keys[index] == *key {
                data.values()[index]
            } else {
                0
            };
            (*leaf).latch().unlock_shared();
            value
        }
    }

    /// Insert `key` with `value`, overwriting any existing value.
    pub fn insert(&self, key: K, value: u64) {
        let _snap = self.snapshot_latch.read();
        let _guard = self.collector.enter();
        self.ensure_root();
        let order = self.order();
        let (leaf, mut queue) = self.descend_write(&key, WriteIntent::Insert, order);
        // SAFETY: the descent returned `leaf` exclusively latched, with
        // every ancestor a split may touch still latched in `queue`.
        unsafe {
            let added = (*leaf)
                .data_mut()
                .insert_in_node(key, value, StdPtr::null_mut());
            if added {
                self.len.fetch_add(1, Ordering::AcqRel);
                if (*leaf).data().is_overfull(order) {
                    self.handle_split(leaf, order);
                }
            }
        }
        queue.release();
    }

    /// Remove `key` if present; a silent no-op otherwise.
    pub fn remove(&self, key: &K) {
        let _snap = self.snapshot_latch.read();
        let guard = self.collector.enter();
        if self.roots.lock().root.is_null() {
            return;
        }
        let order = self.order();
        let (leaf, mut queue) = self.descend_write(key, WriteIntent::Delete, order);
        // SAFETY: the descent returned `leaf` exclusively latched, with
        // every ancestor a merge may touch still latched in `queue`.
        unsafe {
            let removed = {
                let data = (*leaf).data_mut();
                let index = data.find_index(key);
                if index < data.len() && data.keys[index] == *key {
                    data.remove_from_node(index);
                    true
                } else {
                    false
                }
            };
            if removed {
                self.len.fetch_sub(1, Ordering::AcqRel);
                self.handle_underflow(leaf, order, &guard);
            }
        }
        queue.release();
    }

    /// All entries with `lo <= key <= hi`, in ascending key order.
    ///
    /// The scan positions at the leaf that would contain `lo` and walks
    /// the leaf list with shared-latch lock coupling, so it observes each
    /// leaf atomically and a consistent prefix overall.
    pub fn range_find(&self, lo: &K, hi: &K) -> Vec<(K, u64)> {
        let _snap = self.snapshot_latch.read();
        let _guard = self.collector.enter();
        let mut results = Vec::new();
        let Some(mut leaf) = self.descend_read(lo) else {
            return results;
        };
        // SAFETY: the current leaf's shared latch is held at every
        // dereference; the next leaf is latched before the current one is
        // released, so the link is valid at the instant of handoff.
        unsafe {
            let mut start = (*leaf).data().find_index(lo);
            loop {
                let data = (*leaf).data();
                for i in start..data.len() {
                    if data.keys[i] > *hi {
                        (*leaf).latch().unlock_shared();
                        return results;
                    }
                    results.push((data.keys[i].clone(), data.values()[i]));
                }
                let next = data.next_leaf();
                if next.is_null() {
                    (*leaf).latch().unlock_shared();
                    return results;
                }
                (*next).latch().lock_shared();
                (*leaf).latch().unlock_shared();
                leaf = next;
                start = 0;
            }
        }
    }
}

impl<K: IndexKey> Drop for BPlusTree<K> {
    fn drop(&mut self) {
        let roots = self.roots.get_mut();
        if !roots.root.is_null() {
            // SAFETY: `&mut self` proves exclusive access; no other thread
            // can reach the nodes anymore.
            unsafe { Node::free_subtree(roots.root) };
        }
    }
}

impl<K: IndexKey> StdFmt::Debug for BPlusTree<K> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("BPlusTree")
            .field("order", &self.order())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
