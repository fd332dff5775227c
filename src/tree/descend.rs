//! Latch-crabbing descent from the root to a target leaf.
//!
//! Read mode holds at most two shared latches at a time: the child's
//! latch is acquired before the parent's is released. Write mode keeps
//! the exclusively latched suffix of the path in a [`LatchQueue`];
//! whenever a newly latched child is *safe* for the pending operation —
//! it cannot push a split or merge up to its parent — every latch above
//! it is released, outermost first.

use std::collections::VecDeque;

use crate::key::IndexKey;
use crate::node::{Node, NodeData, NodeRef};
use crate::tracing_helpers::trace_log;

use super::BPlusTree;

/// What a write descent is about to do; selects the safety predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteIntent {
    Insert,
    Delete,
}

/// Exclusively latched nodes of a write descent, in root-to-leaf order.
///
/// Released outermost-first, mirroring acquisition order, and on drop in
/// case the operation unwinds.
pub(crate) struct LatchQueue<K: IndexKey> {
    nodes: VecDeque<NodeRef<K>>,
}

impl<K: IndexKey> LatchQueue<K> {
    fn new() -> Self {
        Self {
            nodes: VecDeque::new(),
        }
    }

    fn push(&mut self, node: NodeRef<K>) {
        self.nodes.push_back(node);
    }

    /// Release every held latch, outermost first.
    pub(crate) fn release(&mut self) {
        while let Some(node) = self.nodes.pop_front() {
            // SAFETY: every node in the queue was latched exclusive by the
            // descent that pushed it and has not been released since.
            unsafe { (*node).latch().unlock_exclusive() };
        }
    }
}

impl<K: IndexKey> Drop for LatchQueue<K> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Child to follow for `key`: the slot of the first key `>= key`,
/// stepping right on an exact separator match (separators are copies of
/// the leftmost key of their right subtree).
fn route<K: IndexKey>(data: &NodeData<K>, key: &K) -> NodeRef<K> {
    let mut index = data.find_index(key);
    if index < data.len() && data.keys[index] == *key {
        index += 1;
    }
    data.children()[index]
}

impl<K: IndexKey> BPlusTree<K> {
    /// Create the root leaf if the tree is empty.
    pub(crate) fn ensure_root(&self) {
        let mut roots = self.roots.lock();
        if roots.root.is_null() {
            let leaf = Node::new_leaf();
            roots.root = leaf;
            roots.head_leaf = leaf;
        }
    }

    /// Latch the current root node in the requested mode.
    ///
    /// The root pointer is read under the root guard, the node is latched
    /// *without* the guard, and the pointer is then re-checked. A writer
    /// publishing a new root does so while holding the old root's
    /// exclusive latch, so a successful re-check proves the latched node
    /// is still the root; holding the guard across the blocking
    /// acquisition instead would deadlock against that writer.
    ///
    /// Returns `None` when the tree is empty.
    fn latch_root(&self, exclusive: bool) -> Option<NodeRef<K>> {
        loop {
            let root = self.roots.lock().root;
            if root.is_null() {
                return None;
            }
            // SAFETY: a stale `root` cannot be freed out from under us:
            // replaced roots are retired through the collector and this
            // operation holds a collector guard.
            unsafe {
                if exclusive {
                    (*root).latch().lock_exclusive();
                } else {
                    (*root).latch().lock_shared();
                }
            }
            if self.roots.lock().root == root {
                return Some(root);
            }
            trace_log!("root moved during latch acquisition, retrying");
            // SAFETY: latched just above, in the same mode.
            unsafe {
                if exclusive {
                    (*root).latch().unlock_exclusive();
                } else {
                    (*root).latch().unlock_shared();
                }
            }
        }
    }

    /// Shared-mode descent. Returns the leaf that would contain `key`
    /// with its shared latch held, or `None` when the tree is empty.
    pub(crate) fn descend_read(&self, key: &K) -> Option<NodeRef<K>> {
        let mut node = self.latch_root(false)?;
        // SAFETY: `node` is shared-latched at every iteration; the child
        // is latched before the parent is released, so the child pointer
        // stays valid across the handoff.
        unsafe {
            loop {
                let data = (*node).data();
                if data.is_leaf() {
                    return Some(node);
                }
                let child = route(data, key);
                (*child).latch().lock_shared();
                (*node).latch().unlock_shared();
                node = child;
            }
        }
    }

    /// Exclusive-mode descent. Returns the leaf that would contain `key`
    /// and the queue of still-held exclusive latches, leaf included.
    ///
    /// Callers must have materialized the root first (see
    /// [`BPlusTree::ensure_root`]); the root cannot disappear afterwards
    /// because deserialize, the only operation that clears it, needs the
    /// snapshot latch exclusively.
    pub(crate) fn descend_write(
        &self,
        key: &K,
        intent: WriteIntent,
        order: usize,
    ) -> (NodeRef<K>, LatchQueue<K>) {
        let mut queue = LatchQueue::new();
        let root = self
            .latch_root(true)
            .expect("write descent requires a materialized root");
        queue.push(root);
        let mut node = root;
        // SAFETY: `node` is exclusively latched at every iteration, as is
        // everything in `queue`.
        unsafe {
            loop {
                let data = (*node).data();
                if data.is_leaf() {
                    return (node, queue);
                }
                let child = route(data, key);
                (*child).latch().lock_exclusive();
                let child_is_safe = {
                    let child_data = (*child).data();
                    match intent {
                        WriteIntent::Insert => child_data.is_insert_safe(order),
                        WriteIntent::Delete => child_data.is_delete_safe(order),
                    }
                };
                if child_is_safe {
                    // The child absorbs any structural change; ancestors
                    // can admit other writers again.
                    queue.release();
                }
                queue.push(child);
                node = child;
            }
        }
    }
}
