//! Underflow handling: borrow from a sibling, merge, root collapse.
//!
//! A node that drops below minimum occupancy first tries to borrow an
//! entry from the left sibling, then from the right; if neither can lend,
//! it merges with a sibling (preferring the left) and the separator comes
//! out of the parent, which may underflow in turn. An internal root left
//! with no keys collapses to its sole child.
//!
//! Sibling latches are taken left-to-right at the leaf level so waits
//! against range scans, which also move rightward, cannot cycle. To latch
//! a *left* sibling the target's latch is dropped and re-taken after it;
//! the exclusively latched parent keeps the whole zone closed to other
//! writers in between, and scans passing through see a valid (merely
//! underfull) leaf.

use std::mem as StdMem;
use std::ptr as StdPtr;

use seize::{Collector, Guard, LocalGuard};

use crate::key::IndexKey;
use crate::node::{Node, NodeRef};
use crate::tracing_helpers::debug_log;

use super::BPlusTree;

/// Reclaim callback for nodes retired after a merge or a root collapse.
///
/// # Safety
///
/// `ptr` must come from `Node::new_leaf`/`Node::new_internal` and be fully
/// delinked from the tree.
unsafe fn reclaim_node<K: IndexKey>(ptr: *mut Node<K>, _collector: &Collector) {
    // SAFETY: per contract; seize guarantees no guard can still reach it.
    unsafe { Node::free(ptr) }
}

impl<K: IndexKey> BPlusTree<K> {
    /// Restore minimum occupancy at `node` after a removal, recursing
    /// upward while merges leave ancestors underfull.
    ///
    /// # Safety
    ///
    /// `node` must be exclusively latched, and every ancestor an underflow
    /// may modify must be exclusively latched by this thread (guaranteed
    /// by the write descent's safety rule: a node at minimum occupancy was
    /// unsafe during the descent, so its parent latch was kept).
    pub(crate) unsafe fn handle_underflow(
        &self,
        mut node: NodeRef<K>,
        order: usize,
        guard: &LocalGuard<'_>,
    ) {
        loop {
            // SAFETY: `node` is exclusively latched per the contract.
            let underfull = unsafe { (*node).data().is_underfull(order) };
            if !underfull {
                return;
            }
            // The root has no minimum; it shrinks through the collapse
            // path below instead.
            if self.roots.lock().root == node {
                return;
            }

            // SAFETY: `node` is not the root, so its parent exists and its
            // latch is still held by this thread.
            let parent = unsafe { (*node).data().parent };
            debug_assert!(!parent.is_null());
            // SAFETY: parent exclusively latched.
            let child_index = unsafe {
                (*parent)
                    .data()
                    .child_index_of(node)
                    .expect("underfull node is a child of its parent")
            };

            let left = if child_index > 0 {
                // SAFETY: parent latched, so the sibling slot is stable.
                let left = unsafe { (*parent).data().children()[child_index - 1] };
                // Left-to-right acquisition: give up the target, latch the
                // sibling, re-latch the target.
                unsafe {
                    (*node).latch().unlock_exclusive();
                    (*left).latch().lock_exclusive();
                    (*node).latch().lock_exclusive();
                }
                Some(left)
            } else {
                None
            };

            if let Some(left) = left {
                // A sibling can lend exactly when losing one entry keeps
                // it no lower than its own (kind-specific) minimum.
                // SAFETY: parent, left, and node are exclusively latched.
                let left_can_lend = unsafe {
                    let left_data = (*left).data();
                    left_data.len() > left_data.min_keys(order)
                };
                if left_can_lend {
                    unsafe {
                        Self::borrow_from_left(parent, child_index, node, left);
                        (*left).latch().unlock_exclusive();
                    }
                    debug_log!(child_index, "borrowed from left sibling");
                    return;
                }
            }

            let right = {
                // SAFETY: parent latched.
                let parent_data = unsafe { (*parent).data() };
                if child_index + 1 < parent_data.children().len() {
                    Some(parent_data.children()[child_index + 1])
                } else {
                    None
                }
            };
            if let Some(right) = right {
                // SAFETY: `right` sits to the right of `node`, so latching
                // it while holding `node` keeps the left-to-right order.
                unsafe { (*right).latch().lock_exclusive() };
                let right_can_lend = unsafe {
                    let right_data = (*right).data();
                    right_data.len() > right_data.min_keys(order)
                };
                if right_can_lend {
                    unsafe {
                        Self::borrow_from_right(parent, child_index, node, right);
                        (*right).latch().unlock_exclusive();
                        if let Some(left) = left {
                            (*left).latch().unlock_exclusive();
                        }
                    }
                    debug_log!(child_index, "borrowed from right sibling");
                    return;
                }
                // Cannot lend. Release it; if it turns out to be the merge
                // partner, merge_nodes re-latches what it touches.
                unsafe { (*right).latch().unlock_exclusive() };
            }

            // Merge, preferring the left sibling.
            if let Some(left) = left {
                // SAFETY: parent, left, node exclusively latched; `node`
                // is absorbed into `left` and retired. Its latch stays in
                // the descent queue, which is released before this
                // thread's guard drops, so the deferred free cannot race
                // the unlock.
                unsafe {
                    Self::merge_nodes(parent, child_index - 1, left, node, guard);
                    (*left).latch().unlock_exclusive();
                }
            } else {
                let right = right.expect("an underfull non-root node has a sibling");
                // SAFETY: re-latch `right` (still left-to-right) and
                // absorb it into `node`.
                unsafe {
                    (*right).latch().lock_exclusive();
                    Self::merge_nodes(parent, child_index, node, right, guard);
                    (*right).latch().unlock_exclusive();
                }
            }

            // The merge removed a separator from the parent: collapse an
            // internal root that ran empty, or keep propagating.
            {
                let mut roots = self.roots.lock();
                if roots.root == parent {
                    // SAFETY: parent exclusively latched.
                    if unsafe { (*parent).data().len() } == 0 {
                        let new_root = unsafe { (*parent).data().children()[0] };
                        // SAFETY: the back-reference is cleared while the
                        // old parent is exclusively latched, which is the
                        // only state in which other writers read it.
                        unsafe { (*new_root).data_mut().parent = StdPtr::null_mut() };
                        roots.root = new_root;
                        debug_log!("root collapsed, tree lost a level");
                        // SAFETY: the old root is delinked; any thread
                        // holding a stale pointer to it sits inside a
                        // collector guard. Its latch is released by the
                        // descent queue before this thread's guard drops.
                        unsafe { guard.defer_retire(parent, reclaim_node::<K>) };
                    }
                    return;
                }
            }
            node = parent;
        }
    }

    /// Move the rightmost entry of `left` into `node`.
    ///
    /// # Safety
    ///
    /// `parent`, `node`, and `left` must be exclusively latched, with
    /// `left` at `child_index - 1` under `parent`.
    unsafe fn borrow_from_left(
        parent: NodeRef<K>,
        child_index: usize,
        node: NodeRef<K>,
        left: NodeRef<K>,
    ) {
        // SAFETY: all three nodes are latched per the contract and
        // pairwise distinct.
        unsafe {
            let node_data = (*node).data_mut();
            let left_data = (*left).data_mut();
            let parent_data = (*parent).data_mut();
            if node_data.is_leaf() {
                let key = left_data.keys.pop().expect("lending sibling is non-empty");
                let value = left_data
                    .values_mut()
                    .pop()
                    .expect("leaf values parallel keys");
                node_data.keys.insert(0, key);
                node_data.values_mut().insert(0, value);
                parent_data.keys[child_index - 1] = node_data.keys[0].clone();
            } else {
                // Rotate through the parent: the separator comes down, the
                // sibling's last key goes up, its last child moves over.
                let up = left_data.keys.pop().expect("lending sibling is non-empty");
                let down = StdMem::replace(&mut parent_data.keys[child_index - 1], up);
                node_data.keys.insert(0, down);
                let child = left_data
                    .children_mut()
                    .pop()
                    .expect("internal children outnumber keys by one");
                (*child).data_mut().parent = node;
                node_data.children_mut().insert(0, child);
            }
        }
    }

    /// Move the leftmost entry of `right` into `node`.
    ///
    /// # Safety
    ///
    /// `parent`, `node`, and `right` must be exclusively latched, with
    /// `right` at `child_index + 1` under `parent`.
    unsafe fn borrow_from_right(
        parent: NodeRef<K>,
        child_index: usize,
        node: NodeRef<K>,
        right: NodeRef<K>,
    ) {
        // SAFETY: all three nodes are latched per the contract and
        // pairwise distinct.
        unsafe {
            let node_data = (*node).data_mut();
            let right_data = (*right).data_mut();
            let parent_data = (*parent).data_mut();
            if node_data.is_leaf() {
                let key = right_data.keys.remove(0);
                let value = right_data.values_mut().remove(0);
                node_data.keys.push(key);
                node_data.values_mut().push(value);
                parent_data.keys[child_index] = right_data.keys[0].clone();
            } else {
                let up = right_data.keys.remove(0);
                let down = StdMem::replace(&mut parent_data.keys[child_index], up);
                node_data.keys.push(down);
                let child = right_data.children_mut().remove(0);
                (*child).data_mut().parent = node;
                node_data.children_mut().push(child);
            }
        }
    }

    /// Merge `right` into `left` (adjacent children of `parent` around
    /// separator `sep_index`), fix the leaf list, drop the separator from
    /// the parent, and retire `right`.
    ///
    /// # Safety
    ///
    /// `parent`, `left`, and `right` must be exclusively latched, with
    /// `right` immediately to the right of `left` under `parent`.
    unsafe fn merge_nodes(
        parent: NodeRef<K>,
        sep_index: usize,
        left: NodeRef<K>,
        right: NodeRef<K>,
        guard: &LocalGuard<'_>,
    ) {
        // SAFETY: all three nodes are latched per the contract.
        unsafe {
            let left_data = (*left).data_mut();
            let right_data = (*right).data_mut();
            if left_data.is_leaf() {
                left_data.keys.append(&mut right_data.keys);
                left_data.values_mut().append(right_data.values_mut());

                let new_next = right_data.next_leaf();
                left_data.set_next(new_next);
                if !new_next.is_null() {
                    // Rightward latch to fix the successor's back link.
                    (*new_next).latch().lock_exclusive();
                    (*new_next).data_mut().set_prev(left);
                    (*new_next).latch().unlock_exclusive();
                }
            } else {
                let separator = (*parent).data().keys[sep_index].clone();
                left_data.keys.push(separator);
                left_data.keys.append(&mut right_data.keys);
                let moved = StdMem::take(right_data.children_mut());
                for &child in &moved {
                    (*child).data_mut().parent = left;
                }
                left_data.children_mut().extend(moved);
            }
            (*parent).data_mut().remove_from_node(sep_index);
            debug_log!(sep_index, "merged siblings");
            // SAFETY: `right` is fully delinked; any thread that read a
            // stale pointer to it sits inside a collector guard.
            guard.defer_retire(right, reclaim_node::<K>);
        }
    }
}
