//! Overflow handling: leaf and internal splits with upward propagation.
//!
//! A split halves an overfull node and promotes a separator into the
//! parent; if that overfills the parent the split recurses. When the
//! node that split was the root, a fresh internal root is published under
//! the root guard.

use crate::key::IndexKey;
use crate::node::{Node, NodeRef};
use crate::tracing_helpers::debug_log;

use super::BPlusTree;

impl<K: IndexKey> BPlusTree<K> {
    /// Split `node` and propagate upward until a parent absorbs the
    /// separator or a new root is published.
    ///
    /// # Safety
    ///
    /// `node` must be exclusively latched and overfull, and every ancestor
    /// a split may modify must be exclusively latched by this thread
    /// (guaranteed by the write descent's safety rule: an overfull node
    /// was unsafe during the descent, so its parent latch was kept).
    pub(crate) unsafe fn handle_split(&self, mut node: NodeRef<K>, order: usize) {
        loop {
            // SAFETY: `node` is exclusively latched per the contract.
            let (separator, new_node) = unsafe {
                if (*node).data().is_leaf() {
                    Self::split_leaf(node)
                } else {
                    Self::split_internal(node)
                }
            };

            // Root split: publish a fresh internal root.
            {
                let mut roots = self.roots.lock();
                if roots.root == node {
                    let new_root = Node::new_internal();
                    // SAFETY: `new_root` is unpublished until the store
                    // below; `node` is latched and `new_node` can only be
                    // reached through latches this thread holds.
                    unsafe {
                        let root_data = (*new_root).data_mut();
                        root_data.keys.push(separator);
                        root_data.children_mut().push(node);
                        root_data.children_mut().push(new_node);
                        (*node).data_mut().parent = new_root;
                        (*new_node).data_mut().parent = new_root;
                    }
                    roots.root = new_root;
                    debug_log!(order, "root split, tree grew a level");
                    return;
                }
            }

            // SAFETY: `node` is not the root, so the descent kept its
            // parent exclusively latched.
            let parent = unsafe { (*node).data().parent };
            debug_assert!(!parent.is_null());
            // SAFETY: parent exclusively latched; `new_node` becomes
            // reachable only through it, and it stays latched until the
            // descent queue releases.
            unsafe {
                let parent_data = (*parent).data_mut();
                parent_data.insert_in_node(separator, 0, new_node);
                (*new_node).data_mut().parent = parent;
                if !parent_data.is_overfull(order) {
                    return;
                }
            }
            node = parent;
        }
    }

    /// Split an overfull leaf. Returns the promoted separator (a copy of
    /// the new right leaf's first key) and the new leaf, already spliced
    /// into the leaf list.
    ///
    /// # Safety
    ///
    /// `node` must be an exclusively latched, overfull leaf.
    unsafe fn split_leaf(node: NodeRef<K>) -> (K, NodeRef<K>) {
        let new_leaf = Node::new_leaf();
        let (separator, old_next) = {
            // SAFETY: `node` latched per contract; `new_leaf` is private
            // to this thread until published below.
            unsafe {
                let data = (*node).data_mut();
                let split_at = (data.len() + 1) / 2;
                let tail_keys = data.keys.split_off(split_at);
                let tail_values = data.values_mut().split_off(split_at);
                let old_next = data.next_leaf();
                let separator = tail_keys[0].clone();

                let new_data = (*new_leaf).data_mut();
                new_data.keys = tail_keys;
                *new_data.values_mut() = tail_values;
                new_data.set_prev(node);
                new_data.set_next(old_next);

                data.set_next(new_leaf);
                (separator, old_next)
            }
        };

        // Fix the old successor's back link under its own latch. Taking a
        // latch to the right while holding `node` follows the leaf-level
        // left-to-right ordering.
        if !old_next.is_null() {
            // SAFETY: `old_next` is a live leaf; it cannot be delinked
            // while `node`, its predecessor, is exclusively latched.
            unsafe {
                (*old_next).latch().lock_exclusive();
                (*old_next).data_mut().set_prev(new_leaf);
                (*old_next).latch().unlock_exclusive();
            }
        }

        debug_log!("leaf split");
        (separator, new_leaf)
    }

    /// Split an overfull internal node. The middle key moves up as the
    /// separator; the right half moves to a new internal node whose
    /// children are re-parented.
    ///
    /// # Safety
    ///
    /// `node` must be an exclusively latched, overfull internal node.
    unsafe fn split_internal(node: NodeRef<K>) -> (K, NodeRef<K>) {
        let new_internal = Node::new_internal();
        // SAFETY: `node` latched per contract; `new_internal` is private
        // to this thread until the caller publishes it.
        unsafe {
            let data = (*node).data_mut();
            let split_at = data.len() / 2;
            let tail_keys = data.keys.split_off(split_at + 1);
            let separator = data
                .keys
                .pop()
                .expect("an overfull internal node has a middle key");
            let tail_children = data.children_mut().split_off(split_at + 1);

            let new_data = (*new_internal).data_mut();
            new_data.keys = tail_keys;
            *new_data.children_mut() = tail_children;
            for &child in new_data.children() {
                // Back-references are only read by writers that hold the
                // (old) parent's exclusive latch, which this thread has.
                (*child).data_mut().parent = new_internal;
            }

            debug_log!("internal split");
            (separator, new_internal)
        }
    }
}
