//! Structural invariant checks.
//!
//! Tests call [`BPlusTree::validate`] after mutation sequences; it walks
//! the whole tree under the exclusive snapshot latch and reports the
//! first violated invariant.

use std::ptr as StdPtr;

use crate::error::{Error, Result};
use crate::key::IndexKey;
use crate::node::{NodeKind, NodeRef};

use super::BPlusTree;

impl<K: IndexKey> BPlusTree<K> {
    /// Check the structural invariants, failing with
    /// [`Error::Validation`] on the first violation:
    ///
    /// 1. keys are strictly increasing within every node;
    /// 2. every key in a subtree respects the separators above it;
    /// 3. all leaves sit at the same depth;
    /// 4. every non-root leaf holds between `(order + 1) / 2` and `order`
    ///    keys, every non-root internal between `order / 2` and `order`
    ///    (its minimum is counted in children);
    /// 5. the leaf list visits exactly the leaves, in order, with `prev`
    ///    mirroring `next`;
    /// 6. parent back-references form a tree rooted at the root;
    ///
    /// plus the bookkeeping check that [`BPlusTree::len`] equals the
    /// number of entries in the leaves.
    ///
    /// Takes the snapshot latch exclusive, so it must not be called from
    /// a thread that holds any tree latch.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] describing the violated invariant.
    pub fn validate(&self) -> Result<()> {
        let _snap = self.snapshot_latch.write();
        let (root, head_leaf) = {
            let roots = self.roots.lock();
            (roots.root, roots.head_leaf)
        };
        if root.is_null() {
            if !head_leaf.is_null() {
                return Err(Error::Validation("empty tree with a head leaf".into()));
            }
            if self.len() != 0 {
                return Err(Error::Validation("empty tree with a nonzero length".into()));
            }
            return Ok(());
        }

        let order = self.order();
        let mut leaves = Vec::new();
        // SAFETY: the exclusive snapshot latch makes this thread the sole
        // accessor for the whole walk.
        unsafe {
            check_subtree(root, order, root, StdPtr::null_mut(), None, None, &mut leaves)?;

            if head_leaf != leaves[0] {
                return Err(Error::Validation(
                    "head leaf is not the leftmost leaf".into(),
                ));
            }

            // The chain through `next` must visit the in-order leaves
            // exactly, with `prev` as its mirror image.
            let mut previous: NodeRef<K> = StdPtr::null_mut();
            for (position, &leaf) in leaves.iter().enumerate() {
                let data = (*leaf).data();
                if data.prev_leaf() != previous {
                    return Err(Error::Validation(format!(
                        "prev link wrong at leaf {position}"
                    )));
                }
                if !previous.is_null() && (*previous).data().next_leaf() != leaf {
                    return Err(Error::Validation(format!(
                        "next link wrong before leaf {position}"
                    )));
                }
                previous = leaf;
            }
            if !(*previous).data().next_leaf().is_null() {
                return Err(Error::Validation(
                    "leaf chain continues past the rightmost leaf".into(),
                ));
            }

            let entries: usize = leaves.iter().map(|&leaf| (*leaf).data().len()).sum();
            if entries != self.len() {
                return Err(Error::Validation(format!(
                    "length {} does not match {entries} entries in leaves",
                    self.len()
                )));
            }
        }
        Ok(())
    }
}

/// Recursive structural check. Collects leaves left-to-right into
/// `leaves` and returns the subtree height.
///
/// `lower` is an inclusive bound (every key must be `>= lower`), `upper`
/// an exclusive one; separators are lower bounds for their right subtree
/// rather than exact minima, since deleting a subtree's smallest key
/// leaves the stale separator in place by design.
///
/// # Safety
///
/// The caller must hold the exclusive snapshot latch.
unsafe fn check_subtree<K: IndexKey>(
    node: NodeRef<K>,
    order: usize,
    root: NodeRef<K>,
    parent: NodeRef<K>,
    lower: Option<&K>,
    upper: Option<&K>,
    leaves: &mut Vec<NodeRef<K>>,
) -> Result<usize> {
    // SAFETY: sole accessor per the contract.
    unsafe {
        let data = (*node).data();
        if data.parent != parent {
            return Err(Error::Validation("parent back-reference is wrong".into()));
        }
        if node == root {
            if !data.is_leaf() && data.len() == 0 {
                return Err(Error::Validation("internal root with no keys".into()));
            }
        } else if data.len() < data.min_keys(order) || data.len() > order {
            return Err(Error::Validation(format!(
                "node holds {} keys outside [{}, {order}]",
                data.len(),
                data.min_keys(order)
            )));
        }
        for window in data.keys.windows(2) {
            if window[0] >= window[1] {
                return Err(Error::Validation("keys not strictly increasing".into()));
            }
        }
        if let (Some(lower), Some(first)) = (lower, data.keys.first()) {
            if first < lower {
                return Err(Error::Validation(
                    "key below the subtree lower bound".into(),
                ));
            }
        }
        if let (Some(upper), Some(last)) = (upper, data.keys.last()) {
            if last >= upper {
                return Err(Error::Validation(
                    "key at or above the subtree upper bound".into(),
                ));
            }
        }

        match &data.kind {
            NodeKind::Leaf { .. } => {
                leaves.push(node);
                Ok(1)
            }
            NodeKind::Internal { children } => {
                if children.len() != data.len() + 1 {
                    return Err(Error::Validation("child count is not size + 1".into()));
                }
                let mut height = None;
                for (slot, &child) in children.iter().enumerate() {
                    let child_lower = if slot == 0 {
                        lower
                    } else {
                        Some(&data.keys[slot - 1])
                    };
                    let child_upper = if slot == data.len() {
                        upper
                    } else {
                        Some(&data.keys[slot])
                    };
                    let child_height =
                        check_subtree(child, order, root, node, child_lower, child_upper, leaves)?;
                    match height {
                        None => height = Some(child_height),
                        Some(expected) if expected != child_height => {
                            return Err(Error::Validation("leaves at differing depths".into()));
                        }
                        Some(_) => {}
                    }
                }
                Ok(height.unwrap_or(0) + 1)
            }
        }
    }
}
