//! Property-based tests for the tree operations.
//!
//! Differential testing against `BTreeMap` as an oracle: arbitrary
//! operation mixes at randomized small orders must agree with the oracle
//! on every read, and the tree must stay structurally valid throughout.

use std::collections::BTreeMap;

use crabtree::BPlusTree;
use proptest::prelude::*;

/// Operations the differential tests draw from.
#[derive(Debug, Clone)]
enum Op {
    Insert(i32, u64),
    Remove(i32),
    Find(i32),
    Range(i32, i32),
}

/// Keys stay in a narrow band so inserts, removes, and lookups collide.
fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            4 => (0..200i32, 1..u64::MAX).prop_map(|(k, v)| Op::Insert(k, v)),
            2 => (0..200i32).prop_map(Op::Remove),
            2 => (0..200i32).prop_map(Op::Find),
            1 => (0..200i32, 0..200i32).prop_map(|(a, b)| Op::Range(a.min(b), a.max(b))),
        ],
        0..=max_ops,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The tree agrees with a `BTreeMap` oracle under arbitrary op mixes.
    #[test]
    fn matches_btreemap_oracle(order in 2usize..8, ops in operations(300)) {
        let tree = BPlusTree::new(order);
        let mut oracle = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    tree.insert(k, v);
                    oracle.insert(k, v);
                }
                Op::Remove(k) => {
                    tree.remove(&k);
                    oracle.remove(&k);
                }
                Op::Find(k) => {
                    prop_assert_eq!(tree.find(&k), oracle.get(&k).copied().unwrap_or(0));
                }
                Op::Range(lo, hi) => {
                    let expected: Vec<(i32, u64)> =
                        oracle.range(lo..=hi).map(|(&k, &v)| (k, v)).collect();
                    prop_assert_eq!(tree.range_find(&lo, &hi), expected);
                }
            }
        }

        prop_assert_eq!(tree.len(), oracle.len());
        tree.validate().unwrap();
        for (&k, &v) in &oracle {
            prop_assert_eq!(tree.find(&k), v);
        }
    }

    /// Inserting then removing every key returns the tree to empty, at
    /// any order.
    #[test]
    fn full_churn_returns_to_empty(
        order in 2usize..8,
        keys in prop::collection::hash_set(0..1_000i32, 1..200),
    ) {
        let keys: Vec<i32> = keys.into_iter().collect();
        let tree = BPlusTree::new(order);

        for &k in &keys {
            tree.insert(k, 1);
        }
        tree.validate().unwrap();
        prop_assert_eq!(tree.len(), keys.len());

        for &k in &keys {
            tree.remove(&k);
        }
        tree.validate().unwrap();
        prop_assert_eq!(tree.len(), 0);
        for &k in &keys {
            prop_assert_eq!(tree.find(&k), 0);
        }
    }

    /// Byte-string keys scan back in byte order, like the oracle.
    #[test]
    fn byte_keys_scan_in_order(
        pairs in prop::collection::btree_map(
            prop::collection::vec(any::<u8>(), 0..12),
            1..u64::MAX,
            0..60,
        ),
    ) {
        let tree: BPlusTree<Vec<u8>> = BPlusTree::new(4);
        for (k, v) in &pairs {
            tree.insert(k.clone(), *v);
        }

        let lo = Vec::new();
        let hi = vec![0xff_u8; 13];
        let expected: Vec<(Vec<u8>, u64)> =
            pairs.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(tree.range_find(&lo, &hi), expected);
        tree.validate().unwrap();
    }

    /// Range scans never report keys outside the requested bounds.
    #[test]
    fn range_bounds_are_inclusive_and_tight(
        keys in prop::collection::hash_set(0..300i32, 0..120),
        lo in 0..300i32,
        span in 0..100i32,
    ) {
        let tree = BPlusTree::new(3);
        for &k in &keys {
            tree.insert(k, u64::try_from(k).unwrap() + 1);
        }
        let hi = lo + span;
        let hits = tree.range_find(&lo, &hi);
        for window in hits.windows(2) {
            prop_assert!(window[0].0 < window[1].0);
        }
        for &(k, v) in &hits {
            prop_assert!(k >= lo && k <= hi);
            prop_assert_eq!(v, u64::try_from(k).unwrap() + 1);
        }
        let expected = keys.iter().filter(|&&k| k >= lo && k <= hi).count();
        prop_assert_eq!(hits.len(), expected);
    }
}
