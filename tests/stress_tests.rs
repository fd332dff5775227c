//! Multi-threaded stress tests.
//!
//! Every test joins its threads and then checks both the visible contents
//! and the structural invariants via `validate()`. Values are derived
//! from their key (`value == key + 1`) so readers can assert consistency
//! mid-flight, not just after the join.

mod common;

use std::sync::Arc;
use std::thread;

use crabtree::BPlusTree;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 8 threads insert 10 distinct keys each into a shared order-4 tree;
/// after the join every key must be findable with its inserted value.
#[test]
fn concurrent_disjoint_inserts() {
    common::init_tracing();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 10;

    let tree = Arc::new(BPlusTree::new(4));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = i32::try_from(t * PER_THREAD + i).unwrap();
                    tree.insert(key, u64::try_from(key).unwrap() + 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.len(), THREADS * PER_THREAD);
    for key in 0..i32::try_from(THREADS * PER_THREAD).unwrap() {
        assert_eq!(tree.find(&key), u64::try_from(key).unwrap() + 1, "key {key}");
    }
    tree.validate().unwrap();
}

/// Same shape, but enough keys per thread to force deep trees and
/// constant split traffic at a small order.
#[test]
fn concurrent_disjoint_inserts_deep() {
    common::init_tracing();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_000;

    let tree = Arc::new(BPlusTree::new(3));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    // Interleave the stripes so neighbors race for the
                    // same leaves.
                    let key = i32::try_from(i * THREADS + t).unwrap();
                    tree.insert(key, u64::try_from(key).unwrap() + 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.len(), THREADS * PER_THREAD);
    tree.validate().unwrap();
    let all = tree.range_find(&0, &i32::try_from(THREADS * PER_THREAD - 1).unwrap());
    assert_eq!(all.len(), THREADS * PER_THREAD);
}

/// Writers upsert and remove over one overlapping keyspace while readers
/// point-get and range-scan. Readers check value consistency mid-flight;
/// the structure is validated after the join.
#[test]
fn mixed_workload_overlapping_ranges() {
    common::init_tracing();
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const ROUNDS: usize = 4_000;
    const KEYSPACE: i32 = 512;

    let tree = Arc::new(BPlusTree::new(3));
    let mut handles = Vec::new();

    for t in 0..WRITERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xC0FFEE + t as u64);
            for _ in 0..ROUNDS {
                let key = rng.gen_range(0..KEYSPACE);
                if rng.gen_bool(0.6) {
                    tree.insert(key, u64::try_from(key).unwrap() + 1);
                } else {
                    tree.remove(&key);
                }
            }
        }));
    }

    for t in 0..READERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xBEEF + t as u64);
            for _ in 0..ROUNDS {
                if rng.gen_bool(0.5) {
                    let key = rng.gen_range(0..KEYSPACE);
                    let value = tree.find(&key);
                    assert!(
                        value == 0 || value == u64::try_from(key).unwrap() + 1,
                        "key {key} read inconsistent value {value}"
                    );
                } else {
                    let lo = rng.gen_range(0..KEYSPACE);
                    let hi = (lo + rng.gen_range(0..64)).min(KEYSPACE - 1);
                    let hits = tree.range_find(&lo, &hi);
                    for window in hits.windows(2) {
                        assert!(window[0].0 < window[1].0, "scan out of order");
                    }
                    for &(key, value) in &hits {
                        assert!(key >= lo && key <= hi, "scan out of bounds");
                        assert_eq!(value, u64::try_from(key).unwrap() + 1);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    tree.validate().unwrap();
    for key in 0..KEYSPACE {
        let value = tree.find(&key);
        assert!(value == 0 || value == u64::try_from(key).unwrap() + 1);
    }
}

/// Every thread removes exactly what it inserted; the tree must end
/// empty with a valid (root-only) structure.
#[test]
fn concurrent_churn_drains_to_empty() {
    common::init_tracing();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1_000;

    let tree = Arc::new(BPlusTree::new(4));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let base = i32::try_from(t * PER_THREAD).unwrap();
                for i in 0..i32::try_from(PER_THREAD).unwrap() {
                    tree.insert(base + i, u64::try_from(base + i).unwrap() + 1);
                }
                for i in 0..i32::try_from(PER_THREAD).unwrap() {
                    tree.remove(&(base + i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tree.is_empty());
    assert!(tree.range_find(&0, &i32::MAX).is_empty());
    tree.validate().unwrap();
}

/// Snapshots taken while writers run must capture one consistent state:
/// the restored tree validates, and every entry obeys the value scheme.
#[test]
fn snapshot_under_concurrent_writes() {
    common::init_tracing();
    const WRITERS: usize = 4;
    const ROUNDS: usize = 2_000;
    const KEYSPACE: i32 = 256;

    let dir = tempfile::tempdir().unwrap();
    let tree = Arc::new(BPlusTree::new(4));
    let mut handles = Vec::new();

    for t in 0..WRITERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xAB1E + t as u64);
            for _ in 0..ROUNDS {
                let key = rng.gen_range(0..KEYSPACE);
                if rng.gen_bool(0.7) {
                    tree.insert(key, u64::try_from(key).unwrap() + 1);
                } else {
                    tree.remove(&key);
                }
            }
        }));
    }

    for round in 0..8 {
        let base = dir.path().join(format!("mid-{round}"));
        tree.serialize(&base).unwrap();

        let restored: BPlusTree<i32> = BPlusTree::new(4);
        restored.deserialize(&base).unwrap();
        restored.validate().unwrap();
        for (key, value) in restored.range_find(&0, &KEYSPACE) {
            assert_eq!(value, u64::try_from(key).unwrap() + 1);
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    tree.validate().unwrap();
}
