//! Micro-benchmarks for the tree operations, using Divan.
//!
//! Run with: `cargo bench --bench tree`

use std::sync::Arc;
use std::thread;

use crabtree::BPlusTree;
use divan::{black_box, Bencher};

fn main() {
    divan::main();
}

const SIZES: &[usize] = &[1_000, 100_000];

#[divan::bench(args = SIZES)]
fn sequential_insert(bencher: Bencher, n: usize) {
    bencher.bench(|| {
        let tree = BPlusTree::new(32);
        for i in 0..i32::try_from(n).unwrap() {
            tree.insert(i, u64::try_from(i).unwrap() + 1);
        }
        tree
    });
}

#[divan::bench(args = SIZES)]
fn point_lookup(bencher: Bencher, n: usize) {
    let tree = BPlusTree::new(32);
    for i in 0..i32::try_from(n).unwrap() {
        tree.insert(i, u64::try_from(i).unwrap() + 1);
    }
    let span = i32::try_from(n).unwrap();
    let mut key = 0;
    bencher.bench_local(move || {
        key = (key + 7_919) % span;
        black_box(tree.find(&key))
    });
}

#[divan::bench]
fn range_scan_1k_of_100k(bencher: Bencher) {
    let tree = BPlusTree::new(32);
    for i in 0..100_000 {
        tree.insert(i, 1);
    }
    bencher.bench_local(move || black_box(tree.range_find(&40_000, &41_000)).len());
}

#[divan::bench(args = [2, 4, 8])]
fn concurrent_insert(bencher: Bencher, threads: usize) {
    bencher.bench(|| {
        let tree = Arc::new(BPlusTree::new(32));
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for i in 0..10_000 {
                        let key = i32::try_from(t * 10_000 + i).unwrap();
                        tree.insert(key, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        tree
    });
}
