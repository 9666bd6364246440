#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vellum::{BPlusTree, DataManager, MemoryTransactions, Result, Synchronous, Uid};

const KEYS: i64 = 10_000;

fn expected(lo: i64, hi: i64) -> Vec<Uid> {
    (lo.max(0)..=hi.min(KEYS - 1)).map(|k| Uid(k as u64)).collect()
}

#[test]
fn descending_inserts_are_found_in_order() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("ordering");
    let options = common::options(64).synchronous(Synchronous::Off);
    let dm = DataManager::create(&path, options.clone())?;
    let boot = BPlusTree::create(&dm)?;
    let tree = BPlusTree::load(boot, &dm)?;

    for k in (0..KEYS).rev() {
        tree.insert(k, Uid(k as u64))?;
    }
    for k in 0..KEYS {
        assert_eq!(tree.search(k)?, vec![Uid(k as u64)], "key {k}");
    }
    assert!(tree.search(KEYS)?.is_empty());
    assert!(tree.search(-1)?.is_empty());

    assert_eq!(tree.search_range(0, KEYS - 1)?, expected(0, KEYS - 1));
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
    for _ in 0..200 {
        let lo = rng.gen_range(-10..KEYS + 10);
        let hi = rng.gen_range(lo..KEYS + 20);
        assert_eq!(tree.search_range(lo, hi)?, expected(lo, hi), "range {lo}..={hi}");
    }
    tree.close()?;
    dm.close()?;

    let dm = DataManager::open(&path, options, Arc::new(MemoryTransactions::new()))?;
    let tree = BPlusTree::load(boot, &dm)?;
    assert_eq!(tree.search_range(4_990, 5_010)?, expected(4_990, 5_010));
    tree.close()?;
    dm.close()?;
    Ok(())
}

#[test]
fn concurrent_inserts_land_in_one_tree() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("concurrent_tree");
    let dm = DataManager::create(&path, common::options(64).synchronous(Synchronous::Off))?;
    let boot = BPlusTree::create(&dm)?;
    let tree = Arc::new(BPlusTree::load(boot, &dm)?);
    let threads = 4i64;
    let per_thread = 500i64;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || -> Result<()> {
                // Interleave key ranges so threads contend for the same leaves.
                for i in 0..per_thread {
                    let key = i * threads + t;
                    tree.insert(key, Uid(key as u64))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("insert thread panicked")?;
    }

    let total = threads * per_thread;
    let all = tree.search_range(0, total)?;
    let want: Vec<Uid> = (0..total).map(|k| Uid(k as u64)).collect();
    assert_eq!(all, want);
    match Arc::try_unwrap(tree) {
        Ok(tree) => tree.close()?,
        Err(_) => panic!("tree still shared"),
    }
    dm.close()?;
    Ok(())
}
