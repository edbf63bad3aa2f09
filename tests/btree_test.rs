//! Integration tests for the paged B-tree: point operations, splits, scans,
//! restart and concurrent access.

use std::sync::Arc;
use std::thread;

use rand::seq::SliceRandom;
use rand::Rng;
use tempfile::TempDir;

use strata::{BTree, BufferManager, StorageConfig, StrataError};

fn create_manager(slots: usize) -> (Arc<BufferManager>, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path())
        .with_slot_count(slots)
        .with_eviction_rounds(1000);
    (Arc::new(BufferManager::new(config).unwrap()), dir)
}

fn value(key: u64) -> [u8; 8] {
    (key * 3 + 1).to_le_bytes()
}

fn keys_of(rows: &[(u64, bytes::Bytes)]) -> Vec<u64> {
    rows.iter().map(|(k, _)| *k).collect()
}

#[test]
fn test_btree_insert_and_get() {
    let (bm, _dir) = create_manager(16);
    let tree = BTree::create(bm, 1, 8).unwrap();
    tree.insert(10, &value(10)).unwrap();
    tree.insert(20, &value(20)).unwrap();
    tree.insert(30, &value(30)).unwrap();

    assert_eq!(tree.get(10).unwrap().unwrap(), &value(10)[..]);
    assert_eq!(tree.get(30).unwrap().unwrap(), &value(30)[..]);
    assert_eq!(tree.get(40).unwrap(), None);
    assert!(tree.contains(20).unwrap());
}

#[test]
fn test_btree_create_twice_fails() {
    let (bm, _dir) = create_manager(16);
    BTree::create(Arc::clone(&bm), 1, 8).unwrap();
    assert!(matches!(
        BTree::create(bm, 1, 8),
        Err(StrataError::TableAlreadyExists(1))
    ));
}

#[test]
fn test_btree_insert_many_random_order() {
    let (bm, _dir) = create_manager(32);
    let tree = BTree::create(bm, 1, 8).unwrap().with_capacity(8, 4);

    let mut keys: Vec<u64> = (0..2000).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &key in &keys {
        tree.insert(key, &value(key)).unwrap();
    }
    assert!(tree.height().unwrap() >= 4);

    for key in 0..2000u64 {
        let found = tree.get(key).unwrap();
        assert_eq!(found.as_deref(), Some(&value(key)[..]), "missing key {}", key);
    }
    assert_eq!(keys_of(&tree.scan().unwrap()), (0..2000).collect::<Vec<_>>());
}

#[test]
fn test_btree_full_page_capacity() {
    let (bm, _dir) = create_manager(64);
    let tree = BTree::create(bm, 1, 100).unwrap();
    for key in 0..5000u64 {
        let mut v = [0u8; 100];
        v[..8].copy_from_slice(&key.to_le_bytes());
        tree.insert(key, &v).unwrap();
    }
    for key in (0..5000u64).step_by(97) {
        assert_eq!(&tree.get(key).unwrap().unwrap()[..8], &key.to_le_bytes()[..]);
    }
    assert_eq!(tree.scan().unwrap().len(), 5000);
}

#[test]
fn test_btree_parallel_scan_matches_scan() {
    let (bm, _dir) = create_manager(64);
    let tree = BTree::create(bm, 1, 8).unwrap().with_capacity(6, 5);
    let mut rng = rand::thread_rng();
    let mut keys: Vec<u64> = (0..1500).map(|_| rng.gen_range(0..1_000_000)).collect();
    keys.sort();
    keys.dedup();
    for &key in &keys {
        tree.insert(key, &value(key)).unwrap();
    }

    let serial = tree.scan().unwrap();
    let parallel = tree.scan_parallel(8).unwrap();
    assert_eq!(serial, parallel);
    assert_eq!(keys_of(&serial), keys);
}

#[test]
fn test_btree_iterator_from_key() {
    let (bm, _dir) = create_manager(16);
    let tree = BTree::create(bm, 1, 8).unwrap().with_capacity(4, 4);
    for key in (0..100u64).map(|k| k * 10) {
        tree.insert(key, &value(key)).unwrap();
    }

    let from: Vec<u64> = tree
        .iter_from(455)
        .unwrap()
        .map(|row| row.unwrap().0)
        .collect();
    assert_eq!(from, (46..100u64).map(|k| k * 10).collect::<Vec<_>>());
    assert_eq!(tree.iter().unwrap().count(), 100);
    assert_eq!(tree.iter_from(10_000).unwrap().count(), 0);

    let mut rows = tree.iter_from(985).unwrap();
    assert_eq!(rows.next_row().unwrap().map(|(k, _)| k), Some(990));
    assert_eq!(rows.next_row().unwrap(), None);
}

#[test]
fn test_btree_delete_then_reinsert() {
    let (bm, _dir) = create_manager(16);
    let tree = BTree::create(bm, 1, 8).unwrap().with_capacity(4, 4);
    for key in 0..200u64 {
        tree.insert(key, &value(key)).unwrap();
    }
    for key in (0..200u64).filter(|k| k % 2 == 0) {
        tree.delete(key).unwrap();
    }
    assert_eq!(
        keys_of(&tree.scan().unwrap()),
        (0..200u64).filter(|k| k % 2 == 1).collect::<Vec<_>>()
    );
    // Whole leaves are now empty; cursors must skip them.
    for key in 0..100u64 {
        tree.delete(key * 2 + 1).unwrap();
    }
    assert_eq!(tree.iter().unwrap().count(), 0);
    tree.insert(42, &value(42)).unwrap();
    assert_eq!(keys_of(&tree.scan().unwrap()), vec![42]);
}

#[test]
fn test_btree_persists_across_restart() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path()).with_slot_count(8);
    {
        let bm = Arc::new(BufferManager::new(config.clone()).unwrap());
        let tree = BTree::create(Arc::clone(&bm), 9, 8).unwrap().with_capacity(5, 4);
        for key in 0..300u64 {
            tree.insert(key, &value(key)).unwrap();
        }
        tree.update(150, &7u64.to_le_bytes()).unwrap();
        bm.flush_all().unwrap();
    }

    let bm = Arc::new(BufferManager::new(config).unwrap());
    let tree = BTree::open(bm, 9).unwrap();
    assert_eq!(tree.value_len(), 8);
    assert_eq!(tree.get(150).unwrap().unwrap(), &7u64.to_le_bytes()[..]);
    assert_eq!(tree.get(299).unwrap().unwrap(), &value(299)[..]);
    assert_eq!(tree.scan().unwrap().len(), 300);
}

#[test]
fn test_btree_open_missing_table() {
    let (bm, _dir) = create_manager(8);
    assert!(matches!(
        BTree::open(bm, 404),
        Err(StrataError::TableNotFound(404))
    ));
}

#[test]
fn test_btree_concurrent_inserts_and_reads() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 1500;

    let (bm, _dir) = create_manager(128);
    let tree = Arc::new(BTree::create(bm, 1, 8).unwrap().with_capacity(8, 6));

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = i * THREADS + t;
                    tree.insert(key, &value(key)).unwrap();
                    if i % 50 == 0 {
                        // Own keys stay visible while others split around them.
                        for j in (0..=i).step_by(7) {
                            let own = j * THREADS + t;
                            assert_eq!(
                                tree.get(own).unwrap().as_deref(),
                                Some(&value(own)[..]),
                                "key {} lost",
                                own
                            );
                        }
                    }
                }
            })
        })
        .collect();
    let reader = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for _ in 0..20 {
                let keys = keys_of(&tree.scan().unwrap());
                assert!(keys.windows(2).all(|w| w[0] < w[1]));
            }
        })
    };
    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    let total = THREADS * PER_THREAD;
    assert_eq!(keys_of(&tree.scan().unwrap()), (0..total).collect::<Vec<_>>());
    assert_eq!(tree.scan_parallel(4).unwrap().len() as u64, total);
}

#[test]
fn test_btree_concurrent_inserts_with_few_slots() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 400;

    // Far more nodes than slots: every descent evicts.
    let (bm, _dir) = create_manager(8);
    let tree = Arc::new(BTree::create(Arc::clone(&bm), 1, 8).unwrap().with_capacity(4, 4));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = i * THREADS + t;
                    tree.insert(key, &value(key)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = THREADS * PER_THREAD;
    assert_eq!(keys_of(&tree.scan().unwrap()), (0..total).collect::<Vec<_>>());
    for key in (0..total).step_by(13) {
        assert_eq!(tree.get(key).unwrap().as_deref(), Some(&value(key)[..]));
    }
    assert!(bm.stats().evictions > 0);
}

#[test]
fn test_btree_concurrent_updates() {
    let (bm, _dir) = create_manager(32);
    let tree = Arc::new(BTree::create(bm, 1, 8).unwrap().with_capacity(4, 4));
    for key in 0..64u64 {
        tree.insert(key, &0u64.to_le_bytes()).unwrap();
    }
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for key in (t..64).step_by(4) {
                    tree.update(key, &(key + 1000).to_le_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for key in 0..64u64 {
        assert_eq!(tree.get(key).unwrap().unwrap(), &(key + 1000).to_le_bytes()[..]);
    }
}
