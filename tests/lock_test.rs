//! Integration tests for the spinlock, the reader/writer lock and table locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata::sync::{RwLockEntry, RwLockMode, SpinLock, TableLockRegistry, TableRegistry};

const COUNT_NUM: u64 = 100_000;
const WORKER_NUM: u64 = 20;

/// Non-atomic increment; only correct under mutual exclusion.
fn bump(counter: &AtomicU64) {
    let current = counter.load(Ordering::Relaxed);
    counter.store(current + 1, Ordering::Relaxed);
}

fn run_workers<F>(workers: u64, work: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let work = Arc::clone(&work);
            thread::spawn(move || work())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_spinlock_concurrent() {
    let lock = Arc::new(SpinLock::new());
    let num = Arc::new(AtomicU64::new(0));
    {
        let (lock, num) = (Arc::clone(&lock), Arc::clone(&num));
        run_workers(100, move || {
            for _ in 0..COUNT_NUM {
                lock.acquire();
                bump(&num);
                lock.release();
            }
        });
    }
    assert_eq!(num.load(Ordering::SeqCst), 10_000_000);
    assert!(!lock.is_locked());
}

#[test]
fn test_rwlock_concurrent() {
    let lock = Arc::new(RwLockEntry::new());
    let num = Arc::new(AtomicU64::new(0));
    {
        let (lock, num) = (Arc::clone(&lock), Arc::clone(&num));
        run_workers(WORKER_NUM, move || {
            for _ in 0..COUNT_NUM {
                lock.acquire(RwLockMode::Writer);
                assert_eq!(lock.owner_count(), 1);
                bump(&num);
                lock.release();
            }
        });
    }
    assert_eq!(num.load(Ordering::SeqCst), 2_000_000);
    assert_eq!(lock.waiting_writers(), 0);
    assert_eq!(lock.waiting_readers(), 0);
    assert_eq!(lock.mode(), RwLockMode::Init);
}

#[test]
fn test_rwlock_upgrade() {
    let lock = Arc::new(RwLockEntry::new());
    let num = Arc::new(AtomicU64::new(0));
    {
        let (lock, num) = (Arc::clone(&lock), Arc::clone(&num));
        run_workers(WORKER_NUM, move || {
            for _ in 0..COUNT_NUM {
                lock.acquire(RwLockMode::Readers);
                let _ = num.load(Ordering::Relaxed);
                lock.upgrade();
                assert_eq!(lock.mode(), RwLockMode::Writer);
                bump(&num);
                lock.release();
            }
        });
    }
    assert_eq!(num.load(Ordering::SeqCst), 2_000_000);
    assert_eq!(lock.waiting_writers(), 0);
    assert_eq!(lock.waiting_readers(), 0);
    assert!(!lock.is_locked());
}

#[test]
fn test_rwlock_upgrade_and_downgrade() {
    let lock = Arc::new(RwLockEntry::new());
    let num = Arc::new(AtomicU64::new(0));
    {
        let (lock, num) = (Arc::clone(&lock), Arc::clone(&num));
        run_workers(WORKER_NUM, move || {
            for _ in 0..COUNT_NUM {
                lock.acquire(RwLockMode::Readers);
                let _ = num.load(Ordering::Relaxed);
                lock.upgrade();
                bump(&num);
                lock.downgrade();
                assert_eq!(lock.mode(), RwLockMode::Readers);
                let _ = num.load(Ordering::Relaxed);
                lock.release();
            }
        });
    }
    assert_eq!(num.load(Ordering::SeqCst), 2_000_000);
    assert_eq!(lock.waiting_writers(), 0);
    assert_eq!(lock.waiting_readers(), 0);
}

#[test]
fn test_rwlock_readers_see_whole_writes() {
    let lock = Arc::new(RwLockEntry::new());
    let num = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..WORKER_NUM)
        .map(|i| {
            let (lock, num) = (Arc::clone(&lock), Arc::clone(&num));
            thread::spawn(move || {
                if i % 2 == 1 {
                    lock.acquire(RwLockMode::Writer);
                    bump(&num);
                    thread::sleep(Duration::from_millis(5));
                    bump(&num);
                } else {
                    lock.acquire(RwLockMode::Readers);
                    assert_eq!(num.load(Ordering::Relaxed) % 2, 0);
                    thread::sleep(Duration::from_millis(20));
                }
                lock.release();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(num.load(Ordering::SeqCst), 20);
    assert_eq!(lock.waiting_writers(), 0);
    assert_eq!(lock.waiting_readers(), 0);
}

#[test]
fn test_exclusive_mode_never_shared() {
    let lock = Arc::new(RwLockEntry::new());
    let inside = Arc::new(AtomicU64::new(0));
    {
        let (lock, inside) = (Arc::clone(&lock), Arc::clone(&inside));
        run_workers(8, move || {
            for i in 0..5_000u32 {
                if i % 3 == 0 {
                    lock.acquire(RwLockMode::Writer);
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    assert_eq!(lock.owner_count(), 1);
                    inside.fetch_sub(1, Ordering::SeqCst);
                } else {
                    lock.acquire(RwLockMode::Readers);
                    assert_eq!(lock.mode(), RwLockMode::Readers);
                }
                lock.release();
            }
        });
    }
    assert_eq!(lock.mode(), RwLockMode::Init);
}

#[test]
fn test_capture_waits_for_other_users() {
    let locks = Arc::new(TableLockRegistry::new());
    let registry = Arc::new(TableRegistry::new());
    let left = Arc::new(AtomicU64::new(0));
    let (registered_tx, registered_rx) = crossbeam_channel::bounded(1);

    let user = {
        let (locks, registry, left) = (Arc::clone(&locks), Arc::clone(&registry), Arc::clone(&left));
        thread::spawn(move || {
            locks.check_table_locked(12);
            registry.try_register(12);
            registered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(30));
            left.store(1, Ordering::SeqCst);
            registry.unregister(12);
        })
    };
    registered_rx.recv().unwrap();
    locks.capture_table(&registry, 12);
    assert_eq!(left.load(Ordering::SeqCst), 1);
    assert!(locks.is_table_locked(12));
    locks.release_table(12).unwrap();
    user.join().unwrap();
}
