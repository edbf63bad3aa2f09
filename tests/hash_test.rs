//! Integration tests for the oid and string hash functions.

use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;

use strata::common::hash::{oid_hash, string_hash};

const BULK_SIZE: usize = 1000;

fn collision_rate(hashes: impl Iterator<Item = usize>) -> f64 {
    let mut bulk = vec![0u32; BULK_SIZE];
    let mut collision = 0;
    for hash in hashes {
        if bulk[hash] > 0 {
            collision += 1;
        }
        bulk[hash] += 1;
    }
    collision as f64 / (BULK_SIZE * 100) as f64
}

#[test]
fn test_oid_hash_sequential() {
    let rate = collision_rate((1..=BULK_SIZE as u64).map(|oid| oid_hash(oid, BULK_SIZE)));
    assert!(rate <= 0.1, "collision rate {}", rate);
}

#[test]
fn test_oid_hash_random() {
    let mut rng = rand::thread_rng();
    let rate = collision_rate((0..BULK_SIZE).map(|_| oid_hash(rng.gen(), BULK_SIZE)));
    assert!(rate <= 0.1, "collision rate {}", rate);
}

#[test]
fn test_string_hash_random() {
    let mut rng = rand::thread_rng();
    let rate = collision_rate(
        (0..BULK_SIZE).map(|_| string_hash(&Alphanumeric.sample_string(&mut rng, 10), BULK_SIZE)),
    );
    assert!(rate <= 0.1, "collision rate {}", rate);
}
