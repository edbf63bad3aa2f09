//! Bucket hashing for the buffer table and name lookups.

/// SplitMix64 finalizer of an oid-like value, reduced to `size` buckets.
pub fn oid_hash(oid: u64, size: usize) -> usize {
    debug_assert!(size > 0);
    let mut x = oid;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    (x % size as u64) as usize
}

/// DJB2 hash of a string, reduced to `size` buckets.
pub fn string_hash(value: &str, size: usize) -> usize {
    debug_assert!(size > 0);
    let mut hash: u64 = 5381;
    for byte in value.bytes() {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(byte as u64);
    }
    (hash % size as u64) as usize
}
