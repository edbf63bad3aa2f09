use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::OwnerId;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_OWNER: OwnerId = OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed));
}

/// Returns the lock owner identity of the calling worker thread.
pub fn current_owner() -> OwnerId {
    CURRENT_OWNER.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_owner_is_stable_per_thread() {
        assert_eq!(current_owner(), current_owner());
        assert_ne!(current_owner(), OwnerId::NONE);
    }

    #[test]
    fn test_owner_differs_across_threads() {
        let here = current_owner();
        let there = thread::spawn(current_owner).join().unwrap();
        assert_ne!(here, there);
    }
}
