//! Readers/writer lock used as the content lock of every buffer slot.
//!
//! Owners are identified by [`current_owner`]. A readers holder may re-enter,
//! and the writer may take nested readers holds; those count toward
//! `owner_count` and are all undone by `release`.

use std::sync::atomic::{AtomicU32, Ordering};

use log::trace;

use super::owner::current_owner;
use super::spinlock::{Backoff, SpinLock, SpinMutex};
use crate::common::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RwLockMode {
    Init = 1,
    Readers = 2,
    Writer = 3,
}

#[derive(Debug)]
struct RwState {
    mode: RwLockMode,
    writer: OwnerId,
    owner_count: u32,
    /// Readers holders with their hold depth
    readers: Vec<(OwnerId, u32)>,
    /// Holder reserving the lock for an upgrade
    upgrader: Option<OwnerId>,
    /// Mode in force before the lock last went back to `Init`
    last_released: RwLockMode,
}

impl RwState {
    fn new() -> Self {
        Self {
            mode: RwLockMode::Init,
            writer: OwnerId::NONE,
            owner_count: 0,
            readers: Vec::new(),
            upgrader: None,
            last_released: RwLockMode::Init,
        }
    }

    fn read_holds(&self, owner: OwnerId) -> u32 {
        self.readers
            .iter()
            .find(|(id, _)| *id == owner)
            .map(|(_, depth)| *depth)
            .unwrap_or(0)
    }

    fn add_read_hold(&mut self, owner: OwnerId) {
        match self.readers.iter_mut().find(|(id, _)| *id == owner) {
            Some((_, depth)) => *depth += 1,
            None => self.readers.push((owner, 1)),
        }
    }

    fn drop_read_hold(&mut self, owner: OwnerId) -> bool {
        let Some(pos) = self.readers.iter().position(|(id, _)| *id == owner) else {
            return false;
        };
        self.readers[pos].1 -= 1;
        if self.readers[pos].1 == 0 {
            self.readers.swap_remove(pos);
        }
        true
    }

    fn become_writer(&mut self, owner: OwnerId) {
        self.mode = RwLockMode::Writer;
        self.writer = owner;
        self.owner_count = 1;
    }
}

pub struct RwLockEntry {
    /// Held for as long as the lock has any owner
    gate: SpinLock,
    sync: SpinMutex<RwState>,
    waiting_readers: AtomicU32,
    waiting_writers: AtomicU32,
}

impl Default for RwLockEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLockEntry {
    pub fn new() -> Self {
        Self {
            gate: SpinLock::new(),
            sync: SpinMutex::new(RwState::new()),
            waiting_readers: AtomicU32::new(0),
            waiting_writers: AtomicU32::new(0),
        }
    }

    /// Blocks until the caller holds the lock in `mode`.
    ///
    /// # Panics
    ///
    /// On `RwLockMode::Init`, when the writer asks for `Writer` again, or
    /// when a readers holder asks for `Writer` (use [`upgrade`](Self::upgrade)).
    pub fn acquire(&self, mode: RwLockMode) {
        assert!(mode != RwLockMode::Init, "cannot acquire a rwlock in Init mode");
        let me = current_owner();
        if self.try_admit(me, mode) {
            return;
        }

        let waiting = self.waiting_counter(mode);
        waiting.fetch_add(1, Ordering::SeqCst);
        let mut backoff = Backoff::new();
        while !self.try_admit(me, mode) {
            backoff.snooze();
        }
        waiting.fetch_sub(1, Ordering::SeqCst);
    }

    fn try_admit(&self, me: OwnerId, mode: RwLockMode) -> bool {
        let mut state = self.sync.lock();
        match mode {
            RwLockMode::Writer => {
                assert!(
                    !(state.mode == RwLockMode::Writer && state.writer == me),
                    "writer lock is not reentrant"
                );
                assert!(
                    state.read_holds(me) == 0,
                    "a readers holder must upgrade instead of acquiring the writer lock"
                );
                if state.mode != RwLockMode::Init {
                    return false;
                }
                if state.last_released == RwLockMode::Writer
                    && self.waiting_readers.load(Ordering::SeqCst) > 0
                {
                    return false;
                }
                self.close_gate();
                state.become_writer(me);
            }
            RwLockMode::Readers => {
                match state.mode {
                    RwLockMode::Init => {
                        if state.last_released == RwLockMode::Readers
                            && self.waiting_writers.load(Ordering::SeqCst) > 0
                        {
                            return false;
                        }
                        self.close_gate();
                        state.mode = RwLockMode::Readers;
                    }
                    RwLockMode::Readers => {
                        if state.read_holds(me) == 0
                            && (state.upgrader.is_some()
                                || self.waiting_writers.load(Ordering::SeqCst) > 0)
                        {
                            return false;
                        }
                    }
                    RwLockMode::Writer => {
                        if state.writer != me {
                            return false;
                        }
                    }
                }
                if state.mode == RwLockMode::Readers {
                    state.add_read_hold(me);
                }
                state.owner_count += 1;
            }
            RwLockMode::Init => unreachable!(),
        }
        true
    }

    fn close_gate(&self) {
        let taken = self.gate.try_acquire();
        debug_assert!(taken, "rwlock gate held while in Init mode");
    }

    fn waiting_counter(&self, mode: RwLockMode) -> &AtomicU32 {
        match mode {
            RwLockMode::Writer => &self.waiting_writers,
            _ => &self.waiting_readers,
        }
    }

    /// Converts the caller's single readers hold into the writer lock.
    ///
    /// The first upgrader reserves the lock: new readers are refused and no
    /// other writer can slip in before it. A second concurrent upgrader gives
    /// its hold up and queues as an ordinary writer.
    pub fn upgrade(&self) {
        let me = current_owner();
        {
            let mut state = self.sync.lock();
            assert!(
                state.mode == RwLockMode::Readers,
                "upgrade requires the lock in Readers mode"
            );
            assert_eq!(
                state.read_holds(me),
                1,
                "upgrade requires exactly one readers hold"
            );
            state.drop_read_hold(me);
            state.owner_count -= 1;
            match state.upgrader {
                None if state.owner_count == 0 => {
                    state.become_writer(me);
                    return;
                }
                None => state.upgrader = Some(me),
                Some(_) => {
                    drop(state);
                    trace!("{} lost the upgrade race, queueing as writer", me);
                    self.acquire(RwLockMode::Writer);
                    return;
                }
            }
        }

        let mut backoff = Backoff::new();
        loop {
            {
                let mut state = self.sync.lock();
                if state.owner_count == 0 {
                    state.upgrader = None;
                    state.become_writer(me);
                    return;
                }
            }
            backoff.snooze();
        }
    }

    /// Relabels the caller's writer lock as a readers hold.
    pub fn downgrade(&self) {
        let me = current_owner();
        let mut state = self.sync.lock();
        assert!(
            state.mode == RwLockMode::Writer && state.writer == me,
            "downgrade requires the caller to hold the writer lock"
        );
        assert_eq!(
            state.owner_count, 1,
            "downgrade with nested readers holds outstanding"
        );
        state.mode = RwLockMode::Readers;
        state.writer = OwnerId::NONE;
        state.add_read_hold(me);
    }

    /// Gives back one hold of the caller.
    pub fn release(&self) {
        let me = current_owner();
        let mut state = self.sync.lock();
        match state.mode {
            RwLockMode::Init => panic!("release of an unlocked rwlock"),
            RwLockMode::Writer => {
                assert_eq!(state.writer, me, "writer lock released by a non-owner")
            }
            RwLockMode::Readers => assert!(
                state.drop_read_hold(me),
                "readers lock released by a non-holder"
            ),
        }
        state.owner_count -= 1;
        if state.owner_count == 0 && state.upgrader.is_none() {
            state.last_released = state.mode;
            state.mode = RwLockMode::Init;
            state.writer = OwnerId::NONE;
            self.gate.release();
        }
    }

    pub fn mode(&self) -> RwLockMode {
        self.sync.lock().mode
    }

    pub fn owner_count(&self) -> u32 {
        self.sync.lock().owner_count
    }

    pub fn writer(&self) -> OwnerId {
        self.sync.lock().writer
    }

    pub fn waiting_readers(&self) -> u32 {
        self.waiting_readers.load(Ordering::SeqCst)
    }

    pub fn waiting_writers(&self) -> u32 {
        self.waiting_writers.load(Ordering::SeqCst)
    }

    /// True while anyone holds the lock in any mode.
    pub fn is_locked(&self) -> bool {
        self.gate.is_locked()
    }
}
