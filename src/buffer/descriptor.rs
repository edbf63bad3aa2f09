use crate::common::{Buffer, BufferTag, MAX_USAGE_COUNT};
use crate::sync::{RwLockEntry, SpinMutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Holds no page
    Empty,
    /// Holds a page and has at least one pin
    Pinned,
    /// Holds a page nobody pins; an eviction candidate
    Unpinned,
}

/// Bookkeeping of one slot, all guarded by the descriptor's io lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorState {
    pub tag: Option<BufferTag>,
    pub status: BufferStatus,
    pub refcount: u32,
    pub usage_count: u32,
    /// Claimed by a loader that is replacing the page
    pub io_in_progress: bool,
}

/// Outcome of the clock hand visiting a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sweep {
    /// The slot was empty and now belongs to the caller
    Empty,
    /// The slot is claimed for eviction; it still holds `BufferTag`
    Victim(BufferTag),
    /// The slot is in use or recently used
    Skip,
}

/// Per-slot descriptor: identity, pin state and the content lock.
pub struct BufferDescriptor {
    buffer: Buffer,
    io_lock: SpinMutex<DescriptorState>,
    content_lock: RwLockEntry,
}

impl BufferDescriptor {
    pub fn new(buffer: Buffer) -> Self {
        Self {
            buffer,
            io_lock: SpinMutex::new(DescriptorState {
                tag: None,
                status: BufferStatus::Empty,
                refcount: 0,
                usage_count: 0,
                io_in_progress: false,
            }),
            content_lock: RwLockEntry::new(),
        }
    }

    pub fn buffer(&self) -> Buffer {
        self.buffer
    }

    pub fn state(&self) -> DescriptorState {
        *self.io_lock.lock()
    }

    pub fn tag(&self) -> Option<BufferTag> {
        self.io_lock.lock().tag
    }

    pub fn status(&self) -> BufferStatus {
        self.io_lock.lock().status
    }

    pub fn refcount(&self) -> u32 {
        self.io_lock.lock().refcount
    }

    pub fn usage_count(&self) -> u32 {
        self.io_lock.lock().usage_count
    }

    pub fn content_lock(&self) -> &RwLockEntry {
        &self.content_lock
    }

    /// True when the slot is pinned by a user rather than claimed by a loader.
    pub fn is_held_by_user(&self) -> bool {
        let state = self.io_lock.lock();
        state.status == BufferStatus::Pinned && !state.io_in_progress
    }

    /// Pins the slot if it still holds `tag`.
    pub(crate) fn pin_if_tag(&self, tag: &BufferTag) -> bool {
        let mut state = self.io_lock.lock();
        if state.tag != Some(*tag) {
            return false;
        }
        pin_locked(&mut state);
        true
    }

    /// Adds a pin to a slot the caller already pins.
    pub(crate) fn pin(&self) {
        let mut state = self.io_lock.lock();
        assert!(state.refcount > 0, "extra pin on unpinned {}", self.buffer);
        pin_locked(&mut state);
    }

    /// Drops one pin. A slot whose page was forgotten while pinned goes back
    /// to `Empty` with its last pin.
    pub(crate) fn unpin(&self) {
        let mut state = self.io_lock.lock();
        assert!(state.refcount > 0, "release of unpinned {}", self.buffer);
        state.refcount -= 1;
        if state.refcount == 0 {
            if state.tag.is_some() {
                state.status = BufferStatus::Unpinned;
            } else {
                state.status = BufferStatus::Empty;
                state.usage_count = 0;
            }
        }
    }

    /// One clock hand visit: claims an empty or cold slot, or ages it.
    pub(crate) fn sweep(&self) -> Sweep {
        let mut state = self.io_lock.lock();
        match state.status {
            BufferStatus::Empty => {
                claim_locked(&mut state);
                Sweep::Empty
            }
            BufferStatus::Unpinned if state.usage_count == 0 => {
                claim_locked(&mut state);
                match state.tag {
                    Some(tag) => Sweep::Victim(tag),
                    None => Sweep::Empty,
                }
            }
            BufferStatus::Unpinned => {
                state.usage_count -= 1;
                Sweep::Skip
            }
            BufferStatus::Pinned => Sweep::Skip,
        }
    }

    /// Detaches the claimed victim from its page. Fails, dropping the claim,
    /// when someone pinned the page after it was claimed.
    pub(crate) fn invalidate_claim(&self) -> bool {
        let mut state = self.io_lock.lock();
        debug_assert!(state.io_in_progress);
        if state.refcount != 1 {
            state.refcount -= 1;
            state.io_in_progress = false;
            return false;
        }
        state.tag = None;
        true
    }

    /// Binds a claimed slot to `tag` after its page has been read.
    pub(crate) fn assign(&self, tag: BufferTag) {
        let mut state = self.io_lock.lock();
        debug_assert_eq!(state.refcount, 1);
        state.tag = Some(tag);
        state.status = BufferStatus::Pinned;
        state.usage_count = 1;
        state.io_in_progress = false;
    }

    /// Returns a claimed slot to the free state after a failed load.
    pub(crate) fn reset_claim(&self) {
        let mut state = self.io_lock.lock();
        *state = DescriptorState {
            tag: None,
            status: BufferStatus::Empty,
            refcount: 0,
            usage_count: 0,
            io_in_progress: false,
        };
    }

    /// Forgets a page of `object_id` held by this slot. An unpinned slot is
    /// freed at once and true is returned; a pinned one loses its tag now and
    /// is freed by its last unpin.
    pub(crate) fn invalidate_object(&self, object_id: u64) -> bool {
        let mut state = self.io_lock.lock();
        match state.tag {
            Some(tag) if tag.object_id == object_id => {
                state.tag = None;
                if state.refcount == 0 {
                    state.status = BufferStatus::Empty;
                    state.usage_count = 0;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

fn pin_locked(state: &mut DescriptorState) {
    state.status = BufferStatus::Pinned;
    state.refcount += 1;
    state.usage_count = (state.usage_count + 1).min(MAX_USAGE_COUNT);
}

fn claim_locked(state: &mut DescriptorState) {
    state.status = BufferStatus::Pinned;
    state.refcount = 1;
    state.io_in_progress = true;
}
