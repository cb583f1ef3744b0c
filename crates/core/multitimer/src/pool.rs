//! Fixed-capacity timer slot arena.
//!
//! [`Pool`] owns `N` timer slots and a stack of free slot indices, giving
//! O(1) allocation and release without a heap. Each slot carries an
//! explicit [`SlotState`] and a generation counter; a [`TimerHandle`] is
//! only honoured while its generation matches, so a handle to a timer that
//! already ran cannot touch whatever reused the slot.
//!
//! The `next` link stored in each slot is shared by the wait list and the
//! expired queue (see [`crate::list`]); a slot is in at most one of them.

use core::fmt;

use planck_noalloc::vec::ArrayVec;

use crate::time::Instant;

/// Index of a slot within a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotId(u16);

impl SlotId {
    /// Creates a new `SlotId`.
    pub const fn new(val: u16) -> Self {
        Self(val)
    }

    /// Returns the value as `usize` (convenience for indexing).
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a timer's callback runs once its deadline is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Inside the timer interrupt. Keep these short.
    Immediate,
    /// From normal context, via the deferred runner.
    Deferred,
}

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On the free stack.
    Free,
    /// In the wait list, deadline not yet reached.
    Pending,
    /// Deadline reached; deferred callback queued but not yet run.
    Expired,
}

/// A callback and the payload it will be handed.
pub struct Callback<P> {
    func: fn(P),
    payload: P,
}

impl<P> Callback<P> {
    /// Pairs a function with its payload.
    pub const fn new(func: fn(P), payload: P) -> Self {
        Self { func, payload }
    }

    /// Consumes the callback, passing the payload to the function.
    pub fn invoke(self) {
        (self.func)(self.payload);
    }
}

/// Reference to a scheduled timer, returned by
/// [`TimerMux::schedule`](crate::TimerMux::schedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    slot: SlotId,
    generation: u32,
}

impl TimerHandle {
    /// Returns the slot this handle refers to.
    pub const fn slot(self) -> SlotId {
        self.slot
    }
}

/// A single timer record.
pub(crate) struct Slot<P> {
    pub(crate) state: SlotState,
    pub(crate) generation: u32,
    pub(crate) deadline: Instant,
    pub(crate) dispatch: Dispatch,
    pub(crate) next: Option<SlotId>,
    callback: Option<Callback<P>>,
}

impl<P> Slot<P> {
    const VACANT: Self = Self {
        state: SlotState::Free,
        generation: 0,
        deadline: Instant::ZERO,
        dispatch: Dispatch::Deferred,
        next: None,
        callback: None,
    };
}

/// Arena of `N` timer slots plus the free-index stack.
pub struct Pool<P, const N: usize> {
    slots: [Slot<P>; N],
    free: ArrayVec<SlotId, N>,
}

impl<P, const N: usize> Pool<P, N> {
    const CAPACITY_FITS: () = assert!(N <= u16::MAX as usize, "pool capacity exceeds u16 slot ids");

    /// Creates a pool with every slot vacant and an empty free stack.
    ///
    /// Call [`reset`](Self::reset) before allocating.
    pub const fn new() -> Self {
        let () = Self::CAPACITY_FITS;
        Self {
            slots: [const { Slot::<P>::VACANT }; N],
            free: ArrayVec::new(),
        }
    }

    /// Returns every slot to the free stack, dropping any stored callbacks.
    ///
    /// Generations are kept, so handles issued before the reset stay invalid.
    #[allow(clippy::cast_possible_truncation)]
    pub fn reset(&mut self) {
        self.free.clear();
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
            slot.next = None;
            slot.callback = None;
        }
        // Pushed in reverse so slot 0 is handed out first.
        for i in (0..N).rev() {
            self.free.push(SlotId::new(i as u16));
        }
    }

    /// Total number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of slots on the free stack.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Pops a free slot and fills it in as a pending timer.
    ///
    /// Returns `None` if every slot is in use. The slot is not linked into
    /// any list.
    pub fn allocate(
        &mut self,
        deadline: Instant,
        dispatch: Dispatch,
        callback: Callback<P>,
    ) -> Option<TimerHandle> {
        let id = self.free.pop()?;
        let slot = &mut self.slots[id.as_usize()];
        debug_assert_eq!(slot.state, SlotState::Free);
        slot.generation = slot.generation.wrapping_add(1);
        slot.state = SlotState::Pending;
        slot.deadline = deadline;
        slot.dispatch = dispatch;
        slot.next = None;
        slot.callback = Some(callback);
        Some(TimerHandle {
            slot: id,
            generation: slot.generation,
        })
    }

    /// Pushes a slot back onto the free stack and returns its callback.
    ///
    /// The caller must already have unlinked the slot from its list.
    pub fn release(&mut self, id: SlotId) -> Option<Callback<P>> {
        let slot = &mut self.slots[id.as_usize()];
        if slot.state == SlotState::Free {
            return None;
        }
        slot.state = SlotState::Free;
        slot.next = None;
        let callback = slot.callback.take();
        debug_assert!(!self.free.is_full());
        self.free.push(id);
        callback
    }

    /// Returns the slot a handle refers to, if the handle is still live.
    pub fn resolve(&self, handle: TimerHandle) -> Option<SlotId> {
        let slot = self.slots.get(handle.slot.as_usize())?;
        (slot.generation == handle.generation && slot.state != SlotState::Free)
            .then_some(handle.slot)
    }

    /// Returns the state of a slot.
    pub fn state(&self, id: SlotId) -> SlotState {
        self.slots[id.as_usize()].state
    }

    /// Marks a pending slot as expired.
    pub fn mark_expired(&mut self, id: SlotId) {
        self.slots[id.as_usize()].state = SlotState::Expired;
    }

    /// Returns the deadline of a slot.
    pub fn deadline(&self, id: SlotId) -> Instant {
        self.slots[id.as_usize()].deadline
    }

    /// Returns the dispatch discipline of a slot.
    pub fn dispatch(&self, id: SlotId) -> Dispatch {
        self.slots[id.as_usize()].dispatch
    }

    pub(crate) fn next(&self, id: SlotId) -> Option<SlotId> {
        self.slots[id.as_usize()].next
    }

    pub(crate) fn set_next(&mut self, id: SlotId, next: Option<SlotId>) {
        self.slots[id.as_usize()].next = next;
    }
}

impl<P, const N: usize> Default for Pool<P, N> {
    fn default() -> Self {
        Self::new()
    }
}
