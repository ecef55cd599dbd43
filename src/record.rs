// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The coroutine record: the single block of bookkeeping state a coroutine
//! carries, written directly into the high end of its own caller-supplied
//! stack so that spawning one never touches the heap.

use std::mem;
use std::num::NonZeroI64;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread::ThreadId;

use crate::context::{Context, MIN_STACK_SIZE};

/// Unique, process-wide, never-reused coroutine identifier. Wraps a
/// `NonZeroI64` so `Option<CoroutineId>` costs nothing extra and `0` stays
/// free to mean "no coroutine" / "the caller" at the public API boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CoroutineId(NonZeroI64);

impl CoroutineId {
    fn next() -> Self {
        static NEXT: AtomicI64 = AtomicI64::new(1);
        let raw = NEXT.fetch_add(1, Ordering::Relaxed);
        CoroutineId(NonZeroI64::new(raw).expect("coroutine id counter wrapped to zero"))
    }

    pub fn get(self) -> i64 {
        self.0.get()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum State {
    Scheduled,
    Running,
    Paused,
    Detached,
    Terminated,
}

pub(crate) type EntryFn = extern "C" fn(*mut ());
pub(crate) type CleanupFn = extern "C" fn(*mut u8, usize, *mut ());

/// What a coroutine is built from: a caller-owned stack plus the three
/// callbacks that give the crate something to run, something to feed
/// opaque user data through, and something to call once the stack is free
/// to reuse or release.
pub struct Descriptor {
    pub stack_base: *mut u8,
    pub stack_size: usize,
    pub entry: EntryFn,
    pub cleanup: CleanupFn,
    pub udata: *mut (),
    pub name: Option<String>,
}

/// Extra headroom reserved for the record itself, on top of the
/// architecture's minimum usable stack. A `Descriptor::stack_size` below
/// `MIN_STACK_SIZE + RECORD_RESERVE` is rejected at spawn time.
const RECORD_RESERVE: usize = mem::size_of::<Record>() + mem::align_of::<Record>();

pub(crate) fn min_stack_size() -> usize {
    MIN_STACK_SIZE + RECORD_RESERVE
}

/// The live bookkeeping for one coroutine. Lives inside the high end of its
/// own stack (see `Record::new_in_stack`); the `prev`/`next`/`linked` fields
/// are the intrusive-list hooks shared by the run queue, the pause set, and
/// (by address, not by this same struct) the detached registry.
#[repr(C)]
pub(crate) struct Record {
    pub(crate) id: CoroutineId,
    pub(crate) stack_base: *mut u8,
    pub(crate) stack_size: usize,
    pub(crate) entry: EntryFn,
    pub(crate) cleanup: CleanupFn,
    pub(crate) udata: *mut (),
    pub(crate) ctx: Context,
    pub(crate) name: Option<String>,
    pub(crate) owner: Option<ThreadId>,
    pub(crate) state: State,
    pub(crate) prev: Option<NonNull<Record>>,
    pub(crate) next: Option<NonNull<Record>>,
    pub(crate) linked: bool,
}

impl Record {
    /// Carves a `Record` out of the high end of `desc.stack_base`, leaving
    /// the remainder as the usable execution stack, and builds its initial
    /// context so that resuming it for the first time runs `trampoline`
    /// with the record's own address as its argument.
    ///
    /// # Safety
    /// `desc.stack_base` must point to at least `desc.stack_size` bytes of
    /// memory that outlives the coroutine and that nothing else is using.
    pub(crate) unsafe fn new_in_stack(
        desc: Descriptor,
        trampoline: extern "C" fn(usize) -> !,
    ) -> NonNull<Record> {
        assert!(!desc.stack_base.is_null(), "coroutine stack must not be null");
        assert!(
            desc.stack_size >= min_stack_size(),
            "coroutine stack_size {} is below the minimum of {}",
            desc.stack_size,
            min_stack_size(),
        );

        let high = desc.stack_base.add(desc.stack_size) as usize;
        let record_addr = (high - mem::size_of::<Record>()) & !(mem::align_of::<Record>() - 1);
        let record_ptr = record_addr as *mut Record;
        let usable_size = record_addr - desc.stack_base as usize;

        let id = CoroutineId::next();
        let ctx = Context::init(desc.stack_base, usable_size, trampoline, record_addr);

        ptr::write(
            record_ptr,
            Record {
                id,
                stack_base: desc.stack_base,
                stack_size: desc.stack_size,
                entry: desc.entry,
                cleanup: desc.cleanup,
                udata: desc.udata,
                ctx,
                name: desc.name,
                owner: Some(std::thread::current().id()),
                state: State::Scheduled,
                prev: None,
                next: None,
                linked: false,
            },
        );

        NonNull::new_unchecked(record_ptr)
    }

    /// Moves `self.state` to `new`, asserting the transition is one the
    /// lifecycle actually allows. Every legal path through the scheduler
    /// drives a record through exactly these edges.
    pub(crate) fn set_state(&mut self, new: State) {
        debug_assert!(
            Self::transition_allowed(self.state, new),
            "illegal coroutine state transition: {:?} -> {:?} (id={})",
            self.state,
            new,
            self.id.get(),
        );
        log::trace!("coroutine id={} {:?} -> {:?}", self.id.get(), self.state, new);
        self.state = new;
    }

    fn transition_allowed(from: State, to: State) -> bool {
        use State::*;
        matches!(
            (from, to),
            (Scheduled, Running)
                | (Running, Scheduled)
                | (Running, Paused)
                | (Running, Terminated)
                | (Paused, Scheduled)
                | (Paused, Detached)
                | (Detached, Paused)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_repeat() {
        let mut prev = CoroutineId::next();
        for _ in 0..1000 {
            let next = CoroutineId::next();
            assert!(next.get() > prev.get());
            prev = next;
        }
    }

    extern "C" fn noop_entry(_: *mut ()) {}
    extern "C" fn noop_cleanup(_: *mut u8, _: usize, _: *mut ()) {}
    extern "C" fn noop_trampoline(_: usize) -> ! {
        unreachable!("never resumed in a record-only test")
    }

    #[test]
    fn new_in_stack_places_the_record_inside_its_own_stack() {
        let stack = vec![0u8; min_stack_size()].leak();
        let base = stack.as_mut_ptr() as usize;
        let high = base + stack.len();
        let desc = Descriptor {
            stack_base: stack.as_mut_ptr(),
            stack_size: stack.len(),
            entry: noop_entry,
            cleanup: noop_cleanup,
            udata: std::ptr::null_mut(),
            name: None,
        };

        let rec = unsafe { Record::new_in_stack(desc, noop_trampoline) };
        let rec_addr = rec.as_ptr() as usize;

        assert!(rec_addr >= base && rec_addr + mem::size_of::<Record>() <= high);
        assert_eq!(rec_addr % mem::align_of::<Record>(), 0);
    }

    #[test]
    #[should_panic]
    fn new_in_stack_rejects_an_undersized_stack() {
        let stack = vec![0u8; min_stack_size() - 1].leak();
        let desc = Descriptor {
            stack_base: stack.as_mut_ptr(),
            stack_size: stack.len(),
            entry: noop_entry,
            cleanup: noop_cleanup,
            udata: std::ptr::null_mut(),
            name: None,
        };
        unsafe {
            Record::new_in_stack(desc, noop_trampoline);
        }
    }
}
