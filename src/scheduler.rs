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

//! The per-thread scheduler: a FIFO run queue, an unordered pause set, and
//! the free functions (`start`, `yield_now`, `pause`, `resume`, `exit`, ...)
//! that move coroutine records between them. Every OS thread that calls
//! into this module gets its own independent instance of this state; the
//! only cross-thread coordination is through the detached registry.

use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use crate::context::Context;
use crate::list::List;
use crate::record::{Descriptor, Record, State};
use crate::registry;

thread_local! {
    static SCHEDULER: UnsafeCell<Scheduler> = UnsafeCell::new(Scheduler::new());
}

struct Scheduler {
    run_queue: List,
    pause_set: List,
    current: Option<NonNull<Record>>,
    caller_ctx: Context,
    scheduled: usize,
    running: usize,
    paused: usize,
    exit_to_caller: bool,
    pending_cleanup: Option<NonNull<Record>>,
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            run_queue: List::new(),
            pause_set: List::new(),
            current: None,
            caller_ctx: Context::empty(),
            scheduled: 0,
            running: 0,
            paused: 0,
            exit_to_caller: false,
            pending_cleanup: None,
        }
    }

    fn current() -> &'static mut Scheduler {
        SCHEDULER.with(|cell| unsafe { &mut *cell.get() })
    }
}

/// Starts a new coroutine from `desc`.
///
/// Called from the host thread (outside any coroutine): blocks, driving the
/// scheduler, until this thread has nothing left scheduled, running, or
/// paused, or until some coroutine calls `exit`.
///
/// Called from inside a running coroutine: enqueues the child and returns
/// immediately; the caller keeps running.
pub fn start(desc: Descriptor) {
    let sched = Scheduler::current();

    if sched.current.is_some() {
        let child = unsafe { Record::new_in_stack(desc, trampoline) };
        sched.run_queue.push_tail(child);
        sched.scheduled += 1;
        log::debug!(
            "start: spawned child id={} from id={}",
            unsafe { (*child.as_ptr()).id.get() },
            unsafe { (*sched.current.unwrap().as_ptr()).id.get() },
        );
        return;
    }

    let child = unsafe { Record::new_in_stack(desc, trampoline) };
    unsafe { (*child.as_ptr()).set_state(State::Running) };
    sched.current = Some(child);
    sched.running += 1;
    log::debug!("start: host thread entering the scheduler as id={}", unsafe { (*child.as_ptr()).id.get() });

    unsafe {
        let from_ctx: *mut Context = &mut sched.caller_ctx;
        let to_ctx: *const Context = &(*child.as_ptr()).ctx;
        switch_to(from_ctx, to_ctx);
    }

    pump();
}

/// Drives the run queue on the current (host) thread until it's empty or a
/// coroutine calls `exit`. Shared by `start`'s host-side return path and by
/// `resume(0)`.
fn pump() {
    loop {
        let sched = Scheduler::current();

        if sched.exit_to_caller {
            sched.exit_to_caller = false;
            log::trace!("pump: returning to the runloop (exit requested)");
            return;
        }

        let next = match sched.run_queue.pop_head() {
            Some(n) => n,
            None => return,
        };
        sched.scheduled -= 1;
        sched.running += 1;
        unsafe { (*next.as_ptr()).set_state(State::Running) };
        sched.current = Some(next);

        unsafe {
            let from_ctx: *mut Context = &mut sched.caller_ctx;
            let to_ctx: *const Context = &(*next.as_ptr()).ctx;
            switch_to(from_ctx, to_ctx);
        }
    }
}

/// Voluntarily gives up the CPU. Places `current` at the tail of the run
/// queue and resumes whichever coroutine was already waiting, if any;
/// otherwise returns control to the runloop. A no-op outside a coroutine.
pub fn yield_now() {
    let sched = Scheduler::current();
    let cur = match sched.current {
        Some(c) => c,
        None => {
            log::trace!("yield_now: called outside a coroutine, no-op");
            return;
        }
    };

    // Snapshot who else is waiting *before* re-queuing `cur`, so a lone
    // runnable coroutine yields straight back to the runloop instead of
    // popping itself right back off the queue.
    let next = sched.run_queue.pop_head();

    unsafe { (*cur.as_ptr()).set_state(State::Scheduled) };
    sched.running -= 1;
    sched.scheduled += 1;
    sched.run_queue.push_tail(cur);

    unsafe { hand_off(sched, cur, next) };
}

/// Removes `current` from scheduling entirely until some thread calls
/// `resume` with its id (or, after a `detach`/`attach` round trip, a
/// different thread does). A no-op outside a coroutine.
pub fn pause() {
    let sched = Scheduler::current();
    let cur = match sched.current {
        Some(c) => c,
        None => {
            log::trace!("pause: called outside a coroutine, no-op");
            return;
        }
    };

    let next = sched.run_queue.pop_head();

    unsafe { (*cur.as_ptr()).set_state(State::Paused) };
    sched.running -= 1;
    sched.paused += 1;
    sched.pause_set.push_tail(cur);
    log::trace!("pause: id={} parked", unsafe { (*cur.as_ptr()).id.get() });

    unsafe { hand_off(sched, cur, next) };
}

/// Moves a coroutine from paused to scheduled. `id == 0` instead drives the
/// run queue on the current thread (equivalent to re-entering the runloop);
/// only meaningful from the runloop/host thread, it's a no-op from inside a
/// coroutine. Any other id is looked up in this thread's pause set and is a
/// no-op if not found there (including if it's paused on a different
/// thread).
pub fn resume(id: i64) {
    if id == 0 {
        if Scheduler::current().current.is_some() {
            log::trace!("resume(0): called from inside a coroutine, no-op");
            return;
        }
        pump();
        return;
    }

    let sched = Scheduler::current();
    match sched.pause_set.find_and_unlink(id) {
        Some(rec) => {
            unsafe { (*rec.as_ptr()).set_state(State::Scheduled) };
            sched.paused -= 1;
            sched.scheduled += 1;
            sched.run_queue.push_tail(rec);
            log::trace!("resume: id={id} moved paused -> scheduled");
        }
        None => log::trace!("resume: id={id} not paused on this thread, no-op"),
    }
}

/// Terminates `current` immediately and hands off straight to the runloop,
/// without first giving any other scheduled coroutine a turn. A no-op
/// outside a coroutine; never returns when called from one.
pub fn exit() {
    let sched = Scheduler::current();
    let cur = match sched.current {
        Some(c) => c,
        None => {
            log::trace!("exit: called outside a coroutine, no-op");
            return;
        }
    };

    unsafe { (*cur.as_ptr()).set_state(State::Terminated) };
    sched.running -= 1;
    sched.pending_cleanup = Some(cur);
    sched.exit_to_caller = true;
    sched.current = None;
    log::debug!("exit: id={} requesting immediate hand-off to the runloop", unsafe { (*cur.as_ptr()).id.get() });

    unsafe {
        let from_ctx: *mut Context = &mut (*cur.as_ptr()).ctx;
        let to_ctx: *const Context = &sched.caller_ctx;
        switch_to(from_ctx, to_ctx);
    }
    unreachable!("a terminated coroutine is never resumed");
}

/// `true` if this thread's scheduler has any scheduled, running, or paused
/// coroutine at all. Meant to be polled from the host/runloop to decide
/// whether it's still worth calling `resume(0)`.
pub fn active() -> bool {
    let sched = Scheduler::current();
    sched.scheduled + sched.running + sched.paused > 0
}

/// The id of the running coroutine, or `0` if called outside one.
pub fn id() -> i64 {
    match Scheduler::current().current {
        Some(c) => unsafe { (*c.as_ptr()).id.get() },
        None => 0,
    }
}

/// The opaque user-data word of the running coroutine, or a null pointer if
/// called outside one.
pub fn udata() -> *mut () {
    match Scheduler::current().current {
        Some(c) => unsafe { (*c.as_ptr()).udata },
        None => std::ptr::null_mut(),
    }
}

/// The name given to the running coroutine at spawn time, if any, or `None`
/// if called outside a coroutine.
pub fn name() -> Option<String> {
    Scheduler::current().current.and_then(|c| unsafe { (*c.as_ptr()).name.clone() })
}

pub fn info_scheduled() -> usize {
    Scheduler::current().scheduled
}

pub fn info_running() -> usize {
    Scheduler::current().running
}

pub fn info_paused() -> usize {
    Scheduler::current().paused
}

pub fn info_detached() -> usize {
    registry::len()
}

/// Removes a paused coroutine from this thread's pause set and publishes it
/// to the process-wide detached registry, where any thread can later
/// `attach` it. Detaching the running coroutine or one not paused on this
/// thread is a no-op.
pub fn detach(id: i64) {
    let sched = Scheduler::current();
    if sched.current.map(|c| unsafe { (*c.as_ptr()).id.get() }) == Some(id) {
        log::trace!("detach: id={id} is the caller itself, no-op");
        return;
    }

    match sched.pause_set.find_and_unlink(id) {
        Some(rec) => {
            unsafe {
                (*rec.as_ptr()).owner = None;
                (*rec.as_ptr()).set_state(State::Detached);
            }
            sched.paused -= 1;
            registry::publish(rec);
            log::debug!("detach: id={id} moved to the detached registry");
        }
        None => log::trace!("detach: id={id} not paused on this thread, no-op"),
    }
}

/// Takes a coroutine out of the detached registry and parks it, paused, on
/// this thread. A no-op if `id` isn't currently detached.
pub fn attach(id: i64) {
    let Some(rec) = registry::take(id) else {
        log::trace!("attach: id={id} not in the detached registry, no-op");
        return;
    };

    let sched = Scheduler::current();
    unsafe {
        (*rec.as_ptr()).owner = Some(std::thread::current().id());
        (*rec.as_ptr()).set_state(State::Paused);
    }
    sched.pause_set.push_tail(rec);
    sched.paused += 1;
    log::debug!("attach: id={id} attached to this thread, paused");
}

/// Switches out of `from` (whose state has already been updated and who has
/// already been removed from `sched.current`) into `next` if there is one,
/// or back to the runloop otherwise.
unsafe fn hand_off(sched: &mut Scheduler, from: NonNull<Record>, next: Option<NonNull<Record>>) {
    let from_ctx: *mut Context = &mut (*from.as_ptr()).ctx;
    match next {
        Some(rec) => {
            sched.scheduled -= 1;
            sched.running += 1;
            (*rec.as_ptr()).set_state(State::Running);
            sched.current = Some(rec);
            let to_ctx: *const Context = &(*rec.as_ptr()).ctx;
            switch_to(from_ctx, to_ctx);
        }
        None => {
            sched.current = None;
            let to_ctx: *const Context = &sched.caller_ctx;
            switch_to(from_ctx, to_ctx);
        }
    }
}

/// Performs the actual register swap, then, as the very first thing the
/// newly-resumed side of that swap does, runs any cleanup left pending by a
/// coroutine that terminated on the way here.
unsafe fn switch_to(from_ctx: *mut Context, to_ctx: *const Context) {
    (*from_ctx).swap(&*to_ctx);
    run_pending_cleanup();
}

fn run_pending_cleanup() {
    let sched = Scheduler::current();
    if let Some(rec) = sched.pending_cleanup.take() {
        unsafe {
            let r = &*rec.as_ptr();
            log::trace!("cleanup: id={}", r.id.get());
            (r.cleanup)(r.stack_base, r.stack_size, r.udata);
        }
    }
}

/// The fixed entry point every coroutine's context lands on when first
/// resumed. Runs the user `entry` under `catch_unwind` so a panicking
/// coroutine terminates the coroutine, not the thread, then hands off
/// exactly as a natural return from `entry` would.
extern "C" fn trampoline(arg: usize) -> ! {
    let rec_ptr = unsafe { NonNull::new_unchecked(arg as *mut Record) };

    let (entry, udata) = unsafe {
        let r = &*rec_ptr.as_ptr();
        (r.entry, r.udata)
    };

    struct SendPtr(*mut ());
    unsafe impl Send for SendPtr {}
    let udata = SendPtr(udata);

    let result = panic::catch_unwind(AssertUnwindSafe(|| entry(udata.0)));
    if let Err(payload) = result {
        let id = unsafe { (*rec_ptr.as_ptr()).id.get() };
        let msg = panic_message(&payload);
        log::error!("coroutine id={id} panicked: {msg}");
    }

    let sched = Scheduler::current();
    unsafe { (*rec_ptr.as_ptr()).set_state(State::Terminated) };
    sched.running -= 1;
    sched.pending_cleanup = Some(rec_ptr);

    let next = sched.run_queue.pop_head();
    unsafe { hand_off(sched, rec_ptr, next) };
    unreachable!("a terminated coroutine is never resumed");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    }
}
