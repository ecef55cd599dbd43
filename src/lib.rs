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

//! A minimal, deterministic, fair scheduler for stackful coroutines.
//!
//! A coroutine is a function running on its own, caller-supplied stack,
//! cooperatively scheduled alongside others on the same OS thread. Nothing
//! here preempts anything: a coroutine runs until it calls [`yield_now`],
//! [`pause`], [`exit`], returns from its entry point, or panics.
//!
//! Scheduling is per-thread and FIFO. [`start`] hands control to a brand
//! new coroutine and does not return to its caller until this thread has no
//! scheduled, running, or paused coroutine left, or until something calls
//! [`exit`]. From inside a coroutine, [`start`] instead spawns a child and
//! returns immediately, leaving the caller running.
//!
//! A paused coroutine can be moved to another thread with [`detach`] and
//! [`attach`]; this is the only cross-thread coordination the scheduler
//! does, and it costs a lock, not a context switch.
//!
//! ```no_run
//! sco::Builder::new()
//!     .name("greeter")
//!     .stack(vec![0u8; 64 * 1024].leak())
//!     .spawn(|| {
//!         println!("hello from {:?}", sco::name());
//!         sco::yield_now();
//!         println!("back again");
//!     });
//! ```

mod builder;
mod context;
mod list;
mod record;
mod registry;
mod scheduler;

#[cfg(feature = "alloc-stack")]
mod stack;

pub use builder::Builder;
pub use record::{CoroutineId, Descriptor};

#[cfg(feature = "alloc-stack")]
pub use stack::OwnedStack;

/// The smallest `stack_size` a [`Descriptor`] or [`Builder::stack`] may use.
/// Smaller than this and there isn't room for both the coroutine's
/// bookkeeping record and a usable execution stack.
pub fn min_stack_size() -> usize {
    record::min_stack_size()
}

/// A short name for how this build performs context switches (currently
/// always `"asm"`), exposed for diagnostics.
pub fn info_method() -> &'static str {
    context::METHOD
}

/// Starts a coroutine from a raw [`Descriptor`]. See the [`scheduler`
/// module docs](self) for when this returns.
pub fn start(desc: Descriptor) {
    scheduler::start(desc)
}

/// Gives up the CPU, rejoining the back of this thread's run queue. A no-op
/// if called outside a coroutine.
pub fn yield_now() {
    scheduler::yield_now()
}

/// Parks the running coroutine until something calls `resume` with its id.
/// A no-op if called outside a coroutine.
pub fn pause() {
    scheduler::pause()
}

/// Resumes a paused coroutine by id, or, with `id == 0`, re-enters the
/// runloop and drains this thread's run queue. A no-op if `id` isn't
/// currently paused on this thread.
pub fn resume(id: i64) {
    scheduler::resume(id)
}

/// Terminates the running coroutine immediately, without giving any other
/// scheduled coroutine a turn first. A no-op if called outside a coroutine;
/// never returns if called from one.
pub fn exit() {
    scheduler::exit()
}

/// `true` if this thread's scheduler has any scheduled, running, or paused
/// coroutine. Meant for a host loop to poll: `while sco::active() { sco::resume(0); }`.
pub fn active() -> bool {
    scheduler::active()
}

/// The id of the running coroutine, or `0` outside one.
pub fn id() -> i64 {
    scheduler::id()
}

/// The opaque user-data word passed in the running coroutine's
/// [`Descriptor`], or a null pointer outside one.
pub fn udata() -> *mut () {
    scheduler::udata()
}

/// The name given to the running coroutine at spawn time, if any.
pub fn name() -> Option<String> {
    scheduler::name()
}

/// How many coroutines are scheduled (waiting in the run queue) on this
/// thread.
pub fn info_scheduled() -> usize {
    scheduler::info_scheduled()
}

/// How many coroutines are running on this thread (0 or 1).
pub fn info_running() -> usize {
    scheduler::info_running()
}

/// How many coroutines are paused on this thread.
pub fn info_paused() -> usize {
    scheduler::info_paused()
}

/// How many coroutines are currently detached, process-wide.
pub fn info_detached() -> usize {
    scheduler::info_detached()
}

/// Moves a paused coroutine into the process-wide detached registry. A
/// no-op if `id` is the caller itself or isn't paused on this thread.
pub fn detach(id: i64) {
    scheduler::detach(id)
}

/// Takes a coroutine out of the detached registry and pauses it on this
/// thread. A no-op if `id` isn't currently detached.
pub fn attach(id: i64) {
    scheduler::attach(id)
}
