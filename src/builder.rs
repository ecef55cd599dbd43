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

//! Ergonomic sugar over the raw `Descriptor`/`start` entry point, in the
//! shape of `std::thread::Builder`: name the coroutine, give it a stack,
//! then spawn a plain closure instead of hand-assembling an `entry`/
//! `cleanup`/`udata` triple.

use crate::record::Descriptor;
use crate::scheduler;

/// Builds a coroutine before spawning it.
pub struct Builder {
    name: Option<String>,
    stack: Option<(*mut u8, usize)>,
}

impl Builder {
    pub fn new() -> Self {
        Builder { name: None, stack: None }
    }

    /// Gives the coroutine a name, retrievable with `sco::name()` from
    /// inside it and shown in panic log lines.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Supplies the stack the coroutine will run on, from memory with a
    /// `'static` lifetime (a leaked `Vec`, for instance). `sco` never frees
    /// it.
    pub fn stack(mut self, buf: &'static mut [u8]) -> Self {
        self.stack = Some((buf.as_mut_ptr(), buf.len()));
        self
    }

    /// Supplies the stack the coroutine will run on via a raw pointer, for
    /// callers managing the memory themselves (see [`crate::OwnedStack`]).
    /// The memory must outlive the coroutine; `sco` never frees it.
    ///
    /// # Safety
    /// `base` must point to at least `size` bytes that nothing else uses
    /// for as long as the coroutine (and anything it's paused/detached
    /// into) is alive.
    pub unsafe fn stack_raw(mut self, base: *mut u8, size: usize) -> Self {
        self.stack = Some((base, size));
        self
    }

    /// Spawns `f` as a new coroutine. Panics if no stack was supplied.
    pub fn spawn<F>(self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (stack_base, stack_size) =
            self.stack.expect("Builder::spawn requires a stack; call stack(..) or stack_raw(..) first");

        let boxed: Box<dyn FnOnce() + Send + 'static> = Box::new(f);
        let udata = Box::into_raw(Box::new(boxed)) as *mut ();

        let desc = Descriptor {
            stack_base,
            stack_size,
            entry: closure_entry,
            cleanup: closure_cleanup,
            udata,
            name: self.name,
        };
        scheduler::start(desc);
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

extern "C" fn closure_entry(udata: *mut ()) {
    let boxed = unsafe { Box::from_raw(udata as *mut Box<dyn FnOnce() + Send + 'static>) };
    (*boxed)();
}

extern "C" fn closure_cleanup(_stack_base: *mut u8, _stack_size: usize, _udata: *mut ()) {
    // `closure_entry` already consumed and dropped the boxed closure before
    // this runs; the stack itself is caller-owned, so there's nothing left
    // to release here.
}
