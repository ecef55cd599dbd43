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

//! A non-core convenience for tests and demos: allocating a guarded stack.
//! Nothing in `scheduler`, `record`, or `registry` calls into this module --
//! the scheduler only ever consumes a `(base, size)` pair the caller
//! already owns. This exists because writing a raw `mmap`/`region` call at
//! every call site in the test suite would obscure what's actually being
//! tested.

use region::{Allocation, Protection};

/// An owned, guard-paged coroutine stack. Dropping it releases the mapping;
/// callers must ensure no coroutine is still using it first.
pub struct OwnedStack {
    alloc: Allocation,
    guard_len: usize,
}

impl OwnedStack {
    /// Allocates `size` usable bytes (rounded up to a whole number of
    /// pages) plus one extra, inaccessible guard page. `size` must be large
    /// enough to hold both the coroutine record and its usable execution
    /// stack; see `sco::MIN_STACK_SIZE`.
    ///
    /// The guard page sits at the low end of the mapping -- the stack grows
    /// from the high end downward, so a stack overflow runs into the guard
    /// page first.
    pub fn new(size: usize) -> std::io::Result<Self> {
        let guard_len = region::page::size();
        let alloc =
            region::alloc(size + guard_len, Protection::READ_WRITE)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let base = alloc.as_ptr::<u8>() as *mut u8;

        unsafe {
            region::protect(base, guard_len, Protection::NONE)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        }

        Ok(OwnedStack { alloc, guard_len })
    }

    pub fn base(&self) -> *mut u8 {
        unsafe { (self.alloc.as_ptr::<u8>() as *mut u8).add(self.guard_len) }
    }

    pub fn len(&self) -> usize {
        self.alloc.len() - self.guard_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// SAFETY: the mapping is owned exclusively by this struct; handing it to a
// coroutine spawned on another thread is the whole point of this helper.
unsafe impl Send for OwnedStack {}

// SAFETY: `&OwnedStack` only ever yields the raw (base, len) pair; any
// aliasing of the pointed-to memory happens through coroutine machinery
// that's already unsafe, not through this type's own API.
unsafe impl Sync for OwnedStack {}
