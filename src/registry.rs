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

//! The process-wide detached registry: the one piece of scheduler state
//! that isn't per-thread. A coroutine that has been `detach`ed lives here,
//! owned by no thread, until some thread `attach`es it and pauses it
//! locally. This is also the only place in the crate that takes a lock or
//! allocates on the scheduler's behalf.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, OnceLock};

use crate::record::Record;

/// `Record` lives inside a coroutine's own stack; the registry only ever
/// stores its address while no thread is running it, so shipping the
/// pointer across threads between `detach` and `attach` is sound.
struct Detached(NonNull<Record>);
unsafe impl Send for Detached {}

static REGISTRY: OnceLock<Mutex<HashMap<i64, Detached>>> = OnceLock::new();

fn map() -> &'static Mutex<HashMap<i64, Detached>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Publishes a coroutine into the registry. Called with a record that has
/// just been unlinked from its owning thread's pause set.
pub(crate) fn publish(rec: NonNull<Record>) {
    let id = unsafe { (*rec.as_ptr()).id.get() };
    let prior = map().lock().expect("detached registry lock poisoned").insert(id, Detached(rec));
    debug_assert!(prior.is_none(), "coroutine id={id} published to the detached registry twice");
}

/// Removes and returns a coroutine from the registry, if present.
pub(crate) fn take(id: i64) -> Option<NonNull<Record>> {
    map().lock().expect("detached registry lock poisoned").remove(&id).map(|d| d.0)
}

/// Count of coroutines currently parked in the registry, for `info_detached()`.
pub(crate) fn len() -> usize {
    map().lock().expect("detached registry lock poisoned").len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Descriptor;

    extern "C" fn noop_entry(_: *mut ()) {}
    extern "C" fn noop_cleanup(_: *mut u8, _: usize, _: *mut ()) {}
    extern "C" fn noop_trampoline(_: usize) -> ! {
        unreachable!("never resumed in a registry-only test")
    }

    fn dummy_record() -> NonNull<Record> {
        let stack = vec![0u8; crate::min_stack_size()].leak();
        let desc = Descriptor {
            stack_base: stack.as_mut_ptr(),
            stack_size: stack.len(),
            entry: noop_entry,
            cleanup: noop_cleanup,
            udata: std::ptr::null_mut(),
            name: None,
        };
        unsafe { Record::new_in_stack(desc, noop_trampoline) }
    }

    #[test]
    fn publish_then_take_round_trips() {
        let rec = dummy_record();
        let id = unsafe { (*rec.as_ptr()).id.get() };

        let before = len();
        publish(rec);
        assert_eq!(len(), before + 1);

        let taken = take(id);
        assert_eq!(taken, Some(rec));
        assert_eq!(len(), before);
    }

    #[test]
    fn take_of_an_unpublished_id_is_none() {
        assert_eq!(take(-1), None);
    }
}
