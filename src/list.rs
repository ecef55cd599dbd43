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

//! Intrusive doubly-linked list used for both the run queue and the pause
//! set. Nodes are `Record`s living inside caller-supplied coroutine stacks;
//! the list itself never allocates and only ever holds raw pointers into
//! memory it does not own.

use std::ptr::NonNull;

use crate::record::Record;

/// FIFO-ordered (for the run queue) or unordered (for the pause set)
/// membership container. A given `Record` can be linked into at most one
/// `List` at a time -- `push_tail` asserts this in debug builds.
pub(crate) struct List {
    head: Option<NonNull<Record>>,
    tail: Option<NonNull<Record>>,
}

impl List {
    pub const fn new() -> Self {
        List { head: None, tail: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Links `node` at the tail. `node` must not currently be linked into
    /// any list.
    pub fn push_tail(&mut self, node: NonNull<Record>) {
        unsafe {
            let n = &mut *node.as_ptr();
            debug_assert!(!n.linked, "pushing a record that is already linked into a list");
            n.prev = self.tail;
            n.next = None;
            n.linked = true;
            match self.tail {
                Some(t) => (*t.as_ptr()).next = Some(node),
                None => self.head = Some(node),
            }
            self.tail = Some(node);
        }
    }

    pub fn pop_head(&mut self) -> Option<NonNull<Record>> {
        let head = self.head?;
        self.unlink(head);
        Some(head)
    }

    /// Removes `node` from this list. `node` must currently be linked into
    /// this list (not merely "some" list).
    pub fn unlink(&mut self, node: NonNull<Record>) {
        unsafe {
            let n = &mut *node.as_ptr();
            debug_assert!(n.linked, "unlinking a record that isn't linked into any list");
            match n.prev {
                Some(p) => (*p.as_ptr()).next = n.next,
                None => self.head = n.next,
            }
            match n.next {
                Some(next) => (*next.as_ptr()).prev = n.prev,
                None => self.tail = n.prev,
            }
            n.prev = None;
            n.next = None;
            n.linked = false;
        }
    }

    /// Linear scan for the record with the given id, unlinking it if found.
    /// Used by `resume(id)` and `detach(id)` against the pause set, where
    /// order doesn't matter and membership is small by construction (a
    /// program pauses what it intends to resume or detach, not more).
    pub fn find_and_unlink(&mut self, id: i64) -> Option<NonNull<Record>> {
        let mut cur = self.head;
        while let Some(node) = cur {
            let rec = unsafe { &*node.as_ptr() };
            if rec.id.get() == id {
                self.unlink(node);
                return Some(node);
            }
            cur = rec.next;
        }
        None
    }
}
