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

//! The context-switch primitive. A `Context` holds the saved callee-saved
//! register file for one coroutine (or, for `caller_ctx`, for the OS thread
//! that is about to enter the scheduler). `Context::swap` is the only place
//! in the crate that actually transfers control between stacks.
//!
//! Supported architectures: x86_64 and aarch64, both via a hand-written
//! `global_asm!` routine rather than an external assembler or build script --
//! this crate links nothing beyond the Rust toolchain itself.

/// A human-readable name for the context-switch method this build uses,
/// exposed through `info_method()` for diagnostics.
pub const METHOD: &str = "asm";

#[cfg(target_arch = "x86_64")]
mod arch {
    use std::arch::global_asm;

    /// Callee-saved register file per the System V AMD64 ABI, plus the
    /// stack pointer. `rsp` is restored last and is what actually switches
    /// stacks; the rest are restored because the ABI promises the caller
    /// they'll survive a call.
    #[repr(C)]
    #[derive(Default)]
    pub(crate) struct Registers {
        rbx: u64,
        rbp: u64,
        r12: u64,
        r13: u64,
        r14: u64,
        r15: u64,
        rsp: u64,
    }

    // A coroutine's very first resumption can't run the trampoline directly:
    // the ABI argument register (rdi) isn't one of the seven fields above, so
    // there's nowhere to stash the trampoline's argument across the context
    // switch. `sco_bootstrap` is the fixed landing pad every new context
    // returns into instead: it moves the smuggled argument out of r12 into
    // rdi and jumps (not calls -- there is nothing to return to) into the
    // smuggled function pointer in r13.
    global_asm!(
        ".text",
        ".global sco_swap_context",
        "sco_swap_context:",
        "mov [rdi + 0], rbx",
        "mov [rdi + 8], rbp",
        "mov [rdi + 16], r12",
        "mov [rdi + 24], r13",
        "mov [rdi + 32], r14",
        "mov [rdi + 40], r15",
        "mov [rdi + 48], rsp",
        "mov rbx, [rsi + 0]",
        "mov rbp, [rsi + 8]",
        "mov r12, [rsi + 16]",
        "mov r13, [rsi + 24]",
        "mov r14, [rsi + 32]",
        "mov r15, [rsi + 40]",
        "mov rsp, [rsi + 48]",
        "ret",
        ".global sco_bootstrap",
        "sco_bootstrap:",
        "mov rdi, r12",
        "jmp r13",
    );

    extern "C" {
        fn sco_swap_context(out: *mut Registers, inp: *const Registers);
        fn sco_bootstrap();
    }

    pub(crate) const MIN_STACK_SIZE: usize = 16 * 1024;
    const STACK_ALIGN: usize = 16;

    pub(crate) unsafe fn swap(out: *mut Registers, inp: *const Registers) {
        sco_swap_context(out, inp);
    }

    pub(crate) unsafe fn init(stack_base: *mut u8, stack_size: usize, entry: usize, arg: usize) -> Registers {
        let top = (stack_base as usize + stack_size) & !(STACK_ALIGN - 1);
        // `sco_swap_context`'s closing `ret` pops this slot and lands in
        // `sco_bootstrap` as though `sco_bootstrap` had just been `call`ed,
        // so `rsp` here must be 16-byte aligned.
        let sp = top - STACK_ALIGN;
        (sp as *mut u64).write(sco_bootstrap as usize as u64);
        Registers {
            rbx: 0,
            rbp: 0,
            r12: arg as u64,
            r13: entry as u64,
            r14: 0,
            r15: 0,
            rsp: sp as u64,
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use std::arch::global_asm;

    /// Callee-saved register file per AAPCS64: x19-x28, the frame pointer
    /// (x29), the link register (x30), and the stack pointer.
    #[repr(C)]
    #[derive(Default)]
    pub(crate) struct Registers {
        x19: u64,
        x20: u64,
        x21: u64,
        x22: u64,
        x23: u64,
        x24: u64,
        x25: u64,
        x26: u64,
        x27: u64,
        x28: u64,
        fp: u64,
        lr: u64,
        sp: u64,
    }

    // Unlike x86_64, `ret` here branches to whatever is in `lr`, so a fresh
    // context's `lr` can point straight at `sco_bootstrap` with no stack
    // write needed. The trampoline argument and function pointer are
    // smuggled through x19/x20, the same trick as r12/r13 on x86_64.
    global_asm!(
        ".text",
        ".global sco_swap_context",
        "sco_swap_context:",
        "stp x19, x20, [x0, #0]",
        "stp x21, x22, [x0, #16]",
        "stp x23, x24, [x0, #32]",
        "stp x25, x26, [x0, #48]",
        "stp x27, x28, [x0, #64]",
        "stp x29, x30, [x0, #80]",
        "mov x2, sp",
        "str x2, [x0, #96]",
        "ldp x19, x20, [x1, #0]",
        "ldp x21, x22, [x1, #16]",
        "ldp x23, x24, [x1, #32]",
        "ldp x25, x26, [x1, #48]",
        "ldp x27, x28, [x1, #64]",
        "ldp x29, x30, [x1, #80]",
        "ldr x2, [x1, #96]",
        "mov sp, x2",
        "ret",
        ".global sco_bootstrap",
        "sco_bootstrap:",
        "mov x0, x19",
        "br x20",
    );

    extern "C" {
        fn sco_swap_context(out: *mut Registers, inp: *const Registers);
        fn sco_bootstrap();
    }

    pub(crate) const MIN_STACK_SIZE: usize = 16 * 1024;
    const STACK_ALIGN: usize = 16;

    pub(crate) unsafe fn swap(out: *mut Registers, inp: *const Registers) {
        sco_swap_context(out, inp);
    }

    pub(crate) unsafe fn init(stack_base: *mut u8, stack_size: usize, entry: usize, arg: usize) -> Registers {
        let top = (stack_base as usize + stack_size) & !(STACK_ALIGN - 1);
        Registers {
            x19: arg as u64,
            x20: entry as u64,
            lr: sco_bootstrap as usize as u64,
            sp: top as u64,
            ..Registers::default()
        }
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod arch {
    compile_error!("sco's context-switch primitive has no implementation for this architecture");
}

pub(crate) use arch::MIN_STACK_SIZE;

/// Saved register state for one stack. `Context::empty()` is used for
/// `caller_ctx`, whose contents are meaningless until the first `swap`
/// writes real register state into it.
pub(crate) struct Context {
    regs: arch::Registers,
}

impl Context {
    pub(crate) fn empty() -> Self {
        Context { regs: arch::Registers::default() }
    }

    /// Builds a context for a brand-new coroutine stack. `entry` is the
    /// trampoline's address and `arg` is the word passed to it (in practice
    /// a pointer to the coroutine's `Record`, smuggled through a
    /// callee-saved register rather than an argument register -- see the
    /// architecture modules above).
    pub(crate) unsafe fn init(
        stack_base: *mut u8,
        stack_size: usize,
        entry: extern "C" fn(usize) -> !,
        arg: usize,
    ) -> Self {
        Context { regs: arch::init(stack_base, stack_size, entry as usize, arg) }
    }

    /// Saves the running context's registers into `self` and loads `to`'s.
    /// Returns only once some other `swap` targets `self` again.
    pub(crate) unsafe fn swap(&mut self, to: &Context) {
        arch::swap(&mut self.regs, &to.regs);
    }
}
