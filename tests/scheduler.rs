//! End-to-end scheduler scenarios. Every coroutine's stack is an
//! `Arc<OwnedStack>`: a coroutine that itself spawns children needs its own
//! backing memory to outlive whatever it hands off to, including past its
//! own natural return (Rust drops a coroutine closure's captured locals as
//! soon as `entry` returns, which happens well before that closure's
//! grandchildren are done running) and especially past `exit`, which jumps
//! away without running any local destructors at all. Keeping one
//! reference-counted handle alive in the test function for the whole test
//! sidesteps both.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sco::OwnedStack;

const STACK_SIZE: usize = 64 * 1024;

fn spawn_stack() -> Arc<OwnedStack> {
    Arc::new(OwnedStack::new(STACK_SIZE).expect("failed to allocate a test stack"))
}

fn spawn_on<F>(stack: &Arc<OwnedStack>, name: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    unsafe {
        sco::Builder::new()
            .name(name)
            .stack_raw(stack.base(), stack.len())
            .spawn(f);
    }
}

/// Deterministic FIFO ordering across nested `start`s and `yield`s.
/// `start`-from-coroutine never yields, so A's own writes to 'C' and 'F'
/// land before either child has run at all; only then does the
/// round-robin among A, B, and D begin, at A's `yield`.
#[test]
fn deterministic_fifo_ordering() {
    let out = Arc::new(Mutex::new(String::new()));

    let stack_a = spawn_stack();
    let stack_b = spawn_stack();
    let stack_d = spawn_stack();

    let out_a = out.clone();
    spawn_on(&stack_a, "A", move || {
        out_a.lock().unwrap().push('A');

        let out_b = out_a.clone();
        spawn_on(&stack_b, "B", move || {
            out_b.lock().unwrap().push('B');
            sco::yield_now();
            out_b.lock().unwrap().push('D');
        });

        out_a.lock().unwrap().push('C');

        let out_d = out_a.clone();
        spawn_on(&stack_d, "D", move || {
            out_d.lock().unwrap().push('E');
            sco::yield_now();
            out_d.lock().unwrap().push('G');
        });

        out_a.lock().unwrap().push('F');
        sco::yield_now();
        out_a.lock().unwrap().push('H');
    });

    assert_eq!(*out.lock().unwrap(), "ACFBEHDG");
}

/// A root coroutine fans out 100 children without yielding; `start`
/// doesn't return to the host until every one of them -- and the root
/// itself -- has run to completion and been cleaned up.
#[test]
fn fan_out_and_drain() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let root_stack = spawn_stack();
    let child_stacks: Vec<Arc<OwnedStack>> = (0..100).map(|_| spawn_stack()).collect();

    let cleanups_root = cleanups.clone();
    spawn_on(&root_stack, "root", move || {
        for stack in &child_stacks {
            let cleanups = cleanups_root.clone();
            spawn_on(stack, "child", move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            });
        }
        cleanups_root.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(sco::info_scheduled(), 0);
    assert_eq!(sco::info_running(), 0);
    assert_eq!(sco::info_paused(), 0);
    assert_eq!(sco::info_detached(), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 101);
}

/// `exit` hands off straight to the runloop, bypassing whatever is still
/// scheduled; the host only resumes the rest afterward. Timed delays are
/// replaced with a fixed number of cooperative yields so the ordering is
/// deterministic rather than timing-dependent.
#[test]
fn early_exit_bypasses_pending_queue() {
    let out = Arc::new(Mutex::new(String::new()));

    let stack_one = spawn_stack();
    let stack_two = spawn_stack();
    let stack_three = spawn_stack();
    let stack_four = spawn_stack();

    let out1 = out.clone();
    spawn_on(&stack_one, "One", move || {
        out1.lock().unwrap().push('1');

        let out2 = out1.clone();
        spawn_on(&stack_two, "Two", move || {
            sco::yield_now();
            sco::yield_now();
            out2.lock().unwrap().push('2');
        });
        let out3 = out1.clone();
        spawn_on(&stack_three, "Three", move || {
            sco::yield_now();
            out3.lock().unwrap().push('3');
        });
        let out4 = out1.clone();
        spawn_on(&stack_four, "Four", move || {
            out4.lock().unwrap().push('4');
            sco::yield_now();
        });

        sco::exit();
    });

    // `start` already returned above -- One's `exit` sent control straight
    // back here without giving Two/Three/Four a turn.
    out.lock().unwrap().push_str(",-1");

    while sco::active() {
        sco::resume(0);
    }

    out.lock().unwrap().push_str(",-2");

    assert_eq!(*out.lock().unwrap(), "1,-1,4,3,2,-2");
}

/// 100 workers each pause themselves every round; a director coroutine
/// resumes them forward then in reverse across four rounds. No
/// intermediate steady state between a round's resumes completing and the
/// next round's pauses finds any of them still paused.
#[test]
fn pause_resume_reversibility() {
    const WORKERS: usize = 100;
    const ROUNDS: usize = 4;

    let ids: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::with_capacity(WORKERS)));
    let terminated = Arc::new(AtomicUsize::new(0));

    let director_stack = spawn_stack();
    let worker_stacks: Vec<Arc<OwnedStack>> = (0..WORKERS).map(|_| spawn_stack()).collect();

    for stack in &worker_stacks {
        let ids = ids.clone();
        let terminated = terminated.clone();
        spawn_on(stack, "worker", move || {
            ids.lock().unwrap().push(sco::id());
            for _ in 0..ROUNDS {
                sco::pause();
            }
            terminated.fetch_add(1, Ordering::SeqCst);
        });
    }

    spawn_on(&director_stack, "director", move || {
        while sco::info_paused() < WORKERS {
            sco::yield_now();
        }

        for round in 0..ROUNDS {
            let mut batch = ids.lock().unwrap().clone();
            if round % 2 == 1 {
                batch.reverse();
            }
            for id in batch {
                sco::resume(id);
            }

            while sco::info_scheduled() > 0 || sco::info_running() > 1 {
                sco::yield_now();
            }
        }
    });

    assert_eq!(sco::info_scheduled(), 0);
    assert_eq!(sco::info_running(), 0);
    assert_eq!(sco::info_paused(), 0);
    assert_eq!(terminated.load(Ordering::SeqCst), WORKERS);
}

/// A paused coroutine can move from one thread's scheduler to another via
/// `detach`/`attach`, and only through that path.
#[test]
fn cross_thread_migration() {
    const WORKERS: usize = 100;

    let terminated = Arc::new(AtomicUsize::new(0));
    let ids: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::with_capacity(WORKERS)));
    let worker_stacks: Vec<Arc<OwnedStack>> = (0..WORKERS).map(|_| spawn_stack()).collect();

    let handle_a = {
        let terminated = terminated.clone();
        let ids = ids.clone();
        let worker_stacks = worker_stacks.clone();
        std::thread::spawn(move || {
            for stack in &worker_stacks {
                let ids = ids.clone();
                let terminated = terminated.clone();
                spawn_on(stack, "migrant", move || {
                    ids.lock().unwrap().push(sco::id());
                    sco::pause();
                    terminated.fetch_add(1, Ordering::SeqCst);
                });
            }
            // Every coroutine paused itself in its first segment and
            // hasn't been resumed, so all WORKERS are still on this
            // thread's pause set.
            let all_ids = ids.lock().unwrap().clone();
            for id in all_ids {
                sco::detach(id);
            }
        })
    };
    handle_a.join().unwrap();

    let handle_b = std::thread::spawn(move || {
        while sco::info_detached() < WORKERS {
            std::thread::yield_now();
        }
        let all_ids = ids.lock().unwrap().clone();
        for id in &all_ids {
            sco::attach(*id);
        }
        for id in &all_ids {
            sco::resume(*id);
        }
        while sco::active() {
            sco::resume(0);
        }
    });
    handle_b.join().unwrap();

    assert_eq!(terminated.load(Ordering::SeqCst), WORKERS);
    assert_eq!(sco::info_detached(), 0);
}

/// The host drives the scheduler from an outer loop, draining whatever's
/// scheduled on each `resume(0)` call and returning as soon as only paused
/// coroutines remain.
#[test]
fn runloop_continuation_via_resume_zero() {
    let counter = Arc::new(AtomicI64::new(0));
    let id_slot = Arc::new(AtomicI64::new(0));
    let stack = spawn_stack();

    let counter2 = counter.clone();
    let id_slot2 = id_slot.clone();
    spawn_on(&stack, "pauser", move || {
        id_slot2.store(sco::id(), Ordering::SeqCst);
        counter2.fetch_add(1, Ordering::SeqCst);
        sco::pause();
        counter2.fetch_add(1, Ordering::SeqCst);
    });

    // `pause` handed control straight back here since nothing else was
    // scheduled; the coroutine is parked, not running or scheduled.
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(sco::info_paused(), 1);
    assert!(sco::active());

    sco::resume(id_slot.load(Ordering::SeqCst) + 1); // unrelated id: no-op
    assert_eq!(sco::info_paused(), 1);

    sco::resume(id_slot.load(Ordering::SeqCst));

    while sco::active() {
        sco::resume(0);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(sco::info_paused(), 0);
}
