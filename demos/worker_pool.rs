//! A small pool of worker coroutines that park themselves with `pause`
//! until a second OS thread hands them work by `resume`ing them one at a
//! time, then migrates the rest off to a third thread with
//! `detach`/`attach` to show that a paused coroutine is portable.

use std::sync::{Arc, Mutex};
use std::thread;

fn main() {
    env_logger::init();

    let worker_count = num_cpus::get();
    let ids: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let worker_stacks: Vec<_> = (0..worker_count).map(|_| vec![0u8; 64 * 1024].leak()).collect();

    let producer = thread::spawn({
        let ids = ids.clone();
        move || {
            for (n, stack) in worker_stacks.into_iter().enumerate() {
                let ids = ids.clone();
                sco::Builder::new().name(format!("worker-{n}")).stack(stack).spawn(move || {
                    ids.lock().unwrap().push(sco::id());
                    println!("worker {n} parking as id {}", sco::id());
                    sco::pause();
                    println!("worker {n} woke up and is done");
                });
            }

            // Every worker above parked itself on its very first turn, so
            // they're all still paused on this (the producer) thread.
            let all_ids = ids.lock().unwrap().clone();
            for id in all_ids {
                sco::detach(id);
            }
        }
    });
    producer.join().unwrap();

    let consumer = thread::spawn(move || {
        while sco::info_detached() < worker_count {
            thread::yield_now();
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
    consumer.join().unwrap();
}
