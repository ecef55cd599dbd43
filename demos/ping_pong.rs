//! Two coroutines volleying control back and forth with `yield_now`, run
//! straight from the host thread until both terminate.

fn main() {
    env_logger::init();

    let ping_stack = vec![0u8; 64 * 1024].leak();
    let pong_stack = vec![0u8; 64 * 1024].leak();

    sco::Builder::new().name("ping").stack(ping_stack).spawn(|| {
        for round in 0..5 {
            println!("ping {round}");
            sco::yield_now();
        }
    });

    sco::Builder::new().name("pong").stack(pong_stack).spawn(|| {
        for round in 0..5 {
            sco::yield_now();
            println!("pong {round}");
        }
    });
}
