//! Basic lazyreq example
//!
//! A request fans out into children, waits on them, and reports through a
//! notify callback. Also shows pause/unpause on the global pool.
//!
//! # Environment Variables
//!
//! - `LAZYREQ_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `LAZYREQ_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use lazyreq::{kdebug, kinfo, wait_all, PoolConfig, Request};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// LAZYREQ_LOG_LEVEL=debug LAZYREQ_FLUSH_EPRINT=1 cargo run -p lazyreq-basic
fn main() {
    println!("=== lazyreq Basic Example ===\n");

    let config = PoolConfig::from_env().num_workers(4);
    if let Err(e) = lazyreq::init(config) {
        eprintln!("failed to start pool: {}", e);
        std::process::exit(1);
    }

    let callbacks = Arc::new(AtomicUsize::new(0));

    // Scenario: one request, one callback
    let hello = Request::new(|| {
        std::thread::sleep(Duration::from_millis(10));
        String::from("hello")
    });
    let c = Arc::clone(&callbacks);
    hello.notify(move |result| {
        kdebug!("hello finished with {:?}", result);
        c.fetch_add(1, Ordering::SeqCst);
    });
    println!("request {} -> {:?}", hello.id(), hello.wait());

    // A parent that fans out and waits on its children from inside the pool
    let parent = Request::new(|| {
        let children: Vec<Request<u64>> = (1..=10u64)
            .map(|i| {
                Request::new(move || {
                    kdebug!("child {} running", i);
                    lazyreq::yield_now();
                    i * i
                })
            })
            .collect();
        wait_all(&children).into_iter().map(|r| r.unwrap_or(0)).sum::<u64>()
    });
    let c = Arc::clone(&callbacks);
    parent.notify(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    println!("sum of squares = {:?} (finished: {})", parent.wait(), parent.finished());

    // Pause holds new requests back; unpause lets them through
    lazyreq::pause();
    let held = Request::new(|| 42);
    std::thread::sleep(Duration::from_millis(50));
    println!("while paused: finished = {}", held.finished());
    lazyreq::unpause();
    println!("after unpause: {:?}", held.wait());

    // A failing request reports to its callbacks and to every waiter
    let failing: Request<u32> = Request::new(|| panic!("simulated read error"));
    let c = Arc::clone(&callbacks);
    failing.notify(move |result| {
        if let Err(e) = result {
            kinfo!("callback saw fault: {}", e);
        }
        c.fetch_add(1, Ordering::SeqCst);
    });
    println!("failing request -> {:?}", failing.wait().map_err(|e| e.to_string()));

    kinfo!("{} callback(s) ran", callbacks.load(Ordering::SeqCst));
    println!("\n=== Example Complete ===");
}
