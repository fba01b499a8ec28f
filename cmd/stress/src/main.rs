//! Stress test - deep request trees
//!
//! Builds a tree of requests where every interior node waits on its
//! children, so far more requests are waiting at once than there are
//! worker threads or fiber stacks. Counts submissions against notify
//! callbacks.
//!
//! Usage: `stress [depth] [branching] [full]` (defaults 6, 10). With
//! `full` every interior node fans out: depth 6 is 1.1 million requests.
//! Pool settings come from `LAZYREQ_*`, so the default FIFO order and
//! stack cap are what gets exercised.

use lazyreq::{wait_all, Pool, PoolConfig, Request};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

struct Counters {
    submitted: AtomicU64,
    notified: AtomicU64,
}

/// xorshift64; good enough to decide which nodes fan out
fn next_rand(state: u64) -> u64 {
    let mut x = state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

#[derive(Clone, Copy)]
struct Shape {
    max_depth: u32,
    branching: u64,
    full: bool,
}

fn node(depth: u32, shape: Shape, seed: u64, counters: Arc<Counters>) -> Request<u64> {
    let inner = Arc::clone(&counters);
    let req = Request::new(move || {
        let fan_out = depth < shape.max_depth
            && (shape.full || depth == 0 || next_rand(seed) % 2 == 0);
        if !fan_out {
            return 1;
        }
        let children: Vec<Request<u64>> = (0..shape.branching)
            .map(|i| node(depth + 1, shape, next_rand(seed.wrapping_add(i + 1)), Arc::clone(&inner)))
            .collect();
        1 + wait_all(&children).into_iter().map(|r| r.unwrap_or(0)).sum::<u64>()
    });

    counters.submitted.fetch_add(1, Ordering::Relaxed);
    let c = Arc::clone(&counters);
    req.notify(move |_| {
        c.notified.fetch_add(1, Ordering::Relaxed);
    });
    req
}

fn main() {
    println!("=== lazyreq Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let depth: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(6);
    let branching: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);
    let full = args.next().is_some_and(|s| s == "full");
    let shape = Shape {
        max_depth: depth,
        branching,
        full,
    };

    let config = PoolConfig::from_env();

    let pool = match Pool::new(config) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("failed to start pool: {}", e);
            std::process::exit(1);
        }
    };

    let counters = Arc::new(Counters {
        submitted: AtomicU64::new(0),
        notified: AtomicU64::new(0),
    });

    println!(
        "Tree depth {}, branching {}{}, {} workers, {} stacks, {:?}",
        depth,
        branching,
        if full { " (full)" } else { "" },
        pool.num_workers(),
        pool.config().max_fibers,
        pool.config().queue_order
    );
    let start = Instant::now();

    let root_counters = Arc::clone(&counters);
    let root = Request::new_in(&pool, move || {
        node(0, shape, 0x2545_F491_4F6C_DD1D, root_counters)
            .wait()
            .unwrap_or(0)
    });
    let nodes = root.wait();
    let elapsed = start.elapsed();

    let submitted = counters.submitted.load(Ordering::Relaxed);
    let notified = counters.notified.load(Ordering::Relaxed);

    println!("\n=== Results ===");
    println!("Nodes:           {:?}", nodes);
    println!("Submitted:       {}", submitted);
    println!("Notified:        {}", notified);
    println!("Peak live:       {} of {} stacks", pool.peak_fibers(), pool.config().max_fibers);
    println!("Total time:      {:?}", elapsed);
    println!("Throughput:      {:.0} requests/sec", submitted as f64 / elapsed.as_secs_f64());

    if submitted != notified {
        println!("MISMATCH: {} callbacks missing", submitted - notified);
        std::process::exit(1);
    }

    println!("\n=== Stress Test Complete ===");
}
