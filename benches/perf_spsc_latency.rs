//! Ping-pong latency benchmark for the lanes SPSC queue.
//!
//! Measures round-trip latency with exactly one message in flight and prints
//! cycle/nanosecond percentiles.
//!
//! Run: cargo build --release --bench perf_spsc_latency
//! Profile: sudo taskset -c 0,2 ./target/release/deps/perf_spsc_latency-*

use std::thread;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use lanes::spsc;

const WARMUP: usize = 10_000;
const SAMPLES: usize = 100_000;
const CAPACITY: usize = 64;

#[cfg(target_arch = "x86_64")]
#[inline]
fn rdtscp() -> u64 {
    unsafe {
        let mut aux: u32 = 0;
        core::arch::x86_64::__rdtscp(&mut aux)
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn rdtscp() -> u64 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

fn main() {
    println!("lanes SPSC ping-pong latency");
    println!("============================");
    println!("Warmup:   {WARMUP:>8}");
    println!("Samples:  {SAMPLES:>8}");
    println!("Capacity: {CAPACITY:>8}");
    println!();

    let (mut prod_fwd, mut cons_fwd) = spsc::channel::<u64>(CAPACITY).unwrap();
    let (mut prod_ret, mut cons_ret) = spsc::channel::<u64>(CAPACITY).unwrap();

    let total = WARMUP + SAMPLES;

    // Echo thread: receive on the forward ring, reply on the return ring
    let echo = thread::spawn(move || {
        for _ in 0..total {
            let val = loop {
                match cons_fwd.try_recv() {
                    Ok(v) => break v,
                    Err(_) => std::hint::spin_loop(),
                }
            };
            while prod_ret.try_send(val).is_err() {
                std::hint::spin_loop();
            }
        }
    });

    let mut hist = Histogram::<u64>::new_with_max(1_000_000, 3).unwrap();

    for i in 0..total {
        let start = rdtscp();

        while prod_fwd.try_send(i as u64).is_err() {
            std::hint::spin_loop();
        }
        loop {
            if cons_ret.try_recv().is_ok() {
                break;
            }
            std::hint::spin_loop();
        }

        let elapsed = rdtscp().wrapping_sub(start) / 2; // RTT/2 for one-way estimate

        if i >= WARMUP {
            let _ = hist.record(elapsed.min(1_000_000));
        }
    }

    echo.join().unwrap();

    let cpu_ghz = estimate_cpu_freq_ghz();

    println!("One-way latency (cycles):");
    println!("  min:   {:>7}", hist.min());
    println!("  mean:  {:>7.0}", hist.mean());
    println!("  p50:   {:>7}", hist.value_at_quantile(0.50));
    println!("  p99:   {:>7}", hist.value_at_quantile(0.99));
    println!("  p999:  {:>7}", hist.value_at_quantile(0.999));
    println!("  max:   {:>7}", hist.max());
    println!();

    println!("Estimated CPU freq: {cpu_ghz:.2} GHz");
    println!();

    println!("One-way latency (nanoseconds):");
    println!("  min:   {:>7.1} ns", hist.min() as f64 / cpu_ghz);
    println!("  mean:  {:>7.1} ns", hist.mean() / cpu_ghz);
    println!(
        "  p50:   {:>7.1} ns",
        hist.value_at_quantile(0.50) as f64 / cpu_ghz
    );
    println!(
        "  p99:   {:>7.1} ns",
        hist.value_at_quantile(0.99) as f64 / cpu_ghz
    );
    println!(
        "  p999:  {:>7.1} ns",
        hist.value_at_quantile(0.999) as f64 / cpu_ghz
    );
    println!("  max:   {:>7.1} ns", hist.max() as f64 / cpu_ghz);
}

fn estimate_cpu_freq_ghz() -> f64 {
    let start_cycles = rdtscp();
    let start_time = Instant::now();

    thread::sleep(Duration::from_millis(10));

    let end_cycles = rdtscp();
    let elapsed = start_time.elapsed();

    end_cycles.wrapping_sub(start_cycles) as f64 / elapsed.as_nanos() as f64
}
