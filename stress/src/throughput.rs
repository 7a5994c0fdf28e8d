use num_format::{Locale, ToFormattedString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "stats")]
use sysinfo::System;

const SLIDING_WINDOW_SIZE: u64 = 2; // In seconds
const BATCH_SIZE: u64 = 1000;
const COLLECT_INTERVAL: Duration = Duration::from_millis(500);

static STOP: AtomicBool = AtomicBool::new(false);

#[repr(C)]
#[derive(Default)]
struct WorkerStats {
    count: AtomicU64,
    /// Padding to avoid false sharing
    padding: [u64; 15],
}

/// Runs `func` on all but two physical cores until Ctrl-C, reporting the
/// combined throughput. `collect` runs on its own thread every
/// [COLLECT_INTERVAL], the way a periodic reader would.
pub fn test_throughput<F, C>(func: F, collect: C)
where
    F: Fn() + Sync + Send + 'static,
    C: Fn() + Send + 'static,
{
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    ctrlc::set_handler(move || {
        STOP.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let num_threads = num_cpus::get_physical().saturating_sub(2).max(1);
    println!("Number of worker threads: {}", num_threads);
    let func_arc = Arc::new(func);
    let worker_stats_shared: Arc<Vec<WorkerStats>> =
        Arc::new((0..num_threads).map(|_| WorkerStats::default()).collect());
    let worker_stats_shared_monitor = Arc::clone(&worker_stats_shared);

    let mut handles = Vec::with_capacity(num_threads + 2);
    handles.push(thread::spawn(move || {
        #[cfg(feature = "stats")]
        let mut system = System::new();

        let mut start_time = Instant::now();
        let mut total_count_old: u64 = 0;
        loop {
            thread::sleep(Duration::from_millis(500));
            if STOP.load(Ordering::SeqCst) {
                break;
            }

            let elapsed = start_time.elapsed();
            if elapsed.as_secs() >= SLIDING_WINDOW_SIZE {
                let total_count_u64: u64 = worker_stats_shared_monitor
                    .iter()
                    .map(|worker_stat| worker_stat.count.load(Ordering::Relaxed))
                    .sum();
                let current_count = total_count_u64 - total_count_old;
                total_count_old = total_count_u64;
                let throughput = (current_count as f64 / elapsed.as_secs_f64()) as u64;
                println!(
                    "Throughput: {} iterations/sec",
                    throughput.to_formatted_string(&Locale::en)
                );

                #[cfg(feature = "stats")]
                {
                    system.refresh_memory();
                    println!(
                        "Used memory: {} MB",
                        (system.used_memory() / 1024 / 1024).to_formatted_string(&Locale::en)
                    );
                }

                start_time = Instant::now();
            }
        }
    }));

    handles.push(thread::spawn(move || {
        while !STOP.load(Ordering::SeqCst) {
            thread::sleep(COLLECT_INTERVAL);
            collect();
        }
    }));

    for thread_index in 0..num_threads {
        let worker_stats_shared = Arc::clone(&worker_stats_shared);
        let func_arc_clone = Arc::clone(&func_arc);
        handles.push(thread::spawn(move || loop {
            for _ in 0..BATCH_SIZE {
                func_arc_clone();
            }
            worker_stats_shared[thread_index]
                .count
                .fetch_add(BATCH_SIZE, Ordering::Relaxed);
            if STOP.load(Ordering::SeqCst) {
                break;
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
