//! Stress tests for segstore.
//!
//! These workloads drive many concurrent operations through one store and
//! report what succeeded.

use bytes::Bytes;
use segstore_core::{AttributeId, AttributeUpdate, SegmentError, SegmentStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::fixtures::TEST_TIMEOUT;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per task.
    pub operations: usize,
    /// Number of concurrent tasks.
    pub tasks: usize,
    /// Size of each append in bytes.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            tasks: 4,
            payload_size: 256,
        }
    }
}

/// Counts successes and failures across tasks.
#[derive(Default)]
struct Tally {
    successful: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record<T>(&self, result: &Result<T, SegmentError>) {
        match result {
            Ok(_) => self.successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Run concurrent unconditional appends with an event counter against one
/// segment. The segment must exist.
pub async fn stress_concurrent_appends(store: &SegmentStore, segment: &str, config: &StressConfig) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let start = Instant::now();

    let tasks: Vec<_> = (0..config.tasks)
        .map(|t| {
            let store = store.clone();
            let tally = Arc::clone(&tally);
            let segment = segment.to_string();
            let config = config.clone();
            tokio::spawn(async move {
                let payload = Bytes::from(vec![(t % 256) as u8; config.payload_size]);
                for _ in 0..config.operations {
                    let result = match store.append(
                        &segment,
                        payload.clone(),
                        vec![AttributeUpdate::accumulate(AttributeId::EVENT_COUNT, 1)],
                        TEST_TIMEOUT,
                    ) {
                        Ok(handle) => handle.await,
                        Err(e) => Err(SegmentError::internal(e.to_string())),
                    };
                    tally.record(&result);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("Task panicked");
    }
    tally.finish(start)
}

/// Run writers racing conditional appends against one segment. Each writer
/// reads the length, then appends at it; losers retry. Every operation
/// eventually succeeds, so failures count lost races.
pub async fn stress_conditional_appends(
    store: &SegmentStore,
    segment: &str,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let start = Instant::now();

    let tasks: Vec<_> = (0..config.tasks)
        .map(|_| {
            let store = store.clone();
            let tally = Arc::clone(&tally);
            let segment = segment.to_string();
            let config = config.clone();
            tokio::spawn(async move {
                let payload = Bytes::from(vec![0xAB; config.payload_size]);
                let mut done = 0;
                while done < config.operations {
                    let info = store
                        .get_stream_segment_info(&segment, false, TEST_TIMEOUT)
                        .expect("Invalid info arguments")
                        .await
                        .expect("Failed to get segment info");
                    let result = store
                        .append_at(&segment, info.length, payload.clone(), vec![], TEST_TIMEOUT)
                        .expect("Invalid append arguments")
                        .await;
                    match &result {
                        Ok(()) => done += 1,
                        Err(SegmentError::BadOffset { .. }) => {}
                        Err(other) => panic!("unexpected append failure: {other}"),
                    }
                    tally.record(&result);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("Task panicked");
    }
    tally.finish(start)
}

/// Run tailing readers alongside a writer on one segment and check every
/// reader sees the same bytes. Returns one operation per append.
pub async fn stress_tailing_reads(store: &SegmentStore, segment: &str, config: &StressConfig) -> StressTestResult {
    let total = (config.operations * config.payload_size) as u64;
    let readers: Vec<_> = (0..config.tasks)
        .map(|_| {
            let store = store.clone();
            let segment = segment.to_string();
            tokio::spawn(async move {
                let mut read = store
                    .read(&segment, 0, total, TEST_TIMEOUT)
                    .expect("Invalid read arguments")
                    .await
                    .expect("Failed to open read");
                read.read_to_end().await.expect("Tailing read failed")
            })
        })
        .collect();

    let tally = Tally::default();
    let start = Instant::now();
    for i in 0..config.operations {
        let payload = Bytes::from(vec![(i % 256) as u8; config.payload_size]);
        let result = store
            .append(segment, payload, vec![], TEST_TIMEOUT)
            .expect("Invalid append arguments")
            .await;
        tally.record(&result);
    }

    let mut seen = Vec::with_capacity(readers.len());
    for reader in readers {
        seen.push(reader.await.expect("Reader panicked"));
    }
    if seen.windows(2).any(|w| w[0] != w[1]) {
        tally.failed.fetch_add(1, Ordering::Relaxed);
    }
    tally.finish(start)
}
