//! Bounded-parallelism runner with per-item failure isolation.
//!
//! Three flavours share the same result type and statistics:
//!
//! - [`ConcurrentExecutor::run`]: async processors, semaphore-bounded,
//!   results in completion order;
//! - [`ConcurrentExecutor::run_blocking`]: blocking processors on a scoped
//!   worker pool feeding a results channel;
//! - [`ConcurrentExecutor::run_chunked`]: processors that handle a slice of
//!   items per call.
//!
//! Every item yields exactly one [`ProcessingResult`]; errors and panics are
//! captured, never propagated.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::Semaphore;

use vaultsync_core::{ItemId, ItemSummary};

use crate::rate_limit::RateLimiter;

/// Progress callback: `(completed, total)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

/// Anything the executor can attribute a result to.
pub trait WorkItem {
    fn item_id(&self) -> ItemId;
}

impl WorkItem for ItemSummary {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

impl WorkItem for ItemId {
    fn item_id(&self) -> ItemId {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// Results and statistics
// ---------------------------------------------------------------------------

/// Outcome of processing one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult<T> {
    pub item_id: ItemId,
    pub outcome: Result<T, String>,
    pub duration: Duration,
}

impl<T> ProcessingResult<T> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

/// Totals accumulated across calls until [`ConcurrentExecutor::reset_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutorStats {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Wall-clock time spent inside run calls.
    pub total_time: Duration,
}

impl ExecutorStats {
    /// Fraction of processed items that succeeded, 0.0 when none ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_processed as f64
        }
    }

    /// Mean wall-clock time per item.
    pub fn average_time(&self) -> Duration {
        match u32::try_from(self.total_processed) {
            Ok(n) if n > 0 => self.total_time / n,
            _ => Duration::ZERO,
        }
    }

    /// Items per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.total_processed as f64 / secs
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct ConcurrentExecutor {
    limiter: Arc<RateLimiter>,
    max_concurrency: usize,
    stats: Mutex<ExecutorStats>,
}

impl ConcurrentExecutor {
    pub fn new(limiter: Arc<RateLimiter>, max_concurrency: usize) -> Self {
        Self {
            limiter,
            max_concurrency: max_concurrency.max(1),
            stats: Mutex::new(ExecutorStats::default()),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn stats(&self) -> ExecutorStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = ExecutorStats::default();
    }

    /// Process `items` with at most `max_concurrency` in flight. Each item
    /// takes a rate-limiter token before `processor` runs.
    pub async fn run<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        processor: F,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Vec<ProcessingResult<T>>
    where
        I: WorkItem,
        E: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let total = items.len();
        let semaphore = Semaphore::new(self.max_concurrency);
        let semaphore = &semaphore;
        let processor = &processor;
        let limiter = &self.limiter;

        let mut in_flight: FuturesUnordered<_> = items
            .into_iter()
            .map(|item| async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = semaphore.acquire().await.ok();
                limiter.acquire().await;
                let item_id = item.item_id();
                let item_started = Instant::now();
                let outcome = match AssertUnwindSafe(processor(item)).catch_unwind().await {
                    Ok(Ok(v)) => Ok(v),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(panic) => Err(panic_message(panic)),
                };
                ProcessingResult {
                    item_id,
                    outcome,
                    duration: item_started.elapsed(),
                }
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        while let Some(result) = in_flight.next().await {
            log_outcome(&result);
            results.push(result);
            if let Some(cb) = on_progress {
                cb(results.len(), total);
            }
        }
        self.record(&results, started.elapsed());
        results
    }

    /// Blocking variant: `max_concurrency` scoped worker threads pull items
    /// from a shared queue and send results back over a channel.
    pub fn run_blocking<I, T, E, F>(
        &self,
        items: Vec<I>,
        processor: F,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Vec<ProcessingResult<T>>
    where
        I: WorkItem + Send,
        T: Send,
        E: fmt::Display,
        F: Fn(I) -> Result<T, E> + Sync,
    {
        let started = Instant::now();
        let total = items.len();
        let workers = self.max_concurrency.min(total.max(1));
        let queue = Mutex::new(items.into_iter());
        let (tx, rx) = mpsc::channel();
        let mut results = Vec::with_capacity(total);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let processor = &processor;
                let limiter = &self.limiter;
                scope.spawn(move || loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    let Some(item) = next else { break };
                    limiter.acquire_blocking();
                    let item_id = item.item_id();
                    let item_started = Instant::now();
                    let outcome = match catch_unwind(AssertUnwindSafe(|| processor(item))) {
                        Ok(Ok(v)) => Ok(v),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(panic) => Err(panic_message(panic)),
                    };
                    let result = ProcessingResult {
                        item_id,
                        outcome,
                        duration: item_started.elapsed(),
                    };
                    if tx.send(result).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for result in rx {
                log_outcome(&result);
                results.push(result);
                if let Some(cb) = on_progress {
                    cb(results.len(), total);
                }
            }
        });

        self.record(&results, started.elapsed());
        results
    }

    /// Chunked variant: `processor` gets `chunk_size` items at a time and
    /// returns one value per item, in order. A failed call fails every item
    /// of its chunk; missing trailing values fail the items they belong to.
    /// Each chunk takes one rate-limiter token; chunks run sequentially.
    pub fn run_chunked<I, T, E, F>(
        &self,
        items: Vec<I>,
        chunk_size: usize,
        mut processor: F,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Vec<ProcessingResult<T>>
    where
        I: WorkItem,
        E: fmt::Display,
        F: FnMut(&[I]) -> Result<Vec<T>, E>,
    {
        let started = Instant::now();
        let total = items.len();
        let mut results = Vec::with_capacity(total);

        for chunk in items.chunks(chunk_size.max(1)) {
            self.limiter.acquire_blocking();
            let chunk_started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| processor(chunk)));
            let per_item = chunk_started.elapsed() / chunk.len().max(1) as u32;

            match outcome {
                Ok(Ok(values)) => {
                    let mut values = values.into_iter();
                    for item in chunk {
                        let outcome = values
                            .next()
                            .ok_or_else(|| "no result returned for item".to_string());
                        results.push(ProcessingResult {
                            item_id: item.item_id(),
                            outcome,
                            duration: per_item,
                        });
                    }
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    tracing::warn!(size = chunk.len(), error = %message, "batch failed");
                    push_failed(&mut results, chunk, &message, per_item);
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    tracing::warn!(size = chunk.len(), error = %message, "batch panicked");
                    push_failed(&mut results, chunk, &message, per_item);
                }
            }
            if let Some(cb) = on_progress {
                cb(results.len(), total);
            }
        }

        self.record(&results, started.elapsed());
        results
    }

    fn record<T>(&self, results: &[ProcessingResult<T>], elapsed: Duration) {
        let successful = results.iter().filter(|r| r.success()).count();
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total_processed += results.len();
        stats.successful += successful;
        stats.failed += results.len() - successful;
        stats.total_time += elapsed;
    }
}

fn push_failed<I: WorkItem, T>(
    results: &mut Vec<ProcessingResult<T>>,
    chunk: &[I],
    message: &str,
    duration: Duration,
) {
    for item in chunk {
        results.push(ProcessingResult {
            item_id: item.item_id(),
            outcome: Err(message.to_string()),
            duration,
        });
    }
}

fn log_outcome<T>(result: &ProcessingResult<T>) {
    match &result.outcome {
        Ok(_) => tracing::debug!(
            item = %result.item_id,
            duration_ms = result.duration.as_millis() as u64,
            "item processed"
        ),
        Err(e) => tracing::warn!(item = %result.item_id, error = %e, "item failed"),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("processor panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(n: usize) -> Vec<ItemId> {
        (1..=n).map(|i| ItemId::from(format!("item-{i}"))).collect()
    }

    fn executor(max: usize) -> ConcurrentExecutor {
        ConcurrentExecutor::new(Arc::new(RateLimiter::new(1000.0, 1000)), max)
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn failures_and_panics_are_isolated() {
        let exec = executor(3);
        let results = exec
            .run(
                ids(5),
                |id: ItemId| async move {
                    match id.0.as_str() {
                        "item-2" => Err("bad payload".to_string()),
                        "item-4" => panic!("boom"),
                        _ => Ok(id.0.len()),
                    }
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.success()).count(), 3);
        let failed: Vec<_> = results.iter().filter_map(|r| r.error()).collect();
        assert!(failed.contains(&"bad payload"));
        assert!(failed.contains(&"processor panicked: boom"));

        let stats = exec.stats();
        assert_eq!(stats.total_processed, 5);
        assert_eq!(stats.failed, 2);
        assert!((stats.success_rate() - 0.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn concurrency_never_exceeds_limit() {
        let exec = executor(2);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (active_ref, peak_ref) = (&active, &peak);
        exec.run(
            ids(8),
            |_id| async move {
                let (active, peak) = (active_ref, peak_ref);
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            None,
        )
        .await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn progress_fires_once_per_completion_in_completion_order() {
        let exec = executor(4);
        let seen = Mutex::new(Vec::new());
        let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
        let results = exec
            .run(
                ids(3),
                |id: ItemId| async move {
                    // item-1 finishes last.
                    let delay = if id.0 == "item-1" { 100 } else { 10 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, String>(id)
                },
                Some(&progress),
            )
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(results[2].item_id, ItemId::from("item-1"));
    }

    #[test]
    fn blocking_pool_processes_everything() {
        let exec = executor(3);
        let results = exec.run_blocking(
            ids(10),
            |id: ItemId| {
                if id.0 == "item-7" {
                    Err("seven")
                } else {
                    Ok(id.0.to_uppercase())
                }
            },
            None,
        );
        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().filter(|r| !r.success()).count(), 1);
        assert_eq!(exec.stats().successful, 9);
    }

    #[test]
    fn chunked_failure_marks_whole_chunk() {
        let exec = executor(1);
        let results = exec.run_chunked(
            ids(5),
            2,
            |chunk: &[ItemId]| {
                if chunk.iter().any(|id| id.0 == "item-3") {
                    Err("chunk rejected")
                } else {
                    Ok(chunk.iter().map(|id| id.0.clone()).collect())
                }
            },
            None,
        );
        let failed: Vec<_> = results
            .iter()
            .filter(|r| !r.success())
            .map(|r| r.item_id.0.as_str())
            .collect();
        assert_eq!(failed, vec!["item-3", "item-4"]);
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn chunked_short_result_fails_missing_items() {
        let exec = executor(1);
        let results = exec.run_chunked(
            ids(3),
            3,
            |chunk: &[ItemId]| Ok::<_, String>(vec![chunk[0].0.clone()]),
            None,
        );
        assert!(results[0].success());
        assert_eq!(results[1].error(), Some("no result returned for item"));
        assert_eq!(results[2].error(), Some("no result returned for item"));
    }

    #[test]
    fn reset_clears_stats() {
        let exec = executor(1);
        exec.run_blocking(ids(2), |_id: ItemId| Ok::<_, String>(()), None);
        assert_eq!(exec.stats().total_processed, 2);
        exec.reset_stats();
        assert_eq!(exec.stats(), ExecutorStats::default());
    }
}
