//! Bounded worker pool shared by both phases.
//!
//! Workers pull units from one queue, so a unit is owned by exactly one worker
//! and its pages run strictly in sequence. Cancellation stops dispatch; a
//! worker already inside a unit decides for itself where to stop.

use crate::core::retry::Pacer;
use crate::core::stats::CategoryStats;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::utils;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Completed {
        pages: u32,
        records: usize,
        capped: bool,
    },
    /// Nothing to do (already complete on storage).
    Skipped,
    /// Left pending at `page`; a later run resumes there.
    Suspended { page: u32, reason: SuspendReason },
    /// Gave up at `page` after the retry budget or a fatal error.
    Failed { page: u32, error: AppError },
}

/// Per-worker state that outlives a single unit.
#[derive(Debug)]
pub struct Worker {
    pub id: usize,
    pub pacer: Pacer,
}

#[async_trait]
pub trait UnitHandler: Send + Sync + 'static {
    type Unit: Send + 'static;

    fn unit_key(&self, unit: &Self::Unit) -> String;

    async fn process(&self, unit: Self::Unit, worker: &mut Worker) -> UnitOutcome;
}

#[derive(Debug)]
pub struct PoolReport {
    pub outcomes: Vec<(String, UnitOutcome)>,
    pub undispatched: usize,
    pub cancelled: bool,
    pub stats: CategoryStats,
    pub elapsed: Duration,
}

impl PoolReport {
    pub fn outcome_of(&self, unit_key: &str) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| k == unit_key)
            .map(|(_, o)| o)
    }
}

pub async fn run_pool<H>(
    phase: &str,
    handler: Arc<H>,
    units: Vec<H::Unit>,
    concurrency: usize,
    pacing: Duration,
    cancel: CancellationToken,
) -> AppResult<PoolReport>
where
    H: UnitHandler,
{
    if concurrency == 0 {
        return Err(AppError::ConfigError(format!(
            "{}: worker pool needs at least one worker",
            phase
        )));
    }

    let start = Instant::now();
    let total = units.len();
    let mut stats = CategoryStats::default();
    stats.set_total(total);

    if total == 0 {
        return Ok(PoolReport {
            outcomes: Vec::new(),
            undispatched: 0,
            cancelled: cancel.is_cancelled(),
            stats,
            elapsed: start.elapsed(),
        });
    }

    let worker_count = concurrency.min(total);
    log(
        LogLevel::Info,
        &format!(
            "{}: {} unit(s) across {} worker(s)",
            phase, total, worker_count
        ),
    );

    let queue = Arc::new(Mutex::new(VecDeque::from(units)));
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, UnitOutcome)>();
    let mut workers = JoinSet::new();

    for id in 0..worker_count {
        let queue = queue.clone();
        let handler = handler.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            let mut worker = Worker {
                id,
                pacer: Pacer::new(pacing),
            };
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = queue.lock().await.pop_front();
                let Some(unit) = next else {
                    break;
                };
                let key = handler.unit_key(&unit);
                let outcome = handler.process(unit, &mut worker).await;
                let stop = matches!(
                    outcome,
                    UnitOutcome::Suspended {
                        reason: SuspendReason::Cancelled,
                        ..
                    }
                );
                if tx.send((key, outcome)).is_err() || stop {
                    break;
                }
            }
        });
    }
    drop(tx);

    let log_interval = std::cmp::max(10, (total / 20).max(1));
    let mut outcomes = Vec::with_capacity(total);
    while let Some((key, outcome)) = rx.recv().await {
        stats.record(&outcome);
        outcomes.push((key, outcome));
        let processed = outcomes.len();
        if processed % log_interval == 0 || processed == total {
            log_progress(phase, &stats, processed, start.elapsed());
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            log(
                LogLevel::Error,
                &format!("{}: worker task panicked: {}", phase, e),
            );
        }
    }

    let undispatched = queue.lock().await.len();
    let cancelled = cancel.is_cancelled();
    if cancelled {
        log(
            LogLevel::Warning,
            &format!(
                "{}: interrupted; {} unit(s) not started, {} stopped mid-way. Progress is saved and the next run resumes.",
                phase, undispatched, stats.interrupted
            ),
        );
    }

    Ok(PoolReport {
        outcomes,
        undispatched,
        cancelled,
        stats,
        elapsed: start.elapsed(),
    })
}

fn log_progress(phase: &str, stats: &CategoryStats, current_processed: usize, elapsed: Duration) {
    if stats.total_tasks == 0 {
        return;
    }
    let percentage = (current_processed as f32 / stats.total_tasks.max(1) as f32) * 100.0;
    let eta = utils::eta(current_processed, stats.total_tasks, elapsed)
        .map(utils::format_mins_secs)
        .unwrap_or_else(|| "-".to_string());
    log(
        LogLevel::Info,
        &format!(
            "{} progress: {}/{} ({:.1}%) [OK: {}, Skip: {}, Fail: {}, Blocked: {}] {} records, {:.2} units/s, ETA {}",
            phase,
            current_processed,
            stats.total_tasks,
            percentage,
            stats.ok,
            stats.skip_or_empty,
            stats.fail,
            stats.blocked,
            stats.records,
            utils::per_second(current_processed, elapsed),
            eta
        ),
    );
}

pub fn log_phase_completion(phase: &str, report: &PoolReport) {
    let stats = &report.stats;
    let level = if stats.fail > 0 || stats.blocked > 0 {
        LogLevel::Warning
    } else {
        LogLevel::Success
    };
    log(
        level,
        &format!(
            "--- {} Phase complete ({} OK, {} Skip, {} Fail, {} Blocked, {} Capped / {} Total) | Elapsed: {:?} ---",
            phase,
            stats.ok,
            stats.skip_or_empty,
            stats.fail,
            stats.blocked,
            stats.capped,
            stats.total_tasks,
            report.elapsed
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        in_flight: std::sync::Mutex<HashSet<u32>>,
        peak: AtomicUsize,
        overlaps: AtomicUsize,
    }

    #[async_trait]
    impl UnitHandler for Recorder {
        type Unit = u32;

        fn unit_key(&self, unit: &u32) -> String {
            unit.to_string()
        }

        async fn process(&self, unit: u32, _worker: &mut Worker) -> UnitOutcome {
            let now = {
                let mut set = self.in_flight.lock().unwrap();
                if !set.insert(unit) {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                set.len()
            };
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.lock().unwrap().remove(&unit);
            if unit % 5 == 0 {
                UnitOutcome::Failed {
                    page: 0,
                    error: AppError::Fatal("bad".into()),
                }
            } else {
                UnitOutcome::Completed {
                    pages: 1,
                    records: 2,
                    capped: false,
                }
            }
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            in_flight: std::sync::Mutex::new(HashSet::new()),
            peak: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_and_runs_every_unit() {
        let handler = recorder();
        let report = run_pool(
            "Test",
            handler.clone(),
            (1..=20).collect(),
            3,
            Duration::ZERO,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes.len(), 20);
        assert_eq!(report.undispatched, 0);
        assert!(!report.cancelled);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(handler.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(report.stats.fail, 4);
        assert_eq!(report.stats.ok, 16);
        assert_eq!(report.stats.records, 32);
        assert!(matches!(
            report.outcome_of("5"),
            Some(UnitOutcome::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_pool_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_pool("Test", recorder(), vec![1, 2, 3], 2, Duration::ZERO, cancel)
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(report.undispatched, 3);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_zero_workers_is_config_error() {
        let err = run_pool(
            "Test",
            recorder(),
            vec![1],
            0,
            Duration::ZERO,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
