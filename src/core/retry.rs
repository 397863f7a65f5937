use crate::config::HarvestConfig;
use crate::error::{AppError, AppResult, FailureClass};
use crate::logging::{log, LogLevel};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

/// Exponential backoff shared by both phases: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(cfg: &HarvestConfig) -> Self {
        Self::new(cfg.max_retries, cfg.retry_delay, cfg.max_retry_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails non-retryably, or attempts run out.
    /// The pacer is consulted before every attempt.
    pub async fn run<T, F, Fut>(&self, ctx: &str, pacer: &mut Pacer, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            pacer.pace().await;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match err.class() {
                FailureClass::Blocked | FailureClass::Fatal => return Err(err),
                FailureClass::Retryable => {}
            }

            if attempt + 1 >= self.max_attempts {
                log(
                    LogLevel::Error,
                    &format!(
                        "{} - Failed after {} attempt(s): {}",
                        ctx, self.max_attempts, err
                    ),
                );
                return Err(AppError::RetriesExhausted {
                    context: ctx.to_string(),
                    attempts: self.max_attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            log(
                LogLevel::Warning,
                &format!(
                    "{} - Attempt {}/{} failed: {}. Retrying in {:.1}s...",
                    ctx,
                    attempt + 1,
                    self.max_attempts,
                    err,
                    delay.as_secs_f64()
                ),
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Worker-local request spacing: consecutive requests from one worker are at
/// least `interval` apart.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Pacer {
            interval,
            last: None,
        }
    }

    pub async fn pace(&mut self) {
        if let Some(last) = self.last {
            sleep_until(last + self.interval).await;
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(0), Duration::from_secs(2));
        assert_eq!(p.delay_for(1), Duration::from_secs(4));
        assert_eq!(p.delay_for(2), Duration::from_secs(8));
        assert_eq!(p.delay_for(3), Duration::from_secs(10));
        assert_eq!(p.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let mut pacer = Pacer::new(Duration::ZERO);
        let out = policy(3)
            .run("t", &mut pacer, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::retryable("t", "HTTP 503"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let mut pacer = Pacer::new(Duration::ZERO);
        let err = policy(3)
            .run("t", &mut pacer, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AppError::Timeout("slow".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_blocked_and_fatal_are_not_retried() {
        for e in [AppError::blocked("t", 403), AppError::Fatal("bad".into())] {
            let calls = AtomicU32::new(0);
            let mut pacer = Pacer::new(Duration::ZERO);
            let expected = e.class();
            let err = policy(5)
                .run("t", &mut pacer, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let e = e.clone();
                    async move { Err::<(), _>(e) }
                })
                .await
                .unwrap_err();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(err.class(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_requests() {
        let mut pacer = Pacer::new(Duration::from_secs(1));
        let start = Instant::now();
        pacer.pace().await;
        pacer.pace().await;
        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
