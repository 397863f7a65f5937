use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::time::Duration;
use tokio::task;

pub async fn run_blocking<F, T>(func: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(func).await {
        Ok(Ok(res)) => Ok(res),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(AppError::from(e)),
    }
}

pub fn b64(s: &str) -> String {
    BASE64.encode(s.as_bytes())
}

pub fn per_second(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Remaining time at the observed rate, `None` until a rate exists.
pub fn eta(done: usize, total: usize, elapsed: Duration) -> Option<Duration> {
    let rate = per_second(done, elapsed);
    if rate <= 0.0 || done >= total {
        return None;
    }
    Some(Duration::from_secs_f64((total - done) as f64 / rate))
}

pub fn format_mins_secs(d: Duration) -> String {
    let total = d.as_secs();
    format!("{}m {}s", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64_coordinates() {
        assert_eq!(b64("40.7128"), "NDAuNzEyOA==");
        assert_eq!(b64("-74.006"), "LTc0LjAwNg==");
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta(0, 10, Duration::from_secs(5)), None);
        assert_eq!(eta(10, 10, Duration::from_secs(5)), None);
        assert_eq!(
            eta(5, 10, Duration::from_secs(10)),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_format_mins_secs() {
        assert_eq!(format_mins_secs(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_mins_secs(Duration::ZERO), "0m 0s");
    }
}
