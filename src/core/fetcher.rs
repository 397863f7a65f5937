use crate::core::retry::{Pacer, RetryPolicy};
use crate::error::AppResult;
use crate::logging::{log, LogLevel};
use crate::model::city::City;
use crate::model::event::{DedupKey, EventRow};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One page of a city's listing. Zero records means the city is exhausted.
#[derive(Debug, Clone, Default)]
pub struct PageResult<R> {
    pub records: Vec<R>,
    pub has_more: bool,
    /// Undecoded response body, kept for the raw page cache.
    pub raw: Option<Bytes>,
}

impl<R> PageResult<R> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A single attempt at fetching one page. Retries and pacing are applied by
/// [`RateLimitedFetcher`], not by implementors.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, city: &City, page: u32) -> AppResult<PageResult<EventRow>>;
}

/// A single attempt at fetching the venue document for one event.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch_artifact(&self, key: &DedupKey) -> AppResult<Value>;
}

pub const BLOCKED_NOTICE: &str = "403 Forbidden: upstream blocked this IP. \
Toggle airplane mode or switch network, then rerun; blocked units resume where they stopped.";

/// Counts blocked responses and prints the operator notice once per run.
#[derive(Debug, Default)]
pub struct BlockMonitor {
    notified: AtomicBool,
    count: AtomicUsize,
}

impl BlockMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, ctx: &str) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if !self.notified.swap(true, Ordering::SeqCst) {
            log(LogLevel::Error, BLOCKED_NOTICE);
        }
        log(LogLevel::Warning, &format!("{} - blocked (HTTP 403)", ctx));
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn was_blocked(&self) -> bool {
        self.notified.load(Ordering::SeqCst)
    }
}

/// Wraps a source with the shared retry policy and the worker's pacer.
#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    policy: RetryPolicy,
    blocks: Arc<BlockMonitor>,
}

impl RateLimitedFetcher {
    pub fn new(policy: RetryPolicy, blocks: Arc<BlockMonitor>) -> Self {
        RateLimitedFetcher { policy, blocks }
    }

    pub async fn fetch_page<S>(
        &self,
        source: &S,
        city: &City,
        page: u32,
        pacer: &mut Pacer,
    ) -> AppResult<PageResult<EventRow>>
    where
        S: PageSource + ?Sized,
    {
        let ctx = format!("{} p{}", city.label(), page);
        let result = self
            .policy
            .run(&ctx, pacer, || source.fetch_page(city, page))
            .await;
        self.observe(&ctx, result)
    }

    pub async fn fetch_artifact<S>(
        &self,
        source: &S,
        key: &DedupKey,
        pacer: &mut Pacer,
    ) -> AppResult<Value>
    where
        S: ArtifactSource + ?Sized,
    {
        let ctx = format!("Venue {}", key);
        let result = self
            .policy
            .run(&ctx, pacer, || source.fetch_artifact(key))
            .await;
        self.observe(&ctx, result)
    }

    fn observe<T>(&self, ctx: &str, result: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &result {
            if e.is_blocked() {
                self.blocks.report(ctx);
            }
        }
        result
    }
}

/// A document that carries nothing worth persisting.
pub fn is_empty_document(doc: &Value) -> bool {
    match doc {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
