use crate::core::fetcher::{PageSource, RateLimitedFetcher};
use crate::core::ledger::ProgressLedger;
use crate::core::scheduler::{SuspendReason, UnitHandler, UnitOutcome, Worker};
use crate::core::sink::AggregationSink;
use crate::io::RawPageCache;
use crate::logging::{log, LogLevel};
use crate::model::city::City;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cursor of one city. `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Active(u32),
    Complete { capped: bool },
}

impl CursorState {
    pub fn start(page: u32, max_pages: u32) -> Self {
        if page >= max_pages {
            CursorState::Complete { capped: true }
        } else {
            CursorState::Active(page)
        }
    }

    /// Transition after a page with `record_count` records was stored.
    pub fn after_page(self, record_count: usize, max_pages: u32) -> Self {
        match self {
            CursorState::Active(_) if record_count == 0 => CursorState::Complete { capped: false },
            CursorState::Active(n) if n + 1 >= max_pages => CursorState::Complete { capped: true },
            CursorState::Active(n) => CursorState::Active(n + 1),
            done => done,
        }
    }
}

/// A city together with the page its ledger entry says to resume from.
#[derive(Debug, Clone)]
pub struct PendingCity {
    pub city: City,
    pub start_page: u32,
}

pub struct CityHarvester<S: ?Sized> {
    source: Arc<S>,
    ledger: Arc<ProgressLedger>,
    sink: Arc<AggregationSink>,
    cache: RawPageCache,
    fetcher: RateLimitedFetcher,
    max_pages: u32,
    cancel: CancellationToken,
}

impl<S: PageSource + ?Sized> CityHarvester<S> {
    pub fn new(
        source: Arc<S>,
        ledger: Arc<ProgressLedger>,
        sink: Arc<AggregationSink>,
        cache: RawPageCache,
        fetcher: RateLimitedFetcher,
        max_pages: u32,
        cancel: CancellationToken,
    ) -> Self {
        CityHarvester {
            source,
            ledger,
            sink,
            cache,
            fetcher,
            max_pages,
            cancel,
        }
    }

    /// Walks one city from its resume page until an empty page or the page cap.
    /// The ledger only moves forward after the page's rows are in the sink.
    pub async fn drive(&self, unit: PendingCity, worker: &mut Worker) -> UnitOutcome {
        let key = unit.city.unit_key();
        let label = unit.city.label();
        let mut cursor = CursorState::start(unit.start_page, self.max_pages);
        let mut pages = 0u32;
        let mut records = 0usize;

        loop {
            let page = match cursor {
                CursorState::Active(page) => page,
                CursorState::Complete { capped } => {
                    if capped {
                        log(
                            LogLevel::Warning,
                            &format!(
                                "{}: stopped at the {}-page cap ({} events this run)",
                                label, self.max_pages, records
                            ),
                        );
                    }
                    if let Err(e) = self.ledger.complete(&key).await {
                        log(
                            LogLevel::Error,
                            &format!("{}: could not record completion: {}", label, e),
                        );
                        return UnitOutcome::Failed {
                            page: unit.start_page + pages,
                            error: e,
                        };
                    }
                    return UnitOutcome::Completed {
                        pages,
                        records,
                        capped,
                    };
                }
            };

            if self.cancel.is_cancelled() {
                log(
                    LogLevel::Info,
                    &format!("{}: interrupted before page {}", label, page),
                );
                return UnitOutcome::Suspended {
                    page,
                    reason: SuspendReason::Cancelled,
                };
            }

            let result = match self
                .fetcher
                .fetch_page(&*self.source, &unit.city, page, &mut worker.pacer)
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_blocked() => {
                    log(
                        LogLevel::Warning,
                        &format!("{}: blocked at page {}; left pending", label, page),
                    );
                    return UnitOutcome::Suspended {
                        page,
                        reason: SuspendReason::Blocked,
                    };
                }
                Err(e) => {
                    log(
                        LogLevel::Error,
                        &format!("{}: giving up at page {}: {}", label, page, e),
                    );
                    return UnitOutcome::Failed { page, error: e };
                }
            };

            if let Some(raw) = result.raw.as_ref() {
                if let Err(e) = self.cache.store(&key, page, raw).await {
                    log(
                        LogLevel::Warning,
                        &format!("{}: raw page {} not cached: {}", label, page, e),
                    );
                }
            }

            let count = result.records.len();
            if count == 0 {
                let removed = self.cache.purge_unit(&key, page).await;
                log(
                    LogLevel::Success,
                    &format!(
                        "{}: no more events at page {} ({} events this run, {} cached page(s) removed)",
                        label, page, records, removed
                    ),
                );
                cursor = cursor.after_page(0, self.max_pages);
                continue;
            }

            if let Err(e) = self.sink.append(&key, page, &result.records).await {
                log(
                    LogLevel::Error,
                    &format!("{}: page {} not written: {}", label, page, e),
                );
                return UnitOutcome::Failed { page, error: e };
            }
            if let Err(e) = self.ledger.advance(&key, page + 1).await {
                log(
                    LogLevel::Error,
                    &format!("{}: progress after page {} not recorded: {}", label, page, e),
                );
                return UnitOutcome::Failed { page, error: e };
            }

            pages += 1;
            records += count;
            if !result.has_more {
                log(
                    LogLevel::Debug,
                    &format!(
                        "{}: page {} reports no more data; confirming with page {}",
                        label,
                        page,
                        page + 1
                    ),
                );
            }
            cursor = cursor.after_page(count, self.max_pages);
        }
    }
}

#[async_trait]
impl<S: PageSource + ?Sized + 'static> UnitHandler for CityHarvester<S> {
    type Unit = PendingCity;

    fn unit_key(&self, unit: &PendingCity) -> String {
        unit.city.unit_key()
    }

    async fn process(&self, unit: PendingCity, worker: &mut Worker) -> UnitOutcome {
        self.drive(unit, worker).await
    }
}
