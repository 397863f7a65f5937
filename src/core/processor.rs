use crate::api::client::ApiClient;
use crate::api::fetchers::{HttpEventSource, HttpVenueSource};
use crate::config::{HarvestConfig, EVENT_COLUMNS};
use crate::core::dedup::{self, ArtifactStore, VenueFetcher};
use crate::core::fetcher::{ArtifactSource, BlockMonitor, PageSource, RateLimitedFetcher};
use crate::core::ledger::{ProgressLedger, UnitState};
use crate::core::pagination::{CityHarvester, PendingCity};
use crate::core::retry::RetryPolicy;
use crate::core::scheduler::{self, PoolReport};
use crate::core::sink::AggregationSink;
use crate::core::stats::{self, RunStats, CITY_PHASE, VENUE_PHASE};
use crate::error::{AppError, AppResult};
use crate::io::RawPageCache;
use crate::logging::{log, LogLevel};
use crate::model::city;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Events,
    Venues,
    All,
}

impl RunMode {
    fn includes_events(self) -> bool {
        matches!(self, RunMode::Events | RunMode::All)
    }

    fn includes_venues(self) -> bool {
        matches!(self, RunMode::Venues | RunMode::All)
    }
}

#[derive(Debug)]
pub struct PhaseOutcome {
    pub report: PoolReport,
    /// Every unit of the phase is done. For phase one this also means the
    /// progress log was retired.
    pub all_complete: bool,
}

/// Phase one: every city is walked page by page into the aggregated CSV.
pub async fn run_events<S>(
    cfg: &HarvestConfig,
    source: Arc<S>,
    blocks: Arc<BlockMonitor>,
    cancel: CancellationToken,
) -> AppResult<PhaseOutcome>
where
    S: PageSource + ?Sized + 'static,
{
    log(LogLevel::Step, "--- Phase 1: City Harvest ---");

    let cities = city::load_cities(&cfg.input_csv, cfg.top_n)?;
    if cities.is_empty() {
        return Err(AppError::ConfigError(format!(
            "No valid cities in '{}'",
            cfg.input_csv.display()
        )));
    }
    let keys: Vec<String> = cities.iter().map(|c| c.unit_key()).collect();

    let ledger = Arc::new(ProgressLedger::open(&cfg.progress_log).await?);
    let states = ledger.load().await;

    let mut pending = Vec::new();
    let mut completed = 0usize;
    let mut resumed = 0usize;
    for city in cities {
        match states.get(&city.unit_key()) {
            Some(UnitState::Done) => completed += 1,
            Some(UnitState::Pending(page)) => {
                resumed += 1;
                pending.push(PendingCity {
                    city,
                    start_page: *page,
                });
            }
            None => pending.push(PendingCity {
                city,
                start_page: 0,
            }),
        }
    }
    log(
        LogLevel::Info,
        &format!(
            "Resuming: {} pending ({} mid-way), {} completed",
            pending.len(),
            resumed,
            completed
        ),
    );

    let sink = Arc::new(AggregationSink::open(&cfg.combined_csv, &EVENT_COLUMNS).await?);
    let cache = RawPageCache::new(cfg.raw_cache_dir.clone(), cfg.keep_raw_pages);
    cache.prepare().await?;

    let fetcher = RateLimitedFetcher::new(RetryPolicy::from_config(cfg), blocks);
    let handler = Arc::new(CityHarvester::new(
        source,
        ledger.clone(),
        sink.clone(),
        cache,
        fetcher,
        cfg.max_pages,
        cancel.clone(),
    ));

    let report = scheduler::run_pool(
        CITY_PHASE,
        handler,
        pending,
        cfg.concurrent_cities,
        cfg.wait,
        cancel,
    )
    .await?;
    scheduler::log_phase_completion(CITY_PHASE, &report);

    let all_complete = ledger
        .retire_if_complete(keys.iter().map(String::as_str))
        .await?;
    if all_complete {
        log(
            LogLevel::Success,
            &format!(
                "All {} cities completed; {} rows in {}",
                keys.len(),
                sink.rows_appended(),
                sink.path().display()
            ),
        );
    }

    Ok(PhaseOutcome {
        report,
        all_complete,
    })
}

/// Phase two: one venue document per unique event in the aggregated CSV.
pub async fn run_venues<S>(
    cfg: &HarvestConfig,
    source: Arc<S>,
    blocks: Arc<BlockMonitor>,
    cancel: CancellationToken,
) -> AppResult<PhaseOutcome>
where
    S: ArtifactSource + ?Sized + 'static,
{
    log(LogLevel::Step, "--- Phase 2: Venue Fetch ---");

    let scan = dedup::scan_output(&cfg.combined_csv).await?;
    let store = ArtifactStore::new(cfg.venue_dir.clone());
    store.prepare().await?;

    let (pending, present) = dedup::plan_fetches(scan.keys, &store).await;
    log(
        LogLevel::Info,
        &format!(
            "{} venue(s) to fetch, {} already saved in {}",
            pending.len(),
            present,
            store.dir().display()
        ),
    );

    let fetcher = RateLimitedFetcher::new(RetryPolicy::from_config(cfg), blocks);
    let handler = Arc::new(VenueFetcher::new(source, store, fetcher, cancel.clone()));

    let mut report = scheduler::run_pool(
        VENUE_PHASE,
        handler,
        pending,
        cfg.concurrent_venues,
        cfg.wait,
        cancel,
    )
    .await?;
    report.stats.skip_or_empty += present;
    report.stats.total_tasks += present;
    scheduler::log_phase_completion(VENUE_PHASE, &report);

    let s = &report.stats;
    let all_complete = s.ok + s.skip_or_empty == s.total_tasks;
    Ok(PhaseOutcome {
        report,
        all_complete,
    })
}

pub async fn run(cfg: Arc<HarvestConfig>, mode: RunMode, cancel: CancellationToken) -> AppResult<i32> {
    let overall_start_time = Instant::now();
    let start_ts_str = Utc::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
    log(
        LogLevel::Step,
        &format!("Starting {:?} harvest at {}", mode, start_ts_str),
    );
    log(
        LogLevel::Info,
        &format!(
            "Workers: {} cities / {} venues, wait {:?}, {} attempt(s) per request, cap {} pages",
            cfg.concurrent_cities,
            cfg.concurrent_venues,
            cfg.wait,
            cfg.max_retries,
            cfg.max_pages
        ),
    );

    let client = ApiClient::new(&cfg)?;
    let blocks = Arc::new(BlockMonitor::new());
    let mut run_stats = RunStats::new();

    if mode.includes_events() {
        let source = Arc::new(HttpEventSource::new(client.clone()));
        let outcome = run_events(&cfg, source, blocks.clone(), cancel.clone()).await?;
        run_stats.insert(CITY_PHASE.to_string(), outcome.report.stats);
    }

    if mode.includes_venues() {
        if cancel.is_cancelled() {
            log(LogLevel::Warning, "Skipping venue phase: run was interrupted.");
        } else if blocks.was_blocked() {
            log(
                LogLevel::Warning,
                "Skipping venue phase: upstream is blocking this IP.",
            );
        } else {
            let source = Arc::new(HttpVenueSource::new(client));
            let outcome = run_venues(&cfg, source, blocks.clone(), cancel.clone()).await?;
            run_stats.insert(VENUE_PHASE.to_string(), outcome.report.stats);
        }
    }

    stats::print_summary(&run_stats, overall_start_time.elapsed());
    Ok(stats::determine_exit_code(&run_stats))
}
