//! Phase two: unique venue lookups derived from the aggregated events file.
//! An artifact on disk is the completion marker, so there is no ledger here.

use crate::config::VENUE_FILE_SUFFIX;
use crate::core::fetcher::{is_empty_document, ArtifactSource, RateLimitedFetcher};
use crate::core::scheduler::{SuspendReason, UnitHandler, UnitOutcome, Worker};
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::common::parse_numeric_id;
use crate::model::event::DedupKey;
use crate::utils;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const EVENT_ID_COLUMN: &str = "eventId";
const CATEGORY_ID_COLUMN: &str = "categoryId";
const EXISTENCE_CHECK_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScan {
    /// Unique keys in first-seen order.
    pub keys: Vec<DedupKey>,
    pub rows: usize,
    pub invalid_rows: usize,
    /// Rows whose category differs from the one already kept for the event.
    pub conflicts: usize,
}

/// One key per event id. The first category seen for an event wins.
pub fn derive_keys<R: std::io::Read>(reader: R) -> AppResult<KeyScan> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers.iter().position(|h| h == name).ok_or_else(|| {
            AppError::ConfigError(format!("Aggregated output has no '{}' column", name))
        })
    };
    let event_col = column(EVENT_ID_COLUMN)?;
    let category_col = column(CATEGORY_ID_COLUMN)?;

    let mut scan = KeyScan::default();
    let mut kept: HashMap<i64, i64> = HashMap::new();

    for (idx, record) in rdr.records().enumerate() {
        let row_num = idx + 2;
        scan.rows += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                scan.invalid_rows += 1;
                log(
                    LogLevel::Debug,
                    &format!("Unreadable events row {}: {}", row_num, e),
                );
                continue;
            }
        };

        let event_id = parse_numeric_id(record.get(event_col));
        let category_id = parse_numeric_id(record.get(category_col));
        let (event_id, category_id) = match (event_id, category_id) {
            (Some(e), Some(c)) => (e, c),
            _ => {
                scan.invalid_rows += 1;
                log(
                    LogLevel::Debug,
                    &format!(
                        "Invalid event data at row {}: eventId={:?}, categoryId={:?}",
                        row_num,
                        record.get(event_col),
                        record.get(category_col)
                    ),
                );
                continue;
            }
        };

        match kept.get(&event_id) {
            None => {
                kept.insert(event_id, category_id);
                scan.keys.push(DedupKey {
                    event_id,
                    category_id,
                });
            }
            Some(&first) if first != category_id => {
                scan.conflicts += 1;
                log(
                    LogLevel::Warning,
                    &format!(
                        "Event {} appears with category {} at row {}; keeping first-seen category {}",
                        event_id, category_id, row_num, first
                    ),
                );
            }
            Some(_) => {}
        }
    }

    if scan.invalid_rows > 0 {
        log(
            LogLevel::Warning,
            &format!(
                "Skipped {} of {} row(s) without a numeric eventId/categoryId",
                scan.invalid_rows, scan.rows
            ),
        );
    }
    Ok(scan)
}

pub async fn scan_output(path: &Path) -> AppResult<KeyScan> {
    let path_buf = path.to_path_buf();
    let scan = utils::run_blocking(move || {
        let file = std::fs::File::open(&path_buf).map_err(|e| {
            AppError::ConfigError(format!(
                "Aggregated output '{}' cannot be opened (run the events phase first): {}",
                path_buf.display(),
                e
            ))
        })?;
        derive_keys(file)
    })
    .await?;
    log(
        LogLevel::Info,
        &format!(
            "Found {} unique eventId/categoryId pairs in {} row(s) of {}",
            scan.keys.len(),
            scan.rows,
            path.display()
        ),
    );
    Ok(scan)
}

/// Directory of `{eventId}_venue.json` documents.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf) -> Self {
        ArtifactStore { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn prepare(&self) -> AppResult<()> {
        io::ensure_dir(&self.dir).await
    }

    pub fn path_for(&self, key: &DedupKey) -> PathBuf {
        self.dir
            .join(format!("{}{}", key.event_id, VENUE_FILE_SUFFIX))
    }

    pub async fn exists(&self, key: &DedupKey) -> bool {
        io::path_exists(&self.path_for(key)).await
    }

    pub async fn write(&self, key: &DedupKey, doc: Value) -> AppResult<()> {
        if is_empty_document(&doc) {
            return Err(AppError::Fatal(format!(
                "Venue {}: empty document, not saved",
                key
            )));
        }
        io::save_json(self.path_for(key), doc, format!("Venue {}", key)).await
    }
}

/// Splits keys into those still needing a fetch and the count already on disk.
pub async fn plan_fetches(keys: Vec<DedupKey>, store: &ArtifactStore) -> (Vec<DedupKey>, usize) {
    let checked: Vec<(DedupKey, bool)> = stream::iter(keys)
        .map(|key| async move { (key, store.exists(&key).await) })
        .buffered(EXISTENCE_CHECK_CONCURRENCY)
        .collect()
        .await;

    let total = checked.len();
    let pending: Vec<DedupKey> = checked
        .into_iter()
        .filter(|(_, exists)| !exists)
        .map(|(key, _)| key)
        .collect();
    let present = total - pending.len();
    (pending, present)
}

pub struct VenueFetcher<S: ?Sized> {
    source: Arc<S>,
    store: ArtifactStore,
    fetcher: RateLimitedFetcher,
    cancel: CancellationToken,
}

impl<S: ArtifactSource + ?Sized> VenueFetcher<S> {
    pub fn new(
        source: Arc<S>,
        store: ArtifactStore,
        fetcher: RateLimitedFetcher,
        cancel: CancellationToken,
    ) -> Self {
        VenueFetcher {
            source,
            store,
            fetcher,
            cancel,
        }
    }

    pub async fn fetch_one(&self, key: DedupKey, worker: &mut Worker) -> UnitOutcome {
        if self.cancel.is_cancelled() {
            return UnitOutcome::Suspended {
                page: 0,
                reason: SuspendReason::Cancelled,
            };
        }
        if self.store.exists(&key).await {
            return UnitOutcome::Skipped;
        }

        let doc = match self
            .fetcher
            .fetch_artifact(&*self.source, &key, &mut worker.pacer)
            .await
        {
            Ok(doc) => doc,
            Err(e) if e.is_blocked() => {
                return UnitOutcome::Suspended {
                    page: 0,
                    reason: SuspendReason::Blocked,
                }
            }
            Err(e) => {
                log(
                    LogLevel::Error,
                    &format!("Venue {}: giving up: {}", key, e),
                );
                return UnitOutcome::Failed { page: 0, error: e };
            }
        };

        match self.store.write(&key, doc).await {
            Ok(()) => {
                log(
                    LogLevel::Debug,
                    &format!("Saved {}", self.store.path_for(&key).display()),
                );
                UnitOutcome::Completed {
                    pages: 1,
                    records: 1,
                    capped: false,
                }
            }
            Err(e) => {
                log(LogLevel::Warning, &format!("Venue {}: {}", key, e));
                UnitOutcome::Failed { page: 0, error: e }
            }
        }
    }
}

#[async_trait]
impl<S: ArtifactSource + ?Sized + 'static> UnitHandler for VenueFetcher<S> {
    type Unit = DedupKey;

    fn unit_key(&self, unit: &DedupKey) -> String {
        unit.to_string()
    }

    async fn process(&self, unit: DedupKey, worker: &mut Worker) -> UnitOutcome {
        self.fetch_one(unit, worker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::BlockMonitor;
    use crate::core::retry::{Pacer, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactSource for CountingSource {
        async fn fetch_artifact(&self, _key: &DedupKey) -> AppResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"sections": []}))
        }
    }

    fn key(e: i64, c: i64) -> DedupKey {
        DedupKey {
            event_id: e,
            category_id: c,
        }
    }

    #[test]
    fn test_repeated_rows_collapse_to_one_key() {
        let csv = "city,eventId,categoryId\nA,42,7\nB,42,7\nA,42,7\nA,43,9\n";
        let scan = derive_keys(csv.as_bytes()).unwrap();
        assert_eq!(scan.keys, vec![key(42, 7), key(43, 9)]);
        assert_eq!(scan.rows, 4);
        assert_eq!(scan.conflicts, 0);
    }

    #[test]
    fn test_first_seen_category_wins() {
        let csv = "eventId,categoryId\n42,7\n42,8\n42,7\n";
        let scan = derive_keys(csv.as_bytes()).unwrap();
        assert_eq!(scan.keys, vec![key(42, 7)]);
        assert_eq!(scan.conflicts, 1);
    }

    #[test]
    fn test_non_numeric_ids_are_skipped() {
        let csv = "eventId,categoryId\nabc,7\n42,\n,\n-3,4\n44,5\n";
        let scan = derive_keys(csv.as_bytes()).unwrap();
        assert_eq!(scan.keys, vec![key(44, 5)]);
        assert_eq!(scan.invalid_rows, 4);
    }

    #[test]
    fn test_missing_column_is_config_error() {
        let err = derive_keys("eventId,name\n1,x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_store_round_trip_and_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("venues"));
        store.prepare().await.unwrap();

        store
            .write(&key(42, 7), serde_json::json!({"sections": [1, 2]}))
            .await
            .unwrap();
        assert!(store.path_for(&key(42, 7)).ends_with("42_venue.json"));

        let err = store.write(&key(43, 7), Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::Fatal(_)));
        assert!(!store.exists(&key(43, 7)).await);

        let (pending, present) = plan_fetches(vec![key(42, 7), key(43, 7)], &store).await;
        assert_eq!(pending, vec![key(43, 7)]);
        assert_eq!(present, 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("venues"));
        store.prepare().await.unwrap();
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::ZERO);
        let fetcher = VenueFetcher::new(
            source.clone(),
            store.clone(),
            RateLimitedFetcher::new(policy, Arc::new(BlockMonitor::new())),
            cancel.clone(),
        );
        let mut worker = Worker {
            id: 0,
            pacer: Pacer::new(Duration::ZERO),
        };

        cancel.cancel();
        let outcome = fetcher.fetch_one(key(42, 7), &mut worker).await;
        assert!(matches!(
            outcome,
            UnitOutcome::Suspended {
                reason: SuspendReason::Cancelled,
                ..
            }
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(!store.exists(&key(42, 7)).await);
    }
}
