//! Append-only progress log for phase one.
//!
//! Each line is `unit_key,state`, where `state` is the next page to fetch or
//! `done`. The key is everything before the last comma, so coordinate keys
//! (`lat,lng`) round-trip. Replay keeps the last entry per key.

use crate::config::LEDGER_DONE_MARKER;
use crate::error::{AppError, AppResult};
use crate::io::{self, map_io_error};
use crate::logging::{log, LogLevel};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending(u32),
    Done,
}

impl UnitState {
    pub fn start_page(&self) -> Option<u32> {
        match self {
            UnitState::Pending(p) => Some(*p),
            UnitState::Done => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Replay {
    pub states: HashMap<String, UnitState>,
    pub corrupt: Vec<AppError>,
    pub torn_tail: usize,
}

/// Rebuilds unit states from raw log bytes. Malformed lines are collected, not fatal.
pub fn replay(bytes: &[u8]) -> Replay {
    let (complete, torn) = io::split_torn_tail(bytes);
    let mut out = Replay {
        torn_tail: torn.len(),
        ..Default::default()
    };

    let text = String::from_utf8_lossy(complete);
    for (idx, raw_line) in text.split('\n').enumerate() {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some((key, state)) => {
                out.states.insert(key.to_string(), state);
            }
            None => out.corrupt.push(AppError::CorruptLedgerEntry {
                line: idx + 1,
                content: line.to_string(),
            }),
        }
    }
    out
}

fn parse_line(line: &str) -> Option<(&str, UnitState)> {
    let (key, state) = line.rsplit_once(',')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let state = state.trim();
    if state == LEDGER_DONE_MARKER {
        return Some((key, UnitState::Done));
    }
    state.parse::<u32>().ok().map(|p| (key, UnitState::Pending(p)))
}

struct Inner {
    file: Option<File>,
    states: HashMap<String, UnitState>,
}

pub struct ProgressLedger {
    path: PathBuf,
    inner: Mutex<Inner>,
    retired: AtomicBool,
}

impl ProgressLedger {
    /// Replays an existing log (if any). A torn final line from an interrupted
    /// append is dropped from the file so the next append starts clean.
    pub async fn open(path: &Path) -> AppResult<Self> {
        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(map_io_error(e, path)),
        };

        let replayed = replay(&bytes);
        for err in &replayed.corrupt {
            log(LogLevel::Warning, &format!("Ignoring ledger line: {}", err));
        }
        if replayed.torn_tail > 0 {
            log(
                LogLevel::Warning,
                &format!(
                    "Ledger '{}' ends in a partial entry ({} bytes); discarding it",
                    path.display(),
                    replayed.torn_tail
                ),
            );
            io::truncate_torn_tail(path).await?;
        }

        Ok(ProgressLedger {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                file: None,
                states: replayed.states,
            }),
            retired: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest state per unit. Units absent from the map start at page 0.
    pub async fn load(&self) -> HashMap<String, UnitState> {
        self.inner.lock().await.states.clone()
    }

    pub async fn state_of(&self, unit_key: &str) -> Option<UnitState> {
        self.inner.lock().await.states.get(unit_key).copied()
    }

    pub async fn advance(&self, unit_key: &str, next_page: u32) -> AppResult<()> {
        self.append(unit_key, UnitState::Pending(next_page)).await
    }

    pub async fn complete(&self, unit_key: &str) -> AppResult<()> {
        self.append(unit_key, UnitState::Done).await
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    async fn append(&self, unit_key: &str, state: UnitState) -> AppResult<()> {
        if unit_key.is_empty() || unit_key.contains(['\n', '\r']) {
            return Err(AppError::Fatal(format!(
                "Unit key not representable in ledger: {:?}",
                unit_key
            )));
        }
        if self.is_retired() {
            return Err(AppError::Unexpected(format!(
                "Ledger already retired; refusing entry for '{}'",
                unit_key
            )));
        }

        let mut inner = self.inner.lock().await;
        if inner.states.get(unit_key) == Some(&UnitState::Done) {
            if state != UnitState::Done {
                log(
                    LogLevel::Warning,
                    &format!(
                        "Ledger: ignoring {:?} for '{}', unit is already done",
                        state, unit_key
                    ),
                );
            }
            return Ok(());
        }

        let line = match state {
            UnitState::Pending(p) => format!("{},{}\n", unit_key, p),
            UnitState::Done => format!("{},{}\n", unit_key, LEDGER_DONE_MARKER),
        };

        if inner.file.is_none() {
            io::ensure_parent_dir(&self.path).await?;
            inner.file = Some(io::open_append(&self.path).await?);
        }
        if let Some(file) = inner.file.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| map_io_error(e, &self.path))?;
            file.flush()
                .await
                .map_err(|e| map_io_error(e, &self.path))?;
        }
        inner.states.insert(unit_key.to_string(), state);
        Ok(())
    }

    /// Deletes the log once every key in `unit_keys` is done.
    pub async fn retire_if_complete<'a, I>(&self, unit_keys: I) -> AppResult<bool>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut inner = self.inner.lock().await;
        let mut total = 0usize;
        let mut done = 0usize;
        for key in unit_keys {
            total += 1;
            if inner.states.get(key) == Some(&UnitState::Done) {
                done += 1;
            }
        }

        if done < total {
            log(
                LogLevel::Info,
                &format!(
                    "{} / {} units done - progress kept in '{}' for the next run",
                    done,
                    total,
                    self.path.display()
                ),
            );
            return Ok(false);
        }

        if let Some(file) = inner.file.take() {
            let _ = file.sync_all().await;
        }
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(map_io_error(e, &self.path)),
        }
        self.retired.store(true, Ordering::SeqCst);
        log(
            LogLevel::Info,
            &format!(
                "Removed progress log '{}' ({} units done)",
                self.path.display(),
                total
            ),
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_replay_last_entry_wins() {
        let r = replay(b"Paris,1\nParis,2\nLima,done\nParis,3\n");
        assert_eq!(r.states.get("Paris"), Some(&UnitState::Pending(3)));
        assert_eq!(r.states.get("Lima"), Some(&UnitState::Done));
        assert!(r.corrupt.is_empty());
        assert_eq!(r.torn_tail, 0);
    }

    #[test]
    fn test_replay_coordinate_keys_and_corrupt_lines() {
        let r = replay(b"40.71,-74.00,4\ngarbage\n,5\nOslo,abc\n\n40.71,-74.00,done\n");
        assert_eq!(r.states.get("40.71,-74.00"), Some(&UnitState::Done));
        assert_eq!(r.states.len(), 1);
        assert_eq!(r.corrupt.len(), 3);
        assert!(matches!(
            r.corrupt[0],
            AppError::CorruptLedgerEntry { line: 2, .. }
        ));
    }

    #[test]
    fn test_replay_ignores_torn_tail() {
        let r = replay(b"Paris,1\nParis,2");
        assert_eq!(r.states.get("Paris"), Some(&UnitState::Pending(1)));
        assert_eq!(r.torn_tail, 7);
    }

    #[tokio::test]
    async fn test_append_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        {
            let ledger = ProgressLedger::open(&path).await.unwrap();
            assert!(ledger.load().await.is_empty());
            ledger.advance("Paris", 1).await.unwrap();
            ledger.advance("Paris", 2).await.unwrap();
            ledger.complete("Lima").await.unwrap();
        }
        let ledger = ProgressLedger::open(&path).await.unwrap();
        let states = ledger.load().await;
        assert_eq!(states.get("Paris"), Some(&UnitState::Pending(2)));
        assert_eq!(states.get("Lima"), Some(&UnitState::Done));
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        tokio::fs::write(&path, b"Paris,1\nParis,").await.unwrap();

        let ledger = ProgressLedger::open(&path).await.unwrap();
        assert_eq!(ledger.state_of("Paris").await, Some(UnitState::Pending(1)));
        ledger.advance("Paris", 2).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "Paris,1\nParis,2\n");
    }

    #[tokio::test]
    async fn test_done_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let ledger = ProgressLedger::open(&path).await.unwrap();
        ledger.advance("Quito", 1).await.unwrap();
        ledger.complete("Quito").await.unwrap();
        ledger.advance("Quito", 2).await.unwrap();
        assert_eq!(ledger.state_of("Quito").await, Some(UnitState::Done));
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "Quito,1\nQuito,done\n");
    }

    #[tokio::test]
    async fn test_retire_only_when_all_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let ledger = ProgressLedger::open(&path).await.unwrap();
        ledger.complete("A").await.unwrap();
        ledger.advance("B", 3).await.unwrap();

        assert!(!ledger.retire_if_complete(["A", "B"]).await.unwrap());
        assert!(path.exists());
        assert!(!ledger.is_retired());

        ledger.complete("B").await.unwrap();
        assert!(ledger.retire_if_complete(["A", "B"]).await.unwrap());
        assert!(!path.exists());
        assert!(ledger.is_retired());
    }

    #[tokio::test]
    async fn test_concurrent_appends_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let ledger = Arc::new(ProgressLedger::open(&path).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for w in 0..8 {
            let ledger = ledger.clone();
            tasks.spawn(async move {
                let key = format!("unit-{}", w);
                for page in 1..=25 {
                    ledger.advance(&key, page).await.unwrap();
                }
                ledger.complete(&key).await.unwrap();
            });
        }
        while let Some(r) = tasks.join_next().await {
            r.unwrap();
        }

        let bytes = tokio::fs::read(&path).await.unwrap();
        let r = replay(&bytes);
        assert!(r.corrupt.is_empty());
        assert_eq!(r.torn_tail, 0);
        assert_eq!(r.states.len(), 8);
        assert!(r.states.values().all(|s| *s == UnitState::Done));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 8 * 26);
    }
}
