use crate::error::{AppError, AppResult};
use crate::io::{self, map_io_error};
use crate::logging::{log, LogLevel};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Single consolidated CSV shared by all workers. Append-only; the header is
/// written once when the file is created and must match on every later open.
pub struct AggregationSink {
    path: PathBuf,
    file: Mutex<File>,
    rows_appended: AtomicUsize,
}

impl AggregationSink {
    pub async fn open(path: &Path, columns: &[&str]) -> AppResult<Self> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        io::ensure_parent_dir(path).await?;

        let dropped = io::truncate_torn_tail(path).await?;
        if dropped > 0 {
            log(
                LogLevel::Warning,
                &format!(
                    "Output '{}' ended in a partial row ({} bytes); discarding it",
                    path.display(),
                    dropped
                ),
            );
        }

        let existing_len = match fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(map_io_error(e, path)),
        };

        if existing_len > 0 {
            check_header(path, &columns).await?;
        }

        let mut file = io::open_append(path).await?;
        if existing_len == 0 {
            let header = encode_record(&columns)?;
            file.write_all(&header)
                .await
                .map_err(|e| map_io_error(e, path))?;
            file.flush().await.map_err(|e| map_io_error(e, path))?;
        }

        Ok(AggregationSink {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            rows_appended: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_appended(&self) -> usize {
        self.rows_appended.load(Ordering::Relaxed)
    }

    /// Appends one page worth of rows as a single write under the sink lock.
    pub async fn append<R: Serialize>(
        &self,
        unit_key: &str,
        page: u32,
        rows: &[R],
    ) -> AppResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(rows.len() * 256));
        for row in rows {
            wtr.serialize(row)?;
        }
        let buf = wtr
            .into_inner()
            .map_err(|e| AppError::Csv(format!("{} p{}: {}", unit_key, page, e)))?;

        let mut file = self.file.lock().await;
        file.write_all(&buf)
            .await
            .map_err(|e| map_io_error(e, &self.path))?;
        file.flush().await.map_err(|e| map_io_error(e, &self.path))?;
        drop(file);

        self.rows_appended.fetch_add(rows.len(), Ordering::Relaxed);
        Ok(rows.len())
    }
}

fn encode_record(fields: &[String]) -> AppResult<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(fields)?;
    wtr.into_inner()
        .map_err(|e| AppError::Csv(format!("header encode: {}", e)))
}

async fn check_header(path: &Path, columns: &[String]) -> AppResult<()> {
    let bytes = fs::read(path).await.map_err(|e| map_io_error(e, path))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes.as_slice());
    let mut record = csv::StringRecord::new();
    rdr.read_record(&mut record)?;
    let found: Vec<&str> = record.iter().collect();
    if found != columns.iter().map(String::as_str).collect::<Vec<_>>() {
        return Err(AppError::ConfigError(format!(
            "Existing output '{}' has a different column layout ({} columns: {}); refusing to append",
            path.display(),
            found.len(),
            found.join(",")
        )));
    }
    Ok(())
}
