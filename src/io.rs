use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::utils;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub fn clean_filename<S: AsRef<str>>(name: S) -> String {
    let name_ref = name.as_ref().trim();
    if name_ref.is_empty() {
        return "invalid_empty_name".to_string();
    }

    let cleaned = config::FORBIDDEN_CHARS_RE.replace_all(name_ref, "_");
    let cleaned = config::WHITESPACE_RE.replace_all(&cleaned, "_");

    let cleaned = cleaned.trim_matches('_').to_lowercase();

    if cleaned.is_empty() {
        "invalid_or_empty_name".to_string()
    } else {
        cleaned
    }
}

pub async fn ensure_dir(dir: &Path) -> AppResult<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .await
        .map_err(|e| map_io_error(e, dir))
}

pub async fn ensure_parent_dir(path: &Path) -> AppResult<()> {
    match path.parent() {
        Some(parent) => ensure_dir(parent).await,
        None => Ok(()),
    }
}

pub fn map_io_error(error: std::io::Error, path: &Path) -> AppError {
    AppError::Io(format!("I/O error at path '{}': {}", path.display(), error))
}

pub async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Opens `path` for appending, creating it when absent.
pub async fn open_append(path: &Path) -> AppResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| map_io_error(e, path))
}

/// Splits a line-oriented buffer into its newline-terminated prefix and a torn tail.
pub fn split_torn_tail(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().rposition(|b| *b == b'\n') {
        Some(idx) => bytes.split_at(idx + 1),
        None => bytes.split_at(0),
    }
}

/// Cuts a torn last line left by an interrupted append. Returns the bytes dropped.
pub async fn truncate_torn_tail(path: &Path) -> AppResult<usize> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(map_io_error(e, path)),
    };
    let (complete, torn) = split_torn_tail(&bytes);
    if torn.is_empty() {
        return Ok(0);
    }
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| map_io_error(e, path))?;
    file.set_len(complete.len() as u64)
        .await
        .map_err(|e| map_io_error(e, path))?;
    file.sync_all().await.map_err(|e| map_io_error(e, path))?;
    Ok(torn.len())
}

/// Writes via a sibling temp file and rename, so readers never observe a partial file.
pub async fn write_file_atomic(fpath: &Path, data: &[u8]) -> AppResult<()> {
    let file_name = fpath
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Io(format!("No file name in '{}'", fpath.display())))?;
    let tmp_path = fpath.with_file_name(format!(".{}.tmp", file_name));

    let mut file = File::create(&tmp_path)
        .await
        .map_err(|e| map_io_error(e, &tmp_path))?;
    let write_result = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(map_io_error(e, &tmp_path));
    }
    fs::rename(&tmp_path, fpath).await.map_err(|e| {
        let err = map_io_error(e, fpath);
        log(
            LogLevel::Warning,
            &format!("Rename of '{}' failed: {}", tmp_path.display(), err),
        );
        err
    })
}

pub async fn save_json<T>(fpath: PathBuf, data: T, log_ctx: String) -> AppResult<()>
where
    T: Serialize + Send + Sync + 'static,
{
    let json_string =
        utils::run_blocking(move || serde_json::to_string_pretty(&data).map_err(AppError::from))
            .await
            .map_err(|e| {
                log(
                    LogLevel::Error,
                    &format!(
                        "Save JSON ({}) FAIL - Serialize/Task Error: {}. File: '{}'",
                        log_ctx,
                        e,
                        fpath.display()
                    ),
                );
                e
            })?;

    write_file_atomic(&fpath, json_string.as_bytes())
        .await
        .map_err(|e| {
            log(
                LogLevel::Error,
                &format!(
                    "Save JSON ({}) FAIL - Write Error: {}. File: '{}'",
                    log_ctx,
                    e,
                    fpath.display()
                ),
            );
            e
        })
}

/// Optional on-disk copy of every raw page, one file per (unit, page).
#[derive(Debug, Clone)]
pub struct RawPageCache {
    dir: PathBuf,
    enabled: bool,
}

impl RawPageCache {
    pub fn new(dir: PathBuf, enabled: bool) -> Self {
        RawPageCache { dir, enabled }
    }

    pub fn path_for(&self, unit_key: &str, page: u32) -> PathBuf {
        self.dir
            .join(format!("{}_p{}.json", clean_filename(unit_key), page))
    }

    pub async fn prepare(&self) -> AppResult<()> {
        if self.enabled {
            ensure_dir(&self.dir).await?;
        }
        Ok(())
    }

    pub async fn store(&self, unit_key: &str, page: u32, raw: &[u8]) -> AppResult<()> {
        if !self.enabled {
            return Ok(());
        }
        write_file_atomic(&self.path_for(unit_key, page), raw).await
    }

    /// Drops pages `0..=last_page` of a finished unit.
    pub async fn purge_unit(&self, unit_key: &str, last_page: u32) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut removed = 0;
        for page in 0..=last_page {
            if fs::remove_file(self.path_for(unit_key, page)).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }
}
