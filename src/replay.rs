use crate::api::fetchers::parse_explore_page;
use crate::config::EVENT_COLUMNS;
use crate::core::sink::AggregationSink;
use crate::error::{AppError, AppResult};
use crate::io::map_io_error;
use crate::logging::{log, LogLevel};
use crate::model::city::City;
use std::path::Path;
use tokio::fs;

/// Re-parses one cached explore page offline and appends its rows to `output`.
pub async fn reparse_page(input_path: &Path, city: &City, page: u32, output_path: &Path) -> AppResult<usize> {
    log(LogLevel::Info, "--- Re-parsing cached page ---");
    log(
        LogLevel::Info,
        &format!("Input file: {}", input_path.display()),
    );
    log(
        LogLevel::Info,
        &format!("Output file: {}", output_path.display()),
    );

    let raw = fs::read(input_path)
        .await
        .map_err(|e| map_io_error(e, input_path))?;
    let parsed = parse_explore_page(&raw, city, page).map_err(|e| {
        AppError::Argument(format!(
            "'{}' is not an explore page: {}",
            input_path.display(),
            e
        ))
    })?;

    if parsed.is_empty() {
        log(
            LogLevel::Warning,
            "Page holds no events (completion page). Nothing written.",
        );
        return Ok(0);
    }

    let sink = AggregationSink::open(output_path, &EVENT_COLUMNS).await?;
    let written = sink
        .append(&city.unit_key(), page, &parsed.records)
        .await?;
    log(
        LogLevel::Success,
        &format!(
            "Wrote {} event row(s) for {} to {}",
            written,
            city.label(),
            output_path.display()
        ),
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city() -> City {
        City {
            id: Some("7".into()),
            name: "Porto".into(),
            country: "Portugal".into(),
            lat: "41.15".into(),
            lng: "-8.61".into(),
        }
    }

    #[tokio::test]
    async fn test_reparse_cached_page() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("7_p2.json");
        let output = dir.path().join("reparsed.csv");
        fs::write(
            &input,
            r#"{"events":[{"eventId":1,"categoryId":2},{"eventId":3,"categoryId":4}]}"#,
        )
        .await
        .unwrap();

        assert_eq!(reparse_page(&input, &city(), 2, &output).await.unwrap(), 2);
        let text = fs::read_to_string(&output).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], EVENT_COLUMNS.join(","));
        assert!(lines[1].starts_with("Porto,Portugal,2,1,"));
    }

    #[tokio::test]
    async fn test_reparse_rejects_non_json() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.json");
        fs::write(&input, "<html></html>").await.unwrap();
        let err = reparse_page(&input, &city(), 0, &dir.path().join("o.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Argument(_)));
    }
}
