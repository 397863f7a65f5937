use super::client::ApiClient;
use super::model::ExploreResponse;
use crate::config;
use crate::core::fetcher::{ArtifactSource, PageResult, PageSource};
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::city::City;
use crate::model::event::{DedupKey, EventRow};
use crate::utils;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Decodes one explore response into event rows for `city`.
pub fn parse_explore_page(raw: &[u8], city: &City, page: u32) -> AppResult<PageResult<EventRow>> {
    let resp: ExploreResponse = serde_json::from_slice(raw).map_err(|e| {
        let snippet_len = raw.len().min(200);
        let snippet = String::from_utf8_lossy(&raw[..snippet_len]);
        log(
            LogLevel::Debug,
            &format!(
                "Fail parse explore page {} for {}: {}. Snippet: '{}'",
                page,
                city.label(),
                e,
                snippet
            ),
        );
        AppError::from(e)
    })?;

    let has_more = resp.has_more();
    let records = resp
        .events
        .into_iter()
        .map(|event| EventRow::from_api(event, city, page))
        .collect();
    Ok(PageResult {
        records,
        has_more,
        raw: None,
    })
}

pub struct HttpEventSource {
    client: ApiClient,
}

impl HttpEventSource {
    pub fn new(client: ApiClient) -> Self {
        HttpEventSource { client }
    }

    pub fn query_for(city: &City, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("method", config::EXPLORE_METHOD.to_string()),
            ("lat", utils::b64(&city.lat)),
            ("lon", utils::b64(&city.lng)),
            ("page", page.to_string()),
        ]
    }
}

#[async_trait]
impl PageSource for HttpEventSource {
    async fn fetch_page(&self, city: &City, page: u32) -> AppResult<PageResult<EventRow>> {
        let ctx = format!("{} p{}", city.label(), page);
        let raw: Bytes = self
            .client
            .get(config::EXPLORE_URL, &Self::query_for(city, page), &ctx)
            .await?;
        // Non-JSON 200 bodies count as transient.
        let mut result = parse_explore_page(&raw, city, page)
            .map_err(|e| AppError::retryable(&ctx, format!("unparseable page: {}", e)))?;
        result.raw = Some(raw);
        Ok(result)
    }
}

pub struct HttpVenueSource {
    client: ApiClient,
}

impl HttpVenueSource {
    pub fn new(client: ApiClient) -> Self {
        HttpVenueSource { client }
    }

    pub fn url_for(key: &DedupKey) -> String {
        format!("{}/{}", config::VENUE_MAP_URL, key.event_id)
    }

    pub fn form_for(key: &DedupKey) -> Vec<(&'static str, String)> {
        vec![
            ("categoryId", key.category_id.to_string()),
            ("withFees", "true".to_string()),
            ("withSeats", "false".to_string()),
        ]
    }
}

#[async_trait]
impl ArtifactSource for HttpVenueSource {
    async fn fetch_artifact(&self, key: &DedupKey) -> AppResult<Value> {
        let ctx = format!("Venue {}", key);
        let query = [("categoryId", key.category_id.to_string())];
        let raw = self
            .client
            .post_form(&Self::url_for(key), &query, &Self::form_for(key), &ctx)
            .await?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(AppError::retryable(&ctx, "empty response body"));
        }
        serde_json::from_slice(&raw)
            .map_err(|e| AppError::retryable(&ctx, format!("invalid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city() -> City {
        City {
            id: None,
            name: "Austin".into(),
            country: "United States".into(),
            lat: "30.2672".into(),
            lng: "-97.7431".into(),
        }
    }

    #[test]
    fn test_parse_page_into_rows() {
        let raw = br#"{"events":[{"eventId":101,"name":"Show","categoryId":"7","venueName":"Moody Center"}],"total":1,"remaining":0}"#;
        let page = parse_explore_page(raw, &city(), 3).unwrap();
        assert_eq!(page.records.len(), 1);
        let row = &page.records[0];
        assert_eq!(row.city, "Austin");
        assert_eq!(row.country, "United States");
        assert_eq!(row.page, 3);
        assert_eq!(row.event_id.as_deref(), Some("101"));
        assert_eq!(row.venue_name.as_deref(), Some("Moody Center"));
        assert!(!page.has_more);
    }

    #[test]
    fn test_empty_listing_is_completion_page() {
        let page = parse_explore_page(br#"{"events":[],"total":0}"#, &city(), 9).unwrap();
        assert!(page.is_empty());
    }

    #[test]
    fn test_non_json_body_is_error() {
        assert!(parse_explore_page(b"<html>slow down</html>", &city(), 0).is_err());
    }

    #[test]
    fn test_request_shapes() {
        let q = HttpEventSource::query_for(&city(), 2);
        assert_eq!(q[0], ("method", "getExploreEvents".to_string()));
        assert_eq!(q[1].1, utils::b64("30.2672"));
        assert_eq!(q[3], ("page", "2".to_string()));

        let key = DedupKey {
            event_id: 42,
            category_id: 7,
        };
        assert!(HttpVenueSource::url_for(&key).ends_with("/GetVenueMapSeatingConfig/42"));
        assert_eq!(HttpVenueSource::form_for(&key)[1], ("withFees", "true".to_string()));
    }
}
