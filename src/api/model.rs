use crate::model::common::{deserialize_optional_flexible_i64, deserialize_optional_scalar};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{from_value, Value};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ExploreResponse {
    #[serde(default, deserialize_with = "deserialize_event_list")]
    pub events: Vec<ApiEvent>,
    #[serde(default, deserialize_with = "deserialize_optional_flexible_i64")]
    pub total: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_flexible_i64")]
    pub remaining: Option<i64>,
}

impl ExploreResponse {
    /// Continuation hint. Only an empty page ends a city.
    pub fn has_more(&self) -> bool {
        match (self.remaining, self.total) {
            (Some(remaining), _) => remaining > 0,
            (None, Some(total)) => total > 0 && !self.events.is_empty(),
            (None, None) => !self.events.is_empty(),
        }
    }
}

/// `events` occasionally arrives as `null` or an object when a city has no results.
fn deserialize_event_list<'de, D>(deserializer: D) -> Result<Vec<ApiEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(arr) => from_value(Value::Array(arr)).map_err(de::Error::custom),
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        other => Err(de::Error::custom(format!(
            "expected events array, got {}",
            other
        ))),
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub event_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub day_of_week: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub formatted_date_without_year: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub formatted_time: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub venue_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub formatted_venue_location: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub price_class: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_tbd: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_date_confirmed: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_time_confirmed: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub event_state: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub venue_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub has_active_listings: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_favorite: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub aggregate_favorites: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_parking_event: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_refetched_global_event: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_scalar")]
    pub is_under_hundred: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explore_page() {
        let body = r#"{
            "events": [
                {"eventId": 153012345, "name": "Concert", "categoryId": 7,
                 "isTbd": false, "venueId": "991", "extra": {"ignored": true}},
                {"eventId": "153012346", "name": "Match", "categoryId": null}
            ],
            "total": 57,
            "remaining": 17
        }"#;
        let page: ExploreResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].event_id.as_deref(), Some("153012345"));
        assert_eq!(page.events[0].category_id.as_deref(), Some("7"));
        assert_eq!(page.events[0].is_tbd.as_deref(), Some("false"));
        assert_eq!(page.events[1].category_id, None);
        assert!(page.has_more());
    }

    #[test]
    fn test_empty_and_null_event_lists() {
        let page: ExploreResponse = serde_json::from_str(r#"{"events": [], "total": 0}"#).unwrap();
        assert!(page.events.is_empty());
        assert!(!page.has_more());

        let page: ExploreResponse = serde_json::from_str(r#"{"events": null}"#).unwrap();
        assert!(page.events.is_empty());

        let page: ExploreResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(page.events.is_empty());
    }
}
