use crate::api::model::ApiEvent;
use crate::model::city::City;
use crate::model::common::{CategoryId, EventId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of the aggregated events file. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub city: String,
    pub country: String,
    pub page: u32,
    pub event_id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub day_of_week: Option<String>,
    pub formatted_date_without_year: Option<String>,
    pub formatted_time: Option<String>,
    pub venue_name: Option<String>,
    pub formatted_venue_location: Option<String>,
    pub category_id: Option<String>,
    pub image_url: Option<String>,
    pub price_class: Option<String>,
    pub is_tbd: Option<String>,
    pub is_date_confirmed: Option<String>,
    pub is_time_confirmed: Option<String>,
    pub event_state: Option<String>,
    pub venue_id: Option<String>,
    pub has_active_listings: Option<String>,
    pub is_favorite: Option<String>,
    pub aggregate_favorites: Option<String>,
    pub is_parking_event: Option<String>,
    pub is_refetched_global_event: Option<String>,
    pub is_under_hundred: Option<String>,
}

impl EventRow {
    pub fn from_api(event: ApiEvent, city: &City, page: u32) -> Self {
        EventRow {
            city: city.name.clone(),
            country: city.country.clone(),
            page,
            event_id: event.event_id,
            name: event.name,
            url: event.url,
            day_of_week: event.day_of_week,
            formatted_date_without_year: event.formatted_date_without_year,
            formatted_time: event.formatted_time,
            venue_name: event.venue_name,
            formatted_venue_location: event.formatted_venue_location,
            category_id: event.category_id,
            image_url: event.image_url,
            price_class: event.price_class,
            is_tbd: event.is_tbd,
            is_date_confirmed: event.is_date_confirmed,
            is_time_confirmed: event.is_time_confirmed,
            event_state: event.event_state,
            venue_id: event.venue_id,
            has_active_listings: event.has_active_listings,
            is_favorite: event.is_favorite,
            aggregate_favorites: event.aggregate_favorites,
            is_parking_event: event.is_parking_event,
            is_refetched_global_event: event.is_refetched_global_event,
            is_under_hundred: event.is_under_hundred,
        }
    }
}

/// Phase-two fetch target: one venue map per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub event_id: EventId,
    pub category_id: CategoryId,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.category_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EVENT_COLUMNS;

    #[test]
    fn test_header_matches_column_order() {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.serialize(EventRow::default()).unwrap();
        let out = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        let header = out.lines().next().unwrap();
        assert_eq!(header, EVENT_COLUMNS.join(","));
    }
}
