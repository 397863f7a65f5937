use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CityRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "city")]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lng: Option<String>,
}

/// One phase-one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub id: Option<String>,
    pub name: String,
    pub country: String,
    /// Coordinates are kept verbatim; the API receives the input text, not a re-rendered float.
    pub lat: String,
    pub lng: String,
}

impl City {
    /// Stable ledger key: the input id when present, otherwise `lat,lng`.
    pub fn unit_key(&self) -> String {
        match self.id.as_deref() {
            Some(id) => id.to_string(),
            None => format!("{},{}", self.lat, self.lng),
        }
    }

    pub fn label(&self) -> String {
        format!("{}, {}", self.name, self.country)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl CityRow {
    fn into_city(self) -> Result<City, String> {
        let name = non_empty(self.name).ok_or("missing name")?;
        let country = non_empty(self.country).ok_or("missing country")?;
        let lat = non_empty(self.lat).ok_or("missing lat")?;
        let lng = non_empty(self.lng).ok_or("missing lng")?;

        let lat_ok = lat.parse::<f64>().is_ok_and(|v| (-90.0..=90.0).contains(&v));
        let lng_ok = lng.parse::<f64>().is_ok_and(|v| (-180.0..=180.0).contains(&v));
        if !lat_ok || !lng_ok {
            return Err(format!("invalid coordinates lat='{}' lng='{}'", lat, lng));
        }

        Ok(City {
            id: non_empty(self.id),
            name,
            country,
            lat,
            lng,
        })
    }
}

/// Reads and validates the city list. Invalid rows are skipped with a warning;
/// duplicate unit keys keep their first occurrence.
pub fn read_cities<R: Read>(reader: R, top_n: Option<usize>) -> AppResult<Vec<City>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut cities = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;

    for (row_num, row) in rdr.deserialize::<CityRow>().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                skipped += 1;
                log(
                    LogLevel::Warning,
                    &format!("Skipping unreadable city row {}: {}", row_num + 1, e),
                );
                continue;
            }
        };
        match row.into_city() {
            Ok(city) => {
                if seen.insert(city.unit_key()) {
                    cities.push(city);
                }
            }
            Err(reason) => {
                skipped += 1;
                log(
                    LogLevel::Warning,
                    &format!("Skipping invalid city row {}: {}", row_num + 1, reason),
                );
            }
        }
        if top_n.is_some_and(|n| cities.len() >= n) {
            break;
        }
    }

    if skipped > 0 {
        log(
            LogLevel::Warning,
            &format!("Skipped {} invalid city row(s)", skipped),
        );
    }
    Ok(cities)
}

pub fn load_cities(path: &Path, top_n: Option<usize>) -> AppResult<Vec<City>> {
    let file = std::fs::File::open(path).map_err(|e| {
        AppError::ConfigError(format!(
            "Input city list '{}' cannot be opened: {}",
            path.display(),
            e
        ))
    })?;
    let cities = read_cities(file, top_n)?;
    log(
        LogLevel::Info,
        &format!(
            "Loaded {} valid cities from {}",
            cities.len(),
            path.display()
        ),
    );
    Ok(cities)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
city,city_ascii,lat,lng,country,id
Tokyo,Tokyo,35.6897,139.6922,Japan,1392685764
Nowhere,Nowhere,abc,10.0,Atlantis,1
Jakarta,Jakarta,-6.1750,106.8275,Indonesia,1360771077
Tokyo,Tokyo,35.6897,139.6922,Japan,1392685764
,Blank,1.0,1.0,Nowhere,2
Polar,Polar,95.0,0.0,Nowhere,3
";

    #[test]
    fn test_invalid_rows_skipped_and_duplicates_collapsed() {
        let cities = read_cities(SAMPLE.as_bytes(), None).unwrap();
        let names: Vec<&str> = cities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Tokyo", "Jakarta"]);
        assert_eq!(cities[0].unit_key(), "1392685764");
        assert_eq!(cities[1].lat, "-6.1750");
    }

    #[test]
    fn test_top_n_limit() {
        let cities = read_cities(SAMPLE.as_bytes(), Some(1)).unwrap();
        assert_eq!(cities.len(), 1);
    }

    #[test]
    fn test_coordinate_key_without_id() {
        let data = "name,country,lat,lng\nOslo,Norway,59.9133,10.7389\n";
        let cities = read_cities(data.as_bytes(), None).unwrap();
        assert_eq!(cities[0].unit_key(), "59.9133,10.7389");
        assert_eq!(cities[0].label(), "Oslo, Norway");
    }
}
