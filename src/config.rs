use crate::error::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER, USER_AGENT,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_INPUT_CSV: &str = "worldcities.csv";
pub const DEFAULT_COMBINED_CSV: &str = "events.csv";
pub const DEFAULT_PROGRESS_LOG: &str = "progress.log";
pub const DEFAULT_RAW_CACHE_DIR: &str = "wget_output";
pub const DEFAULT_VENUE_DIR: &str = "venues";

pub const DEFAULT_CONCURRENT_CITIES: usize = 5;
pub const DEFAULT_CONCURRENT_VENUES: usize = 10;
pub const DEFAULT_WAIT_SECONDS: f64 = 1.0;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 2.0;
pub const DEFAULT_MAX_RETRY_DELAY_SECS: f64 = 60.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const HTTP_CONNECT_TIMEOUT: u64 = 20;
pub const DEFAULT_MAX_PAGES: u32 = 100;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const LEDGER_DONE_MARKER: &str = "done";
pub const VENUE_FILE_SUFFIX: &str = "_venue.json";

pub const EXPLORE_URL: &str = "https://www.stubhub.com/explore";
pub const EXPLORE_METHOD: &str = "getExploreEvents";
pub const VENUE_MAP_URL: &str =
    "https://www.stubhub.com/Browse/VenueMap/GetVenueMapSeatingConfig";

/// Column order of the aggregated events file. Fixed for the file's lifetime.
pub const EVENT_COLUMNS: [&str; 25] = [
    "city",
    "country",
    "page",
    "eventId",
    "name",
    "url",
    "dayOfWeek",
    "formattedDateWithoutYear",
    "formattedTime",
    "venueName",
    "formattedVenueLocation",
    "categoryId",
    "imageUrl",
    "priceClass",
    "isTbd",
    "isDateConfirmed",
    "isTimeConfirmed",
    "eventState",
    "venueId",
    "hasActiveListings",
    "isFavorite",
    "aggregateFavorites",
    "isParkingEvent",
    "isRefetchedGlobalEvent",
    "isUnderHundred",
];

const CHROME_VER: &str = "114.0.0.0";
const WEBKIT_VER: &str = "537.36";
static USER_AGENT_VAL: Lazy<String> = Lazy::new(|| {
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/{} Chrome/{} Safari/{}",
        WEBKIT_VER, CHROME_VER, WEBKIT_VER
    )
});
const ORIGIN_VAL: &str = "https://www.stubhub.com";
const REFERER_VAL: &str = "https://www.stubhub.com/";

pub static BASE_UA_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static(&USER_AGENT_VAL));
    h.insert(ORIGIN, HeaderValue::from_static(ORIGIN_VAL));
    h.insert(REFERER, HeaderValue::from_static(REFERER_VAL));
    h.insert(ACCEPT, HeaderValue::from_static("*/*"));
    h.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    h
});

pub static FORBIDDEN_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f\x7f\^!@#$%^&*()+={}\[\];,'’]"#).unwrap());
pub static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").unwrap());

/// Run-wide settings. Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    pub input_csv: PathBuf,
    pub combined_csv: PathBuf,
    pub progress_log: PathBuf,
    pub raw_cache_dir: PathBuf,
    pub keep_raw_pages: bool,
    pub venue_dir: PathBuf,
    pub top_n: Option<usize>,

    pub concurrent_cities: usize,
    pub concurrent_venues: usize,
    pub wait: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub request_timeout: Duration,
    pub max_pages: u32,
    pub log_level: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            input_csv: PathBuf::from(DEFAULT_INPUT_CSV),
            combined_csv: PathBuf::from(DEFAULT_COMBINED_CSV),
            progress_log: PathBuf::from(DEFAULT_PROGRESS_LOG),
            raw_cache_dir: PathBuf::from(DEFAULT_RAW_CACHE_DIR),
            keep_raw_pages: true,
            venue_dir: PathBuf::from(DEFAULT_VENUE_DIR),
            top_n: None,
            concurrent_cities: DEFAULT_CONCURRENT_CITIES,
            concurrent_venues: DEFAULT_CONCURRENT_VENUES,
            wait: Duration::from_secs_f64(DEFAULT_WAIT_SECONDS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs_f64(DEFAULT_RETRY_DELAY_SECS),
            max_retry_delay: Duration::from_secs_f64(DEFAULT_MAX_RETRY_DELAY_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_pages: DEFAULT_MAX_PAGES,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = HarvestConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INPUT_CSV") {
            cfg.input_csv = PathBuf::from(v);
        }
        if let Some(v) = get("COMBINED_CSV") {
            cfg.combined_csv = PathBuf::from(v);
        }
        if let Some(v) = get("PROGRESS_LOG") {
            cfg.progress_log = PathBuf::from(v);
        }
        if let Some(v) = get("RAW_CACHE_DIR") {
            cfg.raw_cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KEEP_RAW_PAGES") {
            cfg.keep_raw_pages = parse_bool("KEEP_RAW_PAGES", &v)?;
        }
        if let Some(v) = get("VENUE_DIR") {
            cfg.venue_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TOP_N") {
            cfg.top_n = Some(parse_value("TOP_N", &v)?);
        }
        if let Some(v) = get("CONCURRENT_CITIES") {
            cfg.concurrent_cities = parse_value("CONCURRENT_CITIES", &v)?;
        }
        if let Some(v) = get("CONCURRENT_VENUES") {
            cfg.concurrent_venues = parse_value("CONCURRENT_VENUES", &v)?;
        }
        if let Some(v) = get("WAIT_SECONDS") {
            cfg.wait = parse_secs("WAIT_SECONDS", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            cfg.max_retries = parse_value("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY") {
            cfg.retry_delay = parse_secs("RETRY_DELAY", &v)?;
        }
        if let Some(v) = get("MAX_RETRY_DELAY") {
            cfg.max_retry_delay = parse_secs("MAX_RETRY_DELAY", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            cfg.request_timeout = Duration::from_secs(parse_value("REQUEST_TIMEOUT", &v)?);
        }
        if let Some(v) = get("MAX_PAGES") {
            cfg.max_pages = parse_value("MAX_PAGES", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            cfg.log_level = v.trim().to_lowercase();
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.concurrent_cities < 1 {
            return Err(AppError::ConfigError(
                "concurrent_cities must be at least 1".into(),
            ));
        }
        if self.concurrent_venues < 1 {
            return Err(AppError::ConfigError(
                "concurrent_venues must be at least 1".into(),
            ));
        }
        if self.max_retries < 1 {
            return Err(AppError::ConfigError(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.request_timeout < Duration::from_secs(1) {
            return Err(AppError::ConfigError(
                "request_timeout must be at least 1 second".into(),
            ));
        }
        if self.max_pages < 1 {
            return Err(AppError::ConfigError("max_pages must be at least 1".into()));
        }
        if self.top_n == Some(0) {
            return Err(AppError::ConfigError("top_n must be at least 1 when set".into()));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> AppResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AppError::ConfigError(format!("Invalid value for {}: '{}'", key, raw)))
}

fn parse_secs(key: &str, raw: &str) -> AppResult<Duration> {
    let secs: f64 = parse_value(key, raw)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        AppError::ConfigError(format!(
            "{} must be a non-negative number of seconds, got '{}'",
            key, raw
        ))
    })
}

fn parse_bool(key: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "Invalid boolean for {}: '{}'",
            key, raw
        ))),
    }
}
