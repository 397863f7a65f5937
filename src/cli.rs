use crate::config::HarvestConfig;
use crate::core::processor::RunMode;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::city::City;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Harvests event listings city by city, then fetches one venue map per event.",
    long_about = None,
    after_help = "Settings are read from the environment first (CONCURRENT_CITIES, WAIT_SECONDS, \
MAX_RETRIES, MAX_PAGES, ...); flags override them.",
    arg_required_else_help = true
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Phase one: walk every city's event pages into the combined CSV
    Events,
    /// Phase two: fetch one venue map per unique event in the combined CSV
    Venues,
    /// Both phases in sequence
    All,
    /// Re-parse one cached raw page into a CSV without network access
    Reparse {
        #[arg(value_name = "FILE_PATH")]
        file: PathBuf,
        #[arg(long)]
        city: String,
        #[arg(long)]
        country: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value = "reparsed_events.csv", value_name = "OUTPUT_FILE")]
        dest: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    #[arg(long, global = true, value_name = "FILE_PATH", help = "Input city list")]
    pub input: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE_PATH", help = "Combined events CSV")]
    pub output: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR_PATH", help = "Venue map directory")]
    pub venue_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Concurrent city workers")]
    pub cities: Option<usize>,

    #[arg(long, global = true, help = "Concurrent venue workers")]
    pub venues: Option<usize>,

    #[arg(long, global = true, help = "Seconds between requests of one worker")]
    pub wait: Option<f64>,

    #[arg(long, global = true, help = "Attempts per request")]
    pub retries: Option<u32>,

    #[arg(long, global = true, help = "Page cap per city")]
    pub max_pages: Option<u32>,

    #[arg(long, global = true, help = "Only the first N valid cities")]
    pub top: Option<usize>,

    #[arg(long, global = true, help = "Do not keep raw pages on disk")]
    pub no_raw_cache: bool,
}

impl CliArgs {
    pub fn run_mode(&self) -> Option<RunMode> {
        match self.command {
            Command::Events => Some(RunMode::Events),
            Command::Venues => Some(RunMode::Venues),
            Command::All => Some(RunMode::All),
            Command::Reparse { .. } => None,
        }
    }

    /// Environment, then flags, then validation.
    pub fn build_config(&self) -> AppResult<HarvestConfig> {
        let cfg = HarvestConfig::from_env()?;
        let cfg = self.overrides.apply(cfg)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn reparse_target(&self) -> Option<(PathBuf, City, u32, PathBuf)> {
        match &self.command {
            Command::Reparse {
                file,
                city,
                country,
                page,
                dest,
            } => Some((
                file.clone(),
                City {
                    id: None,
                    name: city.clone(),
                    country: country.clone(),
                    lat: String::new(),
                    lng: String::new(),
                },
                *page,
                dest.clone(),
            )),
            _ => None,
        }
    }
}

impl Overrides {
    pub fn apply(&self, mut cfg: HarvestConfig) -> AppResult<HarvestConfig> {
        if let Some(p) = &self.input {
            cfg.input_csv = p.clone();
        }
        if let Some(p) = &self.output {
            cfg.combined_csv = p.clone();
        }
        if let Some(p) = &self.venue_dir {
            cfg.venue_dir = p.clone();
        }
        if let Some(n) = self.cities {
            cfg.concurrent_cities = n;
        }
        if let Some(n) = self.venues {
            cfg.concurrent_venues = n;
        }
        if let Some(secs) = self.wait {
            cfg.wait = Duration::try_from_secs_f64(secs).map_err(|_| {
                AppError::Argument(format!(
                    "--wait must be a non-negative number of seconds, got {}",
                    secs
                ))
            })?;
        }
        if let Some(n) = self.retries {
            cfg.max_retries = n;
        }
        if let Some(n) = self.max_pages {
            cfg.max_pages = n;
        }
        if let Some(n) = self.top {
            cfg.top_n = Some(n);
        }
        if self.no_raw_cache {
            cfg.keep_raw_pages = false;
            log(LogLevel::Info, "Raw page cache disabled.");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_and_global_flags() {
        let args = CliArgs::try_parse_from(["harvest", "events", "--cities", "8", "--wait", "0.5"])
            .unwrap();
        assert_eq!(args.run_mode(), Some(RunMode::Events));
        let cfg = args.overrides.apply(HarvestConfig::default()).unwrap();
        assert_eq!(cfg.concurrent_cities, 8);
        assert_eq!(cfg.wait, Duration::from_millis(500));
    }

    #[test]
    fn test_reparse_target() {
        let args = CliArgs::try_parse_from([
            "harvest", "reparse", "cache/lima_p3.json", "--city", "Lima", "--country", "Peru",
            "--page", "3",
        ])
        .unwrap();
        assert_eq!(args.run_mode(), None);
        let (file, city, page, output) = args.reparse_target().unwrap();
        assert_eq!(file, PathBuf::from("cache/lima_p3.json"));
        assert_eq!(city.label(), "Lima, Peru");
        assert_eq!(page, 3);
        assert_eq!(output, PathBuf::from("reparsed_events.csv"));
    }

    #[test]
    fn test_negative_wait_is_rejected() {
        let args = CliArgs::try_parse_from(["harvest", "all", "--wait=-1"]).unwrap();
        assert!(args.overrides.apply(HarvestConfig::default()).is_err());
    }

    #[test]
    fn test_oversized_wait_is_argument_error() {
        let args = CliArgs::try_parse_from(["harvest", "events", "--wait", "1e20"]).unwrap();
        let err = args.overrides.apply(HarvestConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Argument(_)));
    }
}
