use crate::core::scheduler::{SuspendReason, UnitOutcome};
use crate::logging::{log, LogLevel};
use crate::utils;
use std::collections::BTreeMap;
use std::time::Duration;

pub const CITY_PHASE: &str = "City Harvest";
pub const VENUE_PHASE: &str = "Venue Fetch";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub ok: usize,
    pub fail: usize,
    pub skip_or_empty: usize,
    pub blocked: usize,
    pub interrupted: usize,
    pub capped: usize,
    pub pages: usize,
    pub records: usize,
    pub total_tasks: usize,
}

impl CategoryStats {
    pub fn add_ok(&mut self) {
        self.ok += 1;
    }
    pub fn add_fail(&mut self) {
        self.fail += 1;
    }
    pub fn add_skip(&mut self) {
        self.skip_or_empty += 1;
    }
    pub fn set_total(&mut self, total: usize) {
        self.total_tasks = total;
    }
    pub fn get_processed(&self) -> usize {
        self.ok + self.fail + self.skip_or_empty + self.blocked + self.interrupted
    }

    pub fn record(&mut self, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Completed {
                pages,
                records,
                capped,
            } => {
                self.add_ok();
                self.pages += *pages as usize;
                self.records += records;
                if *capped {
                    self.capped += 1;
                }
            }
            UnitOutcome::Skipped => self.add_skip(),
            UnitOutcome::Suspended {
                reason: SuspendReason::Blocked,
                ..
            } => self.blocked += 1,
            UnitOutcome::Suspended {
                reason: SuspendReason::Cancelled,
                ..
            } => self.interrupted += 1,
            UnitOutcome::Failed { .. } => self.add_fail(),
        }
    }
}

pub type RunStats = BTreeMap<String, CategoryStats>;

pub fn print_summary(stats: &RunStats, duration: Duration) {
    let sep = "=".repeat(78);
    println!("\n{}\n{:^78}\n{}", sep, "Harvest Summary", sep);
    println!("Total Run Time:    {:.3?}", duration);
    println!("{}", "-".repeat(78));

    println!(
        "{:<14} {:<7} {:<7} {:<8} {:<9} {:<7} {:<8} {:<8} {:<7}",
        "Phase", "OK", "Skip", "Fail", "Blocked", "Capped", "Pages", "Records", "Total"
    );
    println!("{}", "-".repeat(78));

    for (phase, s) in stats {
        println!(
            "{:<14} {:<7} {:<7} {:<8} {:<9} {:<7} {:<8} {:<8} {:<7}",
            phase, s.ok, s.skip_or_empty, s.fail, s.blocked, s.capped, s.pages, s.records,
            s.total_tasks
        );
        let pending = s.total_tasks.saturating_sub(s.get_processed());
        if pending > 0 {
            println!("{:<14} {} unit(s) still pending", "", pending);
        }
        if s.records > 0 {
            println!(
                "{:<14} {:.2} records/s",
                "",
                utils::per_second(s.records, duration)
            );
        }
    }
    println!("{}", sep);

    log_overall_status(stats);

    let end_ts_str = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string();
    log(
        LogLevel::Step,
        &format!("--- Run Finished at {} ---", end_ts_str),
    );
}

fn log_overall_status(stats: &RunStats) {
    let failures: usize = stats.values().map(|s| s.fail).sum();
    let blocked: usize = stats.values().map(|s| s.blocked).sum();
    let interrupted: usize = stats.values().map(|s| s.interrupted).sum();

    if stats.is_empty() {
        log(LogLevel::Warning, "Run completed, but no phase was executed.");
    } else if blocked > 0 {
        log(
            LogLevel::Error,
            &format!(
                "Run stopped short: {} unit(s) blocked by upstream (HTTP 403). Change network and rerun.",
                blocked
            ),
        );
    } else if failures > 0 {
        log(
            LogLevel::Error,
            &format!(
                "Run completed with errors: {} unit(s) failed. Rerun to retry them.",
                failures
            ),
        );
    } else if interrupted > 0 {
        log(
            LogLevel::Warning,
            &format!(
                "Run interrupted: {} unit(s) left pending; they resume on the next run.",
                interrupted
            ),
        );
    } else {
        log(LogLevel::Success, "Run completed successfully.");
    }
}

pub fn determine_exit_code(stats: &RunStats) -> i32 {
    let unclean = stats.values().any(|s| s.fail > 0 || s.blocked > 0);
    if unclean {
        1
    } else {
        0
    }
}
