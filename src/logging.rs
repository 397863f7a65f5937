use colored::*;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Step,
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

const ALL_LEVELS: [LogLevel; 6] = [
    LogLevel::Step,
    LogLevel::Debug,
    LogLevel::Info,
    LogLevel::Success,
    LogLevel::Warning,
    LogLevel::Error,
];

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Step => "STEP",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    fn color(self) -> Color {
        match self {
            LogLevel::Step => Color::Magenta,
            LogLevel::Debug => Color::BrightBlack,
            LogLevel::Info => Color::Cyan,
            LogLevel::Success => Color::Green,
            LogLevel::Warning => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }
}

/// Visible width of the widest `[ TAG ]` bracket plus one space.
static PREFIX_WIDTH: Lazy<usize> = Lazy::new(|| {
    ALL_LEVELS
        .iter()
        .map(|l| l.tag().len() + 4)
        .max()
        .unwrap_or(11)
        + 1
});

static LOG_PREFIXES: Lazy<HashMap<LogLevel, String>> = Lazy::new(|| {
    colored::control::set_override(true);

    ALL_LEVELS
        .iter()
        .map(|level| {
            let tag = level.tag();
            let padding = PREFIX_WIDTH.saturating_sub(tag.len() + 4);
            let colored_tag = format!(" {} ", tag).color(level.color()).bold();
            (*level, format!("[{}]{}", colored_tag, " ".repeat(padding)))
        })
        .collect()
});

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn setup_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let format = tracing_subscriber::fmt::format()
        .with_level(false)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::fmt()
        .event_format(format)
        .with_ansi(true)
        .with_env_filter(filter)
        .try_init();
}

pub fn log(level: LogLevel, message: &str) {
    let line = match LOG_PREFIXES.get(&level) {
        Some(prefix) => format!("{}{}", prefix, message),
        None => format!("[ {} ] {}", level.tag(), message),
    };

    match level {
        LogLevel::Step => tracing::info!(target: "step", "{}", line),
        LogLevel::Debug => tracing::debug!("{}", line),
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", line),
        LogLevel::Warning => tracing::warn!("{}", line),
        LogLevel::Error => tracing::error!("{}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_align() {
        assert_eq!(*PREFIX_WIDTH, 12);
        for level in ALL_LEVELS {
            let prefix = &LOG_PREFIXES[&level];
            assert!(prefix.contains(level.tag()));
            let trailing = prefix.len() - prefix.trim_end().len();
            assert_eq!(trailing, *PREFIX_WIDTH - (level.tag().len() + 4));
        }
    }
}
