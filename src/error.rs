use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    Reqwest(String),
    #[error("Filesystem I/O error: {0}")]
    Io(String),
    #[error("JSON serialization error: {0}")]
    SerdeSerialize(String),
    #[error("JSON parsing error: {0}")]
    SerdeParse(String),
    #[error("CSV error: {0}")]
    Csv(String),
    #[error("Retryable upstream failure ({context}): {message}")]
    Retryable { context: String, message: String },
    #[error("Timeout during operation: {0}")]
    Timeout(String),
    #[error("Upstream blocked this client ({context}): HTTP {status}")]
    Blocked { context: String, status: u16 },
    #[error("Fatal request error: {0}")]
    Fatal(String),
    #[error("Gave up after {attempts} attempt(s) ({context}): {last}")]
    RetriesExhausted {
        context: String,
        attempts: u32,
        last: Box<AppError>,
    },
    #[error("Corrupt ledger entry at line {line}: '{content}'")]
    CorruptLedgerEntry { line: usize, content: String },
    #[error("Invalid argument provided: {0}")]
    Argument(String),
    #[error("Tokio task join error: {0}")]
    JoinError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Unexpected internal error: {0}")]
    Unexpected(String),
}

/// How the retry policy treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Blocked,
    Fatal,
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Reqwest(e.to_string())
        }
    }
}
impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() || e.is_eof() || e.is_syntax() {
            AppError::SerdeParse(e.to_string())
        } else {
            AppError::SerdeSerialize(e.to_string())
        }
    }
}
impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::Csv(e.to_string())
    }
}
impl From<JoinError> for AppError {
    fn from(e: JoinError) -> Self {
        AppError::JoinError(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn retryable<S: Into<String>>(context: &str, message: S) -> AppError {
        AppError::Retryable {
            context: context.to_string(),
            message: message.into(),
        }
    }

    pub fn blocked(context: &str, status: u16) -> AppError {
        AppError::Blocked {
            context: context.to_string(),
            status,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            AppError::Retryable { .. } | AppError::Timeout(_) | AppError::Reqwest(_) => {
                FailureClass::Retryable
            }
            AppError::Blocked { .. } => FailureClass::Blocked,
            _ => FailureClass::Fatal,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.class() == FailureClass::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            AppError::retryable("p0", "HTTP 503").class(),
            FailureClass::Retryable
        );
        assert_eq!(
            AppError::Timeout("slow".into()).class(),
            FailureClass::Retryable
        );
        assert_eq!(AppError::blocked("p0", 403).class(), FailureClass::Blocked);
        assert_eq!(
            AppError::Fatal("bad coords".into()).class(),
            FailureClass::Fatal
        );
        assert_eq!(AppError::Io("disk".into()).class(), FailureClass::Fatal);
    }

    #[test]
    fn test_exhausted_is_not_retried_again() {
        let e = AppError::RetriesExhausted {
            context: "Paris p3".into(),
            attempts: 3,
            last: Box::new(AppError::retryable("Paris p3", "HTTP 502")),
        };
        assert_eq!(e.class(), FailureClass::Fatal);
        assert!(e.to_string().contains("3 attempt(s)"));
    }
}
