use std::path::PathBuf;
use thiserror::Error as ThisError;

/// Every failure an automation run can surface to its caller.
///
/// The driver flattens these into the `error` field of a [`crate::driver::RunReport`],
/// so the `Display` text is what ends up in the Lambda response.
#[derive(Debug, ThisError)]
pub enum AutomationError {
    #[error("timed out after {seconds}s waiting for {what} ({attempts} attempt(s))")]
    Timeout {
        what: String,
        seconds: u64,
        attempts: usize,
    },

    #[error("{0}")]
    MissingSettings(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not find credentials for {file_key}")]
    CredentialsNotFound { file_key: String },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("file download failed: {0}")]
    Fetch(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("deployment error: {0}")]
    Deploy(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AutomationError {
    /// Only timeouts are worth another attempt; everything else is final.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AutomationError::Timeout { .. })
    }

    pub fn timeout(what: impl Into<String>, seconds: u64) -> Self {
        AutomationError::Timeout {
            what: what.into(),
            seconds,
            attempts: 1,
        }
    }
}

pub type AutomationResult<T> = Result<T, AutomationError>;
