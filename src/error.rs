use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Target {0} not found")]
    TargetNotFound(u64),

    #[error("Target {target} still has active job {job}")]
    TargetBusy { target: u64, job: u64 },

    #[error("Job {0} not found")]
    JobNotFound(u64),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Scanner image '{image}' unavailable: {detail}")]
    ImageUnavailable { image: String, detail: String },

    #[error("Launcher '{0}' not found or not in PATH")]
    LauncherMissing(String),

    #[error("Scanner process error: {0}")]
    Process(String),

    #[error("Header audit error: {0}")]
    HeaderAudit(String),

    #[error("Crawler error: {0}")]
    Crawl(String),

    #[error("Reporting error: {0}")]
    Reporting(String),
}
