use crate::{Result, ScanError};

/// URL helpers shared by the runner, verifier, auditor and crawler
pub mod url {
    use super::*;
    use ::url::Url;

    /// Prefix `http://` when the target has no http(s) scheme.
    pub fn normalize_base(base_url: &str) -> String {
        let trimmed = base_url.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        }
    }

    pub fn parse(url: &str) -> Result<Url> {
        Url::parse(url).map_err(|e| ScanError::InvalidTarget(format!("{}: {}", url, e)))
    }

    /// Resolve `path` below the base URL, treating the base as a directory.
    pub fn join_path(base: &str, path: &str) -> Result<Url> {
        let dir = parse(&format!("{}/", base.trim_end_matches('/')))?;
        dir.join(path.trim_start_matches('/'))
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", path, e)))
    }

    /// Explicit port, or 80/443 for http/https.
    pub fn effective_port(url: &Url) -> Option<u16> {
        url.port_or_known_default()
    }

    pub fn same_origin(a: &Url, b: &Url) -> bool {
        a.scheme() == b.scheme()
            && a.host_str().map(|h| h.to_lowercase()) == b.host_str().map(|h| h.to_lowercase())
            && effective_port(a) == effective_port(b)
    }

    pub fn is_https(url: &str) -> bool {
        url.trim().to_lowercase().starts_with("https://")
    }
}

/// Time and formatting utilities
pub mod time {
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    /// Get current UTC timestamp
    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }

    /// Format duration as human readable string
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

/// Progress reporting utilities
pub mod progress {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// Percentage bar for polling a job's 0-100 progress
    pub fn create_job_bar(message: &str) -> ProgressBar {
        let pb = ProgressBar::new(100);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.cyan} [{bar:25.green/bright_black}] {pos:>3}% {msg}")
        {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }

        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}
