//! VX Recon - Nikto-driven web scan pipeline
//!
//! This library launches the Nikto scanner against a target, turns its output
//! into severity-ranked findings, re-verifies every finding over HTTP, audits
//! security headers and cookies, and crawls the target for exposed sensitive
//! paths. Job progress and state are tracked for asynchronous polling.
//!
//! # Warning
//! This tool is designed for authorized security assessment only. Users are
//! responsible for ensuring they have permission before scanning any target.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod display;
pub mod error;
pub mod headers;
pub mod job;
pub mod parser;
pub mod probe;
pub mod reporting;
pub mod runner;
pub mod sensitive;
pub mod severity;
pub mod store;
pub mod utils;
pub mod verify;

pub use error::{Result, ScanError};

/// Common types shared by the pipeline stages and the store
pub mod types {
    use crate::{Result, ScanError};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};
    use std::fmt;

    pub const OWASP_MISCONFIGURATION: &str = "A05:2021-Security Misconfiguration";

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Low,
        Medium,
        High,
        Critical,
    }

    impl Severity {
        pub fn as_str(&self) -> &'static str {
            match self {
                Severity::Low => "low",
                Severity::Medium => "medium",
                Severity::High => "high",
                Severity::Critical => "critical",
            }
        }
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum Confidence {
        Low,
        Medium,
        High,
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum Category {
        Nikto,
        Headers,
        Cookies,
        Crawler,
    }

    impl Category {
        pub fn as_str(&self) -> &'static str {
            match self {
                Category::Nikto => "nikto",
                Category::Headers => "headers",
                Category::Cookies => "cookies",
                Category::Crawler => "crawler",
            }
        }
    }

    impl fmt::Display for Category {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Verification state and tool data attached to a finding.
    ///
    /// Serializes as one flat JSON object; `extra` carries tool-specific keys
    /// such as `tool`, `raw` or `cookie`.
    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    pub struct Evidence {
        pub verified: bool,
        pub path: Option<String>,
        pub status: Option<u16>,
        pub content_length: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub note: Option<String>,
        #[serde(flatten)]
        pub extra: Map<String, Value>,
    }

    impl Evidence {
        pub fn unverified() -> Self {
            Self::default()
        }

        pub fn observed(status: u16, path: &str) -> Self {
            Self {
                verified: true,
                path: Some(path.to_string()),
                status: Some(status),
                ..Self::default()
            }
        }

        pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
            self.extra.insert(key.to_string(), value.into());
            self
        }

        pub fn with_error(mut self, error: impl Into<String>) -> Self {
            self.error = Some(error.into());
            self
        }
    }

    /// A finding produced by a pipeline stage, not yet persisted
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct NewFinding {
        pub category: Category,
        pub title: String,
        pub severity: Severity,
        pub evidence: Evidence,
        pub owasp_tags: Vec<String>,
        pub confidence: Confidence,
    }

    impl NewFinding {
        pub fn new(
            category: Category,
            title: impl Into<String>,
            severity: Severity,
            confidence: Confidence,
            evidence: Evidence,
        ) -> Self {
            Self {
                category,
                title: title.into(),
                severity,
                evidence,
                owasp_tags: vec![OWASP_MISCONFIGURATION.to_string()],
                confidence,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Finding {
        pub id: u64,
        pub job_id: u64,
        pub category: Category,
        pub title: String,
        pub severity: Severity,
        pub evidence: Evidence,
        pub owasp_tags: Vec<String>,
        pub confidence: Confidence,
    }

    impl Finding {
        pub fn from_new(id: u64, job_id: u64, finding: NewFinding) -> Self {
            Self {
                id,
                job_id,
                category: finding.category,
                title: finding.title,
                severity: finding.severity,
                evidence: finding.evidence,
                owasp_tags: finding.owasp_tags,
                confidence: finding.confidence,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Target {
        pub id: u64,
        pub name: String,
        pub base_url: String,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum JobStatus {
        Queued,
        Running,
        Complete,
        Error,
    }

    impl JobStatus {
        pub fn as_str(&self) -> &'static str {
            match self {
                JobStatus::Queued => "queued",
                JobStatus::Running => "running",
                JobStatus::Complete => "complete",
                JobStatus::Error => "error",
            }
        }

        pub fn is_terminal(&self) -> bool {
            matches!(self, JobStatus::Complete | JobStatus::Error)
        }

        /// Status only moves forward: queued -> running -> complete | error.
        pub fn can_transition_to(&self, next: JobStatus) -> bool {
            match (self, next) {
                (a, b) if *a == b => true,
                (JobStatus::Queued, JobStatus::Running) => true,
                (JobStatus::Queued, JobStatus::Error) => true,
                (JobStatus::Running, JobStatus::Complete) => true,
                (JobStatus::Running, JobStatus::Error) => true,
                _ => false,
            }
        }
    }

    impl fmt::Display for JobStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Rolling tail of process output, capped at `LogTail::MAX_CHARS` characters
    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(transparent)]
    pub struct LogTail(String);

    impl LogTail {
        pub const MAX_CHARS: usize = 4000;

        pub fn new(initial: &str) -> Self {
            let mut tail = Self::default();
            tail.push(initial);
            tail
        }

        pub fn push(&mut self, text: &str) {
            self.0.push_str(text);
            let count = self.0.chars().count();
            if count > Self::MAX_CHARS {
                let cut = self
                    .0
                    .char_indices()
                    .nth(count - Self::MAX_CHARS)
                    .map(|(idx, _)| idx)
                    .unwrap_or(self.0.len());
                self.0.drain(..cut);
            }
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Job {
        pub id: u64,
        pub target_id: u64,
        pub status: JobStatus,
        pub progress: u8,
        pub started_at: Option<DateTime<Utc>>,
        pub finished_at: Option<DateTime<Utc>>,
        pub log_tail: LogTail,
    }

    impl Job {
        /// Apply one read-modify-write update. Progress is clamped to 0..=100,
        /// `started_at` is only set once.
        pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
            if let Some(next) = update.status {
                if !self.status.can_transition_to(next) {
                    return Err(ScanError::InvalidTransition {
                        from: self.status.to_string(),
                        to: next.to_string(),
                    });
                }
                self.status = next;
            }
            if let Some(progress) = update.progress {
                self.progress = progress.clamp(0, 100) as u8;
            }
            if let Some(text) = update.append_log {
                self.log_tail.push(&text);
            }
            if let Some(started) = update.started_at {
                if self.started_at.is_none() {
                    self.started_at = Some(started);
                }
            }
            if let Some(finished) = update.finished_at {
                self.finished_at = Some(finished);
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct JobUpdate {
        pub status: Option<JobStatus>,
        pub progress: Option<i32>,
        pub append_log: Option<String>,
        pub started_at: Option<DateTime<Utc>>,
        pub finished_at: Option<DateTime<Utc>>,
    }

    impl JobUpdate {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn status(mut self, status: JobStatus) -> Self {
            self.status = Some(status);
            self
        }

        pub fn progress(mut self, progress: i32) -> Self {
            self.progress = Some(progress);
            self
        }

        pub fn log(mut self, text: impl Into<String>) -> Self {
            self.append_log = Some(text.into());
            self
        }

        pub fn started(mut self, at: DateTime<Utc>) -> Self {
            self.started_at = Some(at);
            self
        }

        pub fn finished(mut self, at: DateTime<Utc>) -> Self {
            self.finished_at = Some(at);
            self
        }
    }
}
