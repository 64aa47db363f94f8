use crate::config::{OutputFormat, ReportingConfig};
use crate::types::{Finding, Job, JobStatus, Severity, Target};
use crate::{Result, ScanError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs;

pub const CSV_HEADER: [&str; 8] = [
    "id",
    "job_id",
    "severity",
    "category",
    "title",
    "path",
    "http_status",
    "verified",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeverityDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityDistribution {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    /// Highest first, for tables
    pub fn rows(&self) -> [(Severity, usize); 4] {
        [
            (Severity::Critical, self.critical),
            (Severity::High, self.high),
            (Severity::Medium, self.medium),
            (Severity::Low, self.low),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub job_id: u64,
    /// Base URL of the scanned target, when it still exists
    pub target: Option<String>,
    pub status: JobStatus,
    pub findings_count: usize,
    pub verified_count: usize,
    pub unverified_count: usize,
    pub severity_distribution: SeverityDistribution,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Summary {
    pub fn from_findings(job: &Job, target: Option<&Target>, findings: &[Finding]) -> Self {
        let mut severity_distribution = SeverityDistribution::default();
        let mut verified_count = 0;
        for finding in findings {
            severity_distribution.record(finding.severity);
            if finding.evidence.verified {
                verified_count += 1;
            }
        }

        Self {
            job_id: job.id,
            target: target.map(|t| t.base_url.clone()),
            status: job.status,
            findings_count: findings.len(),
            verified_count,
            unverified_count: findings.len() - verified_count,
            severity_distribution,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Findings as CSV, one row per finding under `CSV_HEADER`.
pub fn to_csv(findings: &[Finding]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for f in findings {
        writer.write_record([
            f.id.to_string(),
            f.job_id.to_string(),
            f.severity.as_str().to_string(),
            f.category.as_str().to_string(),
            f.title.clone(),
            f.evidence.path.clone().unwrap_or_default(),
            f.evidence.status.map(|s| s.to_string()).unwrap_or_default(),
            f.evidence.verified.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ScanError::Reporting(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ScanError::Reporting(e.to_string()))
}

pub fn to_json(findings: &[Finding]) -> Result<String> {
    Ok(serde_json::to_string_pretty(findings)?)
}

pub struct ReportGenerator {
    config: ReportingConfig,
}

impl ReportGenerator {
    pub fn new(config: ReportingConfig) -> Self {
        Self { config }
    }

    pub fn file_name(job_id: u64, format: OutputFormat) -> String {
        let ext = match format {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        };
        format!("vx_recon_job_{}_findings.{}", job_id, ext)
    }

    pub async fn write(&self, job_id: u64, findings: &[Finding], format: OutputFormat) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to create output directory: {}", e)))?;

        let path = self.config.output_dir.join(Self::file_name(job_id, format));
        debug!("Writing {} findings to {}", findings.len(), path.display());

        let content = match format {
            OutputFormat::Json => to_json(findings)?,
            OutputFormat::Csv => to_csv(findings)?,
        };
        fs::write(&path, content)
            .await
            .map_err(|e| ScanError::Reporting(format!("Failed to write report: {}", e)))?;

        info!("Report written to {}", path.display());
        Ok(path)
    }
}
