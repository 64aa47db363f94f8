use crate::config::Config;
use crate::crawler::{LinkExtractor, PathCrawler, ScraperLinkExtractor};
use crate::headers::HeaderAuditor;
use crate::parser;
use crate::reporting::Summary;
use crate::runner::{DockerRuntime, OutputSink, ScanOutcome, ScanProcessRunner, ScannerRuntime};
use crate::store::JobStore;
use crate::types::{Finding, Job, JobStatus, JobUpdate, NewFinding, Target};
use crate::utils::time::now_utc;
use crate::utils::url::{normalize_base, parse};
use crate::verify::VerificationProbe;
use crate::{Result, ScanError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Progress checkpoints after the scanner exits
pub const PROCESS_DONE: u8 = 85;
pub const VERIFIED: u8 = 92;
pub const PERSISTED: u8 = 96;
pub const FINISHED: u8 = 100;

/// Write access to one job for the duration of a run. Tracks the last
/// progress sent so writes stay non-decreasing.
pub struct JobHandle {
    store: Arc<dyn JobStore>,
    job_id: u64,
    progress: u8,
}

impl JobHandle {
    pub fn new(store: Arc<dyn JobStore>, job_id: u64) -> Self {
        Self {
            store,
            job_id,
            progress: 0,
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    async fn write(&self, update: JobUpdate) {
        if let Err(e) = self.store.update_job(self.job_id, update).await {
            warn!("Failed to update job {}: {}", self.job_id, e);
        }
    }

    pub async fn log(&self, text: &str) {
        self.write(JobUpdate::new().log(text)).await;
    }

    /// Raise progress to `floor` if it is still below it.
    pub async fn advance(&mut self, floor: u8) {
        if floor > self.progress {
            self.progress = floor;
            self.write(JobUpdate::new().progress(floor as i32)).await;
        }
    }

    async fn start(&mut self, header: &str) -> Result<()> {
        self.store
            .update_job(
                self.job_id,
                JobUpdate::new()
                    .status(JobStatus::Running)
                    .started(now_utc())
                    .progress(crate::runner::ProgressEstimator::START as i32)
                    .log(header),
            )
            .await?;
        self.progress = crate::runner::ProgressEstimator::START;
        Ok(())
    }

    /// Terminal write: status, progress 100, `finished_at`, closing log line.
    pub async fn finish(&mut self, status: JobStatus, message: &str) -> Result<JobStatus> {
        self.store
            .update_job(
                self.job_id,
                JobUpdate::new()
                    .status(status)
                    .progress(FINISHED as i32)
                    .finished(now_utc())
                    .log(message),
            )
            .await?;
        self.progress = FINISHED;
        Ok(status)
    }
}

#[async_trait]
impl OutputSink for JobHandle {
    async fn on_line(&mut self, line: &str) {
        self.log(&format!("{}\n", line)).await;
    }

    async fn on_progress(&mut self, progress: u8) {
        self.advance(progress).await;
    }
}

/// Runs the scan pipeline for one job and owns its state transitions.
pub struct JobController {
    config: Config,
    store: Arc<dyn JobStore>,
    runtime: Arc<dyn ScannerRuntime>,
    extractor: Option<Arc<dyn LinkExtractor>>,
}

impl JobController {
    pub fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        runtime: Arc<dyn ScannerRuntime>,
        extractor: Option<Arc<dyn LinkExtractor>>,
    ) -> Self {
        Self {
            config,
            store,
            runtime,
            extractor,
        }
    }

    /// Docker runtime, and HTML crawling when `crawler.enabled` is set.
    pub fn from_config(config: Config, store: Arc<dyn JobStore>) -> Self {
        let runtime: Arc<dyn ScannerRuntime> = Arc::new(DockerRuntime::new(&config.scanner));
        let extractor: Option<Arc<dyn LinkExtractor>> = if config.crawler.enabled {
            Some(Arc::new(ScraperLinkExtractor))
        } else {
            None
        };
        Self::new(config, store, runtime, extractor)
    }

    /// Run the whole pipeline for `job_id` and return the terminal status.
    ///
    /// Only fails when the job does not exist; every other failure is
    /// recorded on the job, which always ends complete or error.
    pub async fn run_scan(&self, job_id: u64, target_url: &str) -> Result<JobStatus> {
        if self.store.job(job_id).await?.is_none() {
            return Err(ScanError::JobNotFound(job_id));
        }

        let mut handle = JobHandle::new(self.store.clone(), job_id);
        let result = self.execute(&mut handle, job_id, target_url).await;
        match result {
            Ok(status) => {
                info!("Job {} finished: {}", job_id, status);
                Ok(status)
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                handle
                    .finish(JobStatus::Error, &format!("\nUNEXPECTED ERROR: {}\n", e))
                    .await
            }
        }
    }

    async fn execute(&self, handle: &mut JobHandle, job_id: u64, target_url: &str) -> Result<JobStatus> {
        let image = self.runtime.image().to_string();
        handle
            .start(&format!("Starting Nikto scan...\nUsing image: {}\n", image))
            .await?;

        let runner = ScanProcessRunner::new(self.runtime.clone(), &self.config.scanner);
        let outcome = match runner.run(job_id, target_url, &mut *handle).await {
            Ok(outcome) => outcome,
            Err(ScanError::ImageUnavailable { image, detail }) => {
                warn!("Image pull failed for job {}: {}", job_id, detail);
                let message = format!(
                    "ERROR: Could not pull image '{}'. If you're behind a proxy or need auth, \
                     log in to the registry and try again.\n",
                    image
                );
                return handle.finish(JobStatus::Error, &message).await;
            }
            Err(ScanError::LauncherMissing(launcher)) => {
                let message = format!("ERROR: '{}' not found or not in PATH.\n", launcher);
                return handle.finish(JobStatus::Error, &message).await;
            }
            Err(e) => return Err(e),
        };
        handle.advance(PROCESS_DONE).await;

        let findings = self.analyze(handle, target_url, &outcome).await;
        match self.store.insert_findings(job_id, findings).await {
            Ok(rows) => {
                info!("Persisted {} findings for job {}", rows.len(), job_id);
                handle.advance(PERSISTED).await;
            }
            Err(e) => error!("Failed to store findings for job {}: {}", job_id, e),
        }

        self.finalize(handle, &image, outcome.exit_code).await
    }

    /// Parse + verify, header audit, crawl. Sub-pass failures become
    /// placeholder findings and never abort the job.
    async fn analyze(&self, handle: &mut JobHandle, target_url: &str, outcome: &ScanOutcome) -> Vec<NewFinding> {
        let parsed = parser::parse_findings(&outcome.lines);
        let verifier = VerificationProbe::new(&self.config);
        let mut findings = verifier.verify(target_url, parsed).await;
        handle.advance(VERIFIED).await;

        match HeaderAuditor::new(&self.config) {
            Ok(auditor) => match auditor.audit(target_url).await {
                Ok(found) => findings.extend(found),
                Err(e) => {
                    warn!("Header audit failed: {}", e);
                    findings.push(HeaderAuditor::failure_finding(&e));
                }
            },
            Err(e) => findings.push(HeaderAuditor::failure_finding(&e)),
        }

        let crawl = match PathCrawler::new(&self.config, self.extractor.clone()) {
            Ok(crawler) => crawler.crawl(target_url).await,
            Err(e) => Err(e),
        };
        match crawl {
            Ok(report) => findings.extend(report.findings),
            Err(e) => {
                warn!("Crawler failed: {}", e);
                findings.push(PathCrawler::failure_finding(&e));
            }
        }

        findings
    }

    async fn finalize(&self, handle: &mut JobHandle, image: &str, exit_code: i32) -> Result<JobStatus> {
        match exit_code {
            0 | 1 => {
                handle
                    .finish(
                        JobStatus::Complete,
                        &format!("\nScan finished with exit code {}.\n", exit_code),
                    )
                    .await
            }
            125 => {
                let message = format!(
                    "\nContainer runtime failed to run the image (exit 125). \
                     Ensure '{}' exists locally and registry login succeeded.\n",
                    image
                );
                handle.finish(JobStatus::Error, &message).await
            }
            code => {
                handle
                    .finish(JobStatus::Error, &format!("\nNikto exited with code {}.\n", code))
                    .await
            }
        }
    }

    /// Force a job that is not yet terminal into the error state.
    pub async fn abort_job(&self, job_id: u64, reason: &str) -> Result<()> {
        match self.store.job(job_id).await? {
            Some(job) if !job.status.is_terminal() => {
                let mut handle = JobHandle::new(self.store.clone(), job_id);
                handle
                    .finish(JobStatus::Error, &format!("\nUNEXPECTED ERROR: {}\n", reason))
                    .await?;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ScanError::JobNotFound(job_id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifiedFilter {
    #[default]
    All,
    VerifiedOnly,
    UnverifiedOnly,
}

impl VerifiedFilter {
    /// `true`/`1`/`yes` and `false`/`0`/`no`; anything else means all.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("true" | "1" | "yes") => VerifiedFilter::VerifiedOnly,
            Some("false" | "0" | "no") => VerifiedFilter::UnverifiedOnly,
            _ => VerifiedFilter::All,
        }
    }

    pub fn matches(&self, finding: &Finding) -> bool {
        match self {
            VerifiedFilter::All => true,
            VerifiedFilter::VerifiedOnly => finding.evidence.verified,
            VerifiedFilter::UnverifiedOnly => !finding.evidence.verified,
        }
    }
}

/// Snapshot returned to pollers
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub id: u64,
    pub target_id: u64,
    pub status: JobStatus,
    pub progress: u8,
    pub log_tail: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            target_id: job.target_id,
            status: job.status,
            progress: job.progress,
            log_tail: job.log_tail.as_str().to_string(),
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

pub struct StartedJob {
    pub job_id: u64,
    /// Detached pipeline task; dropping it does not stop the scan
    pub task: JoinHandle<()>,
}

/// Request-side entry point: creates jobs and hands each one to its own
/// background task without waiting for it.
pub struct ScanService {
    store: Arc<dyn JobStore>,
    controller: Arc<JobController>,
}

impl ScanService {
    pub fn new(store: Arc<dyn JobStore>, controller: JobController) -> Self {
        Self {
            store,
            controller: Arc::new(controller),
        }
    }

    pub fn from_config(config: Config, store: Arc<dyn JobStore>) -> Self {
        let controller = JobController::from_config(config, store.clone());
        Self::new(store, controller)
    }

    /// Register a target. A missing scheme defaults to http; anything that
    /// still fails to parse as a URL is rejected.
    pub async fn create_target(&self, name: &str, base_url: &str) -> Result<Target> {
        let base = normalize_base(base_url);
        let url = parse(&base)?;
        if url.host_str().is_none() {
            return Err(ScanError::InvalidTarget(base));
        }
        let name = match name.trim() {
            "" => url.host_str().unwrap_or(&base).to_string(),
            n => n.to_string(),
        };
        self.store.create_target(&name, &base).await
    }

    pub async fn targets(&self) -> Result<Vec<Target>> {
        self.store.targets().await
    }

    pub async fn delete_target(&self, target_id: u64) -> Result<()> {
        self.store.delete_target(target_id).await?;
        info!("Deleted target {}", target_id);
        Ok(())
    }

    /// Queue a scan for the target and spawn its pipeline. The caller must
    /// not start the same job twice.
    pub async fn start_job(&self, target_id: u64) -> Result<StartedJob> {
        let target = self
            .store
            .target(target_id)
            .await?
            .ok_or(ScanError::TargetNotFound(target_id))?;
        let job = self.store.create_job(target.id, "Queued scan.\n").await?;
        let job_id = job.id;
        info!("Queued job {} for target {} ({})", job_id, target.id, target.base_url);

        let controller = self.controller.clone();
        let base_url = target.base_url;
        let task = tokio::spawn(async move {
            let pipeline = {
                let controller = controller.clone();
                tokio::spawn(async move { controller.run_scan(job_id, &base_url).await })
            };
            match pipeline.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Job {} could not run: {}", job_id, e),
                Err(e) => {
                    error!("Pipeline task for job {} terminated: {}", job_id, e);
                    if let Err(e) = controller.abort_job(job_id, "pipeline task terminated").await {
                        error!("Could not mark job {} as failed: {}", job_id, e);
                    }
                }
            }
        });

        Ok(StartedJob { job_id, task })
    }

    pub async fn job_status(&self, job_id: u64) -> Result<JobStatusView> {
        self.store
            .job(job_id)
            .await?
            .map(JobStatusView::from)
            .ok_or(ScanError::JobNotFound(job_id))
    }

    pub async fn latest_job_for_target(&self, target_id: u64) -> Result<Option<JobStatusView>> {
        Ok(self
            .store
            .latest_job_for_target(target_id)
            .await?
            .map(JobStatusView::from))
    }

    pub async fn findings(&self, job_id: u64, filter: VerifiedFilter) -> Result<Vec<Finding>> {
        Ok(self
            .store
            .findings(job_id)
            .await?
            .into_iter()
            .filter(|f| filter.matches(f))
            .collect())
    }

    pub async fn summary(&self, job_id: u64) -> Result<Summary> {
        let job = self.store.job(job_id).await?.ok_or(ScanError::JobNotFound(job_id))?;
        let target = self.store.target(job.target_id).await?;
        let findings = self.store.findings(job_id).await?;
        Ok(Summary::from_findings(&job, target.as_ref(), &findings))
    }
}
