use crate::types::{Finding, Job, JobStatus, JobUpdate, LogTail, NewFinding, Target};
use crate::utils::time::now_utc;
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

/// Persistence boundary for targets, jobs and findings.
///
/// Every job update is a single read-modify-write. Only the task that owns a
/// running job writes to it, so implementations need no cross-job locking.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_target(&self, name: &str, base_url: &str) -> Result<Target>;
    async fn target(&self, id: u64) -> Result<Option<Target>>;
    async fn targets(&self) -> Result<Vec<Target>>;
    /// Remove a target together with its jobs and their findings. Refused
    /// while any of its jobs is still queued or running.
    async fn delete_target(&self, id: u64) -> Result<()>;
    async fn create_job(&self, target_id: u64, initial_log: &str) -> Result<Job>;
    async fn job(&self, id: u64) -> Result<Option<Job>>;
    async fn update_job(&self, id: u64, update: JobUpdate) -> Result<Job>;
    async fn latest_job_for_target(&self, target_id: u64) -> Result<Option<Job>>;
    async fn insert_findings(&self, job_id: u64, findings: Vec<NewFinding>) -> Result<Vec<Finding>>;
    async fn findings(&self, job_id: u64) -> Result<Vec<Finding>>;
}

#[derive(Default)]
struct Tables {
    targets: BTreeMap<u64, Target>,
    jobs: BTreeMap<u64, Job>,
    findings: BTreeMap<u64, Finding>,
    next_target: u64,
    next_job: u64,
    next_finding: u64,
}

impl Tables {
    fn next_id(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }
}

/// In-process store. Locks are taken and released inside each call and are
/// never held across an await.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_target(&self, name: &str, base_url: &str) -> Result<Target> {
        let mut tables = self.tables.write();
        let id = Tables::next_id(&mut tables.next_target);
        let target = Target {
            id,
            name: name.to_string(),
            base_url: base_url.to_string(),
            created_at: now_utc(),
        };
        tables.targets.insert(id, target.clone());
        Ok(target)
    }

    async fn target(&self, id: u64) -> Result<Option<Target>> {
        Ok(self.tables.read().targets.get(&id).cloned())
    }

    async fn targets(&self) -> Result<Vec<Target>> {
        Ok(self.tables.read().targets.values().cloned().collect())
    }

    async fn delete_target(&self, id: u64) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.targets.contains_key(&id) {
            return Err(ScanError::TargetNotFound(id));
        }
        if let Some(active) = tables
            .jobs
            .values()
            .find(|job| job.target_id == id && !job.status.is_terminal())
        {
            return Err(ScanError::TargetBusy { target: id, job: active.id });
        }
        tables.targets.remove(&id);

        let jobs: HashSet<u64> = tables
            .jobs
            .values()
            .filter(|job| job.target_id == id)
            .map(|job| job.id)
            .collect();
        tables.jobs.retain(|job_id, _| !jobs.contains(job_id));
        let before = tables.findings.len();
        tables.findings.retain(|_, f| !jobs.contains(&f.job_id));
        debug!(
            "Deleted target {} with {} jobs and {} findings",
            id,
            jobs.len(),
            before - tables.findings.len()
        );
        Ok(())
    }

    async fn create_job(&self, target_id: u64, initial_log: &str) -> Result<Job> {
        let mut tables = self.tables.write();
        if !tables.targets.contains_key(&target_id) {
            return Err(ScanError::TargetNotFound(target_id));
        }
        let id = Tables::next_id(&mut tables.next_job);
        let job = Job {
            id,
            target_id,
            status: JobStatus::Queued,
            progress: 0,
            started_at: None,
            finished_at: None,
            log_tail: LogTail::new(initial_log),
        };
        tables.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn job(&self, id: u64) -> Result<Option<Job>> {
        Ok(self.tables.read().jobs.get(&id).cloned())
    }

    async fn update_job(&self, id: u64, update: JobUpdate) -> Result<Job> {
        let mut tables = self.tables.write();
        let job = tables.jobs.get_mut(&id).ok_or(ScanError::JobNotFound(id))?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn latest_job_for_target(&self, target_id: u64) -> Result<Option<Job>> {
        let tables = self.tables.read();
        // Most recently started first, never-started jobs last, then highest id.
        let latest = tables
            .jobs
            .values()
            .filter(|job| job.target_id == target_id)
            .max_by_key(|job| (job.started_at.is_some(), job.started_at, job.id))
            .cloned();
        Ok(latest)
    }

    async fn insert_findings(&self, job_id: u64, findings: Vec<NewFinding>) -> Result<Vec<Finding>> {
        let mut tables = self.tables.write();
        if !tables.jobs.contains_key(&job_id) {
            return Err(ScanError::JobNotFound(job_id));
        }

        let mut rows = Vec::with_capacity(findings.len());
        for finding in findings {
            let id = Tables::next_id(&mut tables.next_finding);
            let row = Finding::from_new(id, job_id, finding);
            tables.findings.insert(id, row.clone());
            rows.push(row);
        }
        debug!("Stored {} findings for job {}", rows.len(), job_id);
        Ok(rows)
    }

    async fn findings(&self, job_id: u64) -> Result<Vec<Finding>> {
        Ok(self
            .tables
            .read()
            .findings
            .values()
            .filter(|f| f.job_id == job_id)
            .cloned()
            .collect())
    }
}
