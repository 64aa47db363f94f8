use async_trait::async_trait;
use mockito::{Server, ServerGuard};
use std::sync::Arc;
use tokio::process::Command;
use vxrecon::{
    config::{Config, ScannerConfig},
    crawler::{LinkExtractor, ScraperLinkExtractor},
    job::{JobController, ScanService, VerifiedFilter},
    runner::{rewrite_loopback, OutputSink, ProgressEstimator, ScanProcessRunner, ScannerRuntime},
    store::{JobStore, MemoryStore},
    types::{Category, Finding, Job, JobStatus, JobUpdate, NewFinding, Severity, Target},
    Result, ScanError,
};

const IMAGE: &str = "test/nikto:latest";

/// Runs a shell script in place of the containerized scanner. The script
/// sees the target as `$1` and the user agent as `$2`.
struct ScriptRuntime {
    launcher: String,
    script: String,
    pull_fails: bool,
}

impl ScriptRuntime {
    fn new(script: &str) -> Self {
        Self {
            launcher: "/bin/sh".to_string(),
            script: script.to_string(),
            pull_fails: false,
        }
    }
}

#[async_trait]
impl ScannerRuntime for ScriptRuntime {
    fn launcher(&self) -> &str {
        &self.launcher
    }

    fn image(&self) -> &str {
        IMAGE
    }

    async fn ensure_image(&self) -> Result<()> {
        if self.script == "panic" {
            panic!("scanner runtime exploded");
        }
        if self.pull_fails {
            Err(ScanError::ImageUnavailable {
                image: IMAGE.to_string(),
                detail: "pull access denied".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn command(&self, target: &str, user_agent: &str) -> Command {
        let mut cmd = Command::new(&self.launcher);
        cmd.arg("-c").arg(&self.script).arg("scanner").arg(target).arg(user_agent);
        cmd
    }
}

#[derive(Default)]
struct RecordingSink {
    lines: Vec<String>,
    progress: Vec<u8>,
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn on_line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    async fn on_progress(&mut self, progress: u8) {
        self.progress.push(progress);
    }
}

/// Delegates to a `MemoryStore` and remembers every progress value written.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    progress: parking_lot::Mutex<Vec<i32>>,
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create_target(&self, name: &str, base_url: &str) -> Result<Target> {
        self.inner.create_target(name, base_url).await
    }

    async fn target(&self, id: u64) -> Result<Option<Target>> {
        self.inner.target(id).await
    }

    async fn targets(&self) -> Result<Vec<Target>> {
        self.inner.targets().await
    }

    async fn delete_target(&self, id: u64) -> Result<()> {
        self.inner.delete_target(id).await
    }

    async fn create_job(&self, target_id: u64, initial_log: &str) -> Result<Job> {
        self.inner.create_job(target_id, initial_log).await
    }

    async fn job(&self, id: u64) -> Result<Option<Job>> {
        self.inner.job(id).await
    }

    async fn update_job(&self, id: u64, update: JobUpdate) -> Result<Job> {
        if let Some(progress) = update.progress {
            self.progress.lock().push(progress);
        }
        self.inner.update_job(id, update).await
    }

    async fn latest_job_for_target(&self, target_id: u64) -> Result<Option<Job>> {
        self.inner.latest_job_for_target(target_id).await
    }

    async fn insert_findings(&self, job_id: u64, findings: Vec<NewFinding>) -> Result<Vec<Finding>> {
        self.inner.insert_findings(job_id, findings).await
    }

    async fn findings(&self, job_id: u64) -> Result<Vec<Finding>> {
        self.inner.findings(job_id).await
    }
}

/// Landing page carrying every audited security header
async fn hardened_site() -> (ServerGuard, mockito::Mock) {
    let mut server = Server::new_async().await;
    let root = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("x-content-type-options", "nosniff")
        .with_header("content-security-policy", "default-src 'self'")
        .with_header("referrer-policy", "no-referrer")
        .with_header("permissions-policy", "geolocation=()")
        .with_body("<html><body>nothing to see</body></html>")
        .create_async()
        .await;
    (server, root)
}

fn service(store: Arc<MemoryStore>, runtime: ScriptRuntime, crawl: bool) -> ScanService {
    let mut config = Config::default();
    config.http.timeout = 3;
    let extractor: Option<Arc<dyn LinkExtractor>> = if crawl {
        Some(Arc::new(ScraperLinkExtractor))
    } else {
        None
    };
    let controller = JobController::new(config, store.clone(), Arc::new(runtime), extractor);
    ScanService::new(store, controller)
}

async fn run_to_end(service: &ScanService, base_url: &str) -> u64 {
    let target = service.create_target("test", base_url).await.unwrap();
    let started = service.start_job(target.id).await.unwrap();
    started.task.await.unwrap();
    started.job_id
}

#[test]
fn test_progress_estimator() {
    let mut estimator = ProgressEstimator::new();
    assert_eq!(estimator.current(), 10);

    for _ in 0..29 {
        assert_eq!(estimator.observe("plain output"), None);
    }
    assert_eq!(estimator.observe("plain output"), Some(11));

    assert_eq!(estimator.observe("- STATUS: (~5% complete)"), Some(12));
    assert_eq!(estimator.observe("(~ 45 % COMPLETE, 2 minutes left)"), Some(45));
    assert_eq!(estimator.observe("(~30% complete)"), None);
    assert_eq!(estimator.observe("(~97% complete)"), Some(80));
    assert_eq!(estimator.current(), 80);

    for _ in 0..60 {
        assert_eq!(estimator.observe("plain output"), None);
    }
}

#[test]
fn test_rewrite_loopback() {
    let alias = "host.docker.internal";
    assert_eq!(
        rewrite_loopback("http://localhost:8080/app?x=1", alias),
        "http://host.docker.internal:8080/app?x=1"
    );
    assert_eq!(
        rewrite_loopback("https://127.0.0.1/", alias),
        "https://host.docker.internal/"
    );
    assert_eq!(
        rewrite_loopback("localhost:8080/app?x=1", alias),
        "http://host.docker.internal:8080/app?x=1"
    );
    assert_eq!(
        rewrite_loopback("http://localhost:8080", alias),
        "http://host.docker.internal:8080"
    );
    assert_eq!(
        rewrite_loopback("http://LOCALHOST:3000/", alias),
        "http://host.docker.internal:3000/"
    );
    assert_eq!(rewrite_loopback("http://example.com/", alias), "http://example.com/");
    assert_eq!(rewrite_loopback("example.com:8080", alias), "example.com:8080");
    assert_eq!(rewrite_loopback("::not a url::", alias), "::not a url::");
}

#[tokio::test]
async fn test_runner_streams_both_outputs() {
    let runtime = ScriptRuntime::new(
        r#"echo "target $1"; echo "agent $2"; echo "(~50% complete)"; echo "+ /admin/: Directory indexing found." 1>&2; exit 1"#,
    );
    let runner = ScanProcessRunner::new(Arc::new(runtime), &ScannerConfig::default());
    let mut sink = RecordingSink::default();

    let outcome = runner.run(7, "http://localhost:9/", &mut sink).await.unwrap();

    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.succeeded());
    assert_eq!(outcome.lines.len(), 4);
    assert_eq!(sink.lines.len(), 4);
    assert!(outcome.lines.contains(&"target http://host.docker.internal:9/".to_string()));
    assert!(outcome.lines.contains(&"agent VX_Rec0nJob/7".to_string()));
    assert!(outcome.lines.contains(&"+ /admin/: Directory indexing found.".to_string()));
    assert_eq!(sink.progress, vec![50]);
}

#[tokio::test]
async fn test_runner_missing_launcher() {
    let mut runtime = ScriptRuntime::new("exit 0");
    runtime.launcher = "/nonexistent/vxrecon-launcher".to_string();
    let runner = ScanProcessRunner::new(Arc::new(runtime), &ScannerConfig::default());

    let err = runner
        .run(1, "http://example.com", &mut RecordingSink::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::LauncherMissing(ref l) if l == "/nonexistent/vxrecon-launcher"));
}

#[tokio::test]
async fn test_clean_scan_completes_without_findings() {
    let (server, _root) = hardened_site().await;
    let store = Arc::new(MemoryStore::new());
    let service = service(
        store.clone(),
        ScriptRuntime::new(r#"echo "- Nikto v2.5.0"; echo "+ Target IP: 127.0.0.1"; exit 0"#),
        true,
    );

    let job_id = run_to_end(&service, &server.url()).await;
    let view = service.job_status(job_id).await.unwrap();

    assert_eq!(view.status, JobStatus::Complete);
    assert_eq!(view.progress, 100);
    assert!(view.started_at.is_some());
    assert!(view.finished_at.is_some());
    assert!(view.log_tail.starts_with("Queued scan.\nStarting Nikto scan...\nUsing image: test/nikto:latest\n"));
    assert!(view.log_tail.contains("+ Target IP: 127.0.0.1\n"));
    assert!(view.log_tail.ends_with("\nScan finished with exit code 0.\n"));
    assert!(service.findings(job_id, VerifiedFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_advisories_are_verified_and_summarized() {
    let (mut server, _root) = hardened_site().await;
    let _admin = server.mock("GET", "/admin/").with_status(200).create_async().await;

    let store = Arc::new(MemoryStore::new());
    let service = service(
        store.clone(),
        ScriptRuntime::new(
            r#"echo "+ /admin/: Directory indexing found."; echo "+ /backup.zip: Backup file found."; exit 1"#,
        ),
        true,
    );

    let job_id = run_to_end(&service, &server.url()).await;
    assert_eq!(service.job_status(job_id).await.unwrap().status, JobStatus::Complete);

    let all = service.findings(job_id, VerifiedFilter::All).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|f| f.category == Category::Nikto && f.job_id == job_id));

    let verified = service.findings(job_id, VerifiedFilter::VerifiedOnly).await.unwrap();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].title, "/admin/: Directory indexing found.");

    let unverified = service.findings(job_id, VerifiedFilter::UnverifiedOnly).await.unwrap();
    assert_eq!(unverified.len(), 1);
    assert_eq!(unverified[0].severity, Severity::High);

    let summary = service.summary(job_id).await.unwrap();
    assert_eq!(summary.findings_count, 2);
    assert_eq!(summary.verified_count, 1);
    assert_eq!(summary.unverified_count, 1);
    assert_eq!(summary.severity_distribution.medium, 1);
    assert_eq!(summary.severity_distribution.high, 1);
    assert_eq!(summary.target.as_deref(), Some(server.url().as_str()));
}

#[tokio::test]
async fn test_exit_125_names_image() {
    let (server, _root) = hardened_site().await;
    let service = service(Arc::new(MemoryStore::new()), ScriptRuntime::new("exit 125"), true);

    let job_id = run_to_end(&service, &server.url()).await;
    let view = service.job_status(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.progress, 100);
    assert!(view.log_tail.contains("exit 125"));
    assert!(view.log_tail.contains(IMAGE));
}

#[tokio::test]
async fn test_unexpected_exit_code_is_error() {
    let (server, _root) = hardened_site().await;
    let service = service(Arc::new(MemoryStore::new()), ScriptRuntime::new("exit 3"), true);

    let job_id = run_to_end(&service, &server.url()).await;
    let view = service.job_status(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert!(view.log_tail.ends_with("\nNikto exited with code 3.\n"));
}

#[tokio::test]
async fn test_image_pull_failure() {
    let mut runtime = ScriptRuntime::new("exit 0");
    runtime.pull_fails = true;
    let store = Arc::new(MemoryStore::new());
    let service = service(store.clone(), runtime, true);

    let job_id = run_to_end(&service, "http://127.0.0.1:1").await;
    let view = service.job_status(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.progress, 100);
    assert!(view.log_tail.contains("ERROR: Could not pull image 'test/nikto:latest'"));
    assert!(store.findings(job_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_launcher_fails_job() {
    let mut runtime = ScriptRuntime::new("exit 0");
    runtime.launcher = "/nonexistent/vxrecon-launcher".to_string();
    let service = service(Arc::new(MemoryStore::new()), runtime, true);

    let job_id = run_to_end(&service, "http://127.0.0.1:1").await;
    let view = service.job_status(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert!(view
        .log_tail
        .contains("ERROR: '/nonexistent/vxrecon-launcher' not found or not in PATH."));
}

#[tokio::test]
async fn test_pipeline_panic_marks_job_error() {
    let service = service(Arc::new(MemoryStore::new()), ScriptRuntime::new("panic"), false);

    let job_id = run_to_end(&service, "http://127.0.0.1:1").await;
    let view = service.job_status(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.progress, 100);
    assert!(view.finished_at.is_some());
    assert!(view.log_tail.contains("UNEXPECTED ERROR: pipeline task terminated"));
}

#[tokio::test]
async fn test_sub_pass_failures_do_not_abort() {
    let service = service(Arc::new(MemoryStore::new()), ScriptRuntime::new("exit 0"), false);

    let job_id = run_to_end(&service, "http://127.0.0.1:1").await;
    let view = service.job_status(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Complete);

    let findings = service.findings(job_id, VerifiedFilter::All).await.unwrap();
    let titles: Vec<_> = findings.iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles.len(), 2);
    assert!(titles[0].starts_with("Header audit failed: "));
    assert_eq!(titles[1], "Crawler disabled (HTML parsing unavailable)");
}

#[tokio::test]
async fn test_start_job_returns_before_scan_finishes() {
    let (server, _root) = hardened_site().await;
    let service = service(Arc::new(MemoryStore::new()), ScriptRuntime::new("sleep 1; exit 0"), false);

    let target = service.create_target("", &server.url()).await.unwrap();
    assert_eq!(target.name, "127.0.0.1");

    let started = service.start_job(target.id).await.unwrap();
    let early = service.job_status(started.job_id).await.unwrap();
    assert!(!early.status.is_terminal());

    started.task.await.unwrap();
    let latest = service.latest_job_for_target(target.id).await.unwrap().unwrap();
    assert_eq!(latest.id, started.job_id);
    assert_eq!(latest.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_unknown_ids() {
    let service = service(Arc::new(MemoryStore::new()), ScriptRuntime::new("exit 0"), false);

    assert!(matches!(service.start_job(42).await, Err(ScanError::TargetNotFound(42))));
    assert!(matches!(service.job_status(9).await, Err(ScanError::JobNotFound(9))));
    assert!(service.latest_job_for_target(42).await.unwrap().is_none());
    assert!(matches!(
        service.create_target("bad", "http://").await,
        Err(ScanError::InvalidTarget(_))
    ));
}

#[tokio::test]
async fn test_store_latest_prefers_started_jobs() {
    let store = MemoryStore::new();
    let target = store.create_target("t", "http://example.com").await.unwrap();
    let first = store.create_job(target.id, "Queued scan.\n").await.unwrap();
    let _second = store.create_job(target.id, "Queued scan.\n").await.unwrap();

    store
        .update_job(
            first.id,
            JobUpdate::new()
                .status(JobStatus::Running)
                .started(chrono::Utc::now()),
        )
        .await
        .unwrap();

    let latest = store.latest_job_for_target(target.id).await.unwrap().unwrap();
    assert_eq!(latest.id, first.id);
    assert!(matches!(
        store.create_job(99, "").await,
        Err(ScanError::TargetNotFound(99))
    ));
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let (server, _root) = hardened_site().await;
    let store = Arc::new(RecordingStore::default());
    let runtime = ScriptRuntime::new(r#"echo "(~40% complete)"; echo "(~20% complete)"; echo "(~70% complete)"; exit 0"#);
    let mut config = Config::default();
    config.http.timeout = 3;
    let controller = JobController::new(config, store.clone(), Arc::new(runtime), None);

    let target = store.create_target("t", &server.url()).await.unwrap();
    let job = store.create_job(target.id, "Queued scan.\n").await.unwrap();
    let status = controller.run_scan(job.id, &server.url()).await.unwrap();
    assert_eq!(status, JobStatus::Complete);

    let writes = store.progress.lock().clone();
    assert!(writes.windows(2).all(|w| w[0] <= w[1]), "{:?}", writes);
    assert_eq!(writes, vec![10, 40, 70, 85, 92, 96, 100]);
    assert_eq!(store.job(job.id).await.unwrap().unwrap().progress, 100);
}

#[tokio::test]
async fn test_delete_target_removes_jobs_and_findings() {
    let store = Arc::new(MemoryStore::new());
    let service = service(
        store.clone(),
        ScriptRuntime::new(r#"echo "+ /backup.zip: Backup file found."; exit 0"#),
        false,
    );

    let (server, _root) = hardened_site().await;
    let keep = service.create_target("keep", "http://example.com").await.unwrap();
    let job_id = run_to_end(&service, &server.url()).await;
    let doomed = store.job(job_id).await.unwrap().unwrap().target_id;
    assert!(!store.findings(job_id).await.unwrap().is_empty());
    assert_eq!(service.targets().await.unwrap().len(), 2);

    service.delete_target(doomed).await.unwrap();

    assert!(store.target(doomed).await.unwrap().is_none());
    assert!(store.job(job_id).await.unwrap().is_none());
    assert!(store.findings(job_id).await.unwrap().is_empty());
    let remaining = service.targets().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep.id);
    assert!(matches!(
        service.delete_target(doomed).await,
        Err(ScanError::TargetNotFound(id)) if id == doomed
    ));
}

#[tokio::test]
async fn test_delete_target_refused_while_job_active() {
    let store = MemoryStore::new();
    let target = store.create_target("t", "http://example.com").await.unwrap();
    let job = store.create_job(target.id, "Queued scan.\n").await.unwrap();

    assert!(matches!(
        store.delete_target(target.id).await,
        Err(ScanError::TargetBusy { target: t, job: j }) if t == target.id && j == job.id
    ));
    assert!(store.target(target.id).await.unwrap().is_some());

    store
        .update_job(job.id, JobUpdate::new().status(JobStatus::Error))
        .await
        .unwrap();
    store.delete_target(target.id).await.unwrap();
    assert!(store.job(job.id).await.unwrap().is_none());
}
