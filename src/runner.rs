use crate::config::ScannerConfig;
use crate::utils::url::normalize_base;
use crate::{Result, ScanError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

pub const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// Send a target bound to the host loopback to an alias the containerized
/// scanner can reach. A missing scheme defaults to http; port, path and
/// query are kept as given. Any other target, or one that does not parse,
/// is returned untouched.
pub fn rewrite_loopback(target: &str, alias: &str) -> String {
    let normalized = normalize_base(target);
    let mut url = match Url::parse(&normalized) {
        Ok(url) => url,
        Err(_) => return target.to_string(),
    };
    let is_loopback = url
        .host_str()
        .map(|h| LOOPBACK_HOSTS.contains(&h.to_lowercase().as_str()))
        .unwrap_or(false);
    if !is_loopback {
        return target.to_string();
    }

    if let Err(e) = url.set_host(Some(alias)) {
        warn!("Could not rewrite loopback target {}: {}", target, e);
        return target.to_string();
    }

    // Url always renders a path; drop the "/" it adds to a bare authority.
    let mut rewritten = url.to_string();
    let had_path = normalized
        .split_once("://")
        .map_or(false, |(_, rest)| rest.contains(['/', '?', '#']));
    if !had_path && rewritten.ends_with('/') {
        rewritten.pop();
    }
    rewritten
}

lazy_static! {
    static ref PERCENT_MARKER: Regex =
        Regex::new(r"(?i)\(~\s*(\d+)\s*%\s*complete").expect("progress marker pattern is valid");
}

/// Turns the scanner's output stream into job progress between 10 and 80.
///
/// `(~N% complete)` markers map to `clamp(N, 12, 80)`; without markers every
/// 30th line nudges progress up by one so long silent stretches still move.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    last: u8,
    silent_lines: u64,
}

impl ProgressEstimator {
    pub const START: u8 = 10;
    pub const MARKER_FLOOR: u8 = 12;
    pub const CEILING: u8 = 80;
    pub const TRICKLE_EVERY: u64 = 30;

    pub fn new() -> Self {
        Self {
            last: Self::START,
            silent_lines: 0,
        }
    }

    pub fn current(&self) -> u8 {
        self.last
    }

    /// Feed one output line; returns the new progress when it moved.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        match parse_percent(line) {
            Some(pct) => {
                let backend = pct.clamp(Self::MARKER_FLOOR as u32, Self::CEILING as u32) as u8;
                if backend > self.last {
                    self.last = backend;
                    Some(backend)
                } else {
                    None
                }
            }
            None => {
                self.silent_lines += 1;
                if self.silent_lines % Self::TRICKLE_EVERY == 0 && self.last < Self::CEILING {
                    self.last += 1;
                    Some(self.last)
                } else {
                    None
                }
            }
        }
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_percent(line: &str) -> Option<u32> {
    PERCENT_MARKER
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Receives the scanner's live output.
#[async_trait]
pub trait OutputSink: Send {
    async fn on_line(&mut self, line: &str);
    async fn on_progress(&mut self, progress: u8);
}

/// Where and how the scanner runs. Image management is opaque to the
/// pipeline: `ensure_image` either makes it available or fails terminally.
#[async_trait]
pub trait ScannerRuntime: Send + Sync {
    fn launcher(&self) -> &str;
    fn image(&self) -> &str;
    async fn ensure_image(&self) -> Result<()>;
    fn command(&self, target: &str, user_agent: &str) -> Command;
}

pub struct DockerRuntime {
    launcher: String,
    image: String,
}

impl DockerRuntime {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            launcher: config.launcher.clone(),
            image: config.image.clone(),
        }
    }

    fn missing_launcher(&self, e: std::io::Error) -> ScanError {
        if e.kind() == ErrorKind::NotFound {
            ScanError::LauncherMissing(self.launcher.clone())
        } else {
            ScanError::Io(e)
        }
    }
}

#[async_trait]
impl ScannerRuntime for DockerRuntime {
    fn launcher(&self) -> &str {
        &self.launcher
    }

    fn image(&self) -> &str {
        &self.image
    }

    /// `image inspect`, and a single `pull` when the image is not local.
    async fn ensure_image(&self) -> Result<()> {
        let present = Command::new(&self.launcher)
            .args(["image", "inspect", self.image.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.missing_launcher(e))?;
        if present.success() {
            return Ok(());
        }

        info!("Image {} not present locally, pulling", self.image);
        let pull = Command::new(&self.launcher)
            .args(["pull", self.image.as_str()])
            .output()
            .await
            .map_err(|e| self.missing_launcher(e))?;
        if pull.status.success() {
            Ok(())
        } else {
            Err(ScanError::ImageUnavailable {
                image: self.image.clone(),
                detail: String::from_utf8_lossy(&pull.stderr).trim().to_string(),
            })
        }
    }

    fn command(&self, target: &str, user_agent: &str) -> Command {
        let mut cmd = Command::new(&self.launcher);
        cmd.args(["run", "--rm", self.image.as_str()])
            .args(["-h", target])
            .arg("-nointeractive")
            .args(["-useragent", user_agent]);
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Process exit code; -1 when terminated by a signal
    pub exit_code: i32,
    pub lines: Vec<String>,
    pub progress: u8,
}

impl ScanOutcome {
    /// 0 is a clean run, 1 means the scan ran and reported advisories.
    pub fn succeeded(&self) -> bool {
        matches!(self.exit_code, 0 | 1)
    }
}

pub struct ScanProcessRunner {
    runtime: Arc<dyn ScannerRuntime>,
    host_alias: String,
    job_tag_prefix: String,
}

impl ScanProcessRunner {
    pub fn new(runtime: Arc<dyn ScannerRuntime>, config: &ScannerConfig) -> Self {
        Self {
            runtime,
            host_alias: config.host_alias.clone(),
            job_tag_prefix: config.job_tag_prefix.clone(),
        }
    }

    pub fn user_agent(&self, job_id: u64) -> String {
        format!("{}/{}", self.job_tag_prefix, job_id)
    }

    /// Run the scanner to completion, streaming stdout and stderr line by
    /// line into `sink` and collecting every line for the parser.
    pub async fn run(&self, job_id: u64, target_url: &str, sink: &mut dyn OutputSink) -> Result<ScanOutcome> {
        self.runtime.ensure_image().await?;

        let target = rewrite_loopback(target_url, &self.host_alias);
        let mut command = self.runtime.command(&target, &self.user_agent(job_id));
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Launching scanner for job {} against {}", job_id, target);
        let mut child = command.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ScanError::LauncherMissing(self.runtime.launcher().to_string())
            } else {
                ScanError::Process(format!("Failed to start scanner: {}", e))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScanError::Process("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScanError::Process("stderr was not captured".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let readers = [forward_lines(stdout, tx.clone()), forward_lines(stderr, tx)];

        let mut estimator = ProgressEstimator::new();
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            sink.on_line(&line).await;
            if let Some(progress) = estimator.observe(&line) {
                sink.on_progress(progress).await;
            }
            lines.push(line);
        }

        for reader in readers {
            if let Err(e) = reader.await {
                warn!("Output reader for job {} ended abnormally: {}", job_id, e);
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        debug!("Scanner for job {} exited with {} after {} lines", job_id, exit_code, lines.len());

        Ok(ScanOutcome {
            exit_code,
            lines,
            progress: estimator.current(),
        })
    }
}

/// Read `reader` to EOF, sending each line without its terminator. Invalid
/// UTF-8 is replaced rather than ending the stream.
fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Output stream closed: {}", e);
                    break;
                }
            }
        }
    })
}
