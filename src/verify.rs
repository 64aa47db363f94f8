use crate::config::Config;
use crate::probe::{self, ProbeOutcome};
use crate::sensitive;
use crate::types::NewFinding;
use crate::utils::url::{join_path, normalize_base};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;

lazy_static! {
    static ref PATH_PATTERN: Regex = Regex::new(r"(/[\w\-./%~]+)").expect("path pattern is valid");
}

/// First filesystem-style path mentioned in an advisory title.
pub fn extract_path(title: &str) -> Option<String> {
    PATH_PATTERN.find(title).map(|m| m.as_str().to_string())
}

/// Re-checks each parsed advisory against the live target.
///
/// Requests are issued strictly one after another, with the configured delay
/// between them. Once a path has produced a verified finding, later findings
/// that verify for the same path are dropped.
pub struct VerificationProbe {
    client: Option<Client>,
    delay: Duration,
}

impl VerificationProbe {
    pub fn new(config: &Config) -> Self {
        let client = match probe::build_client(config) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Verification disabled, HTTP client unavailable: {}", e);
                None
            }
        };

        Self {
            client,
            delay: config.request_delay(),
        }
    }

    pub fn with_client(client: Client, delay: Duration) -> Self {
        Self {
            client: Some(client),
            delay,
        }
    }

    pub async fn verify(&self, base_url: &str, findings: Vec<NewFinding>) -> Vec<NewFinding> {
        let client = match &self.client {
            Some(client) => client,
            None => return findings.into_iter().map(mark_unverified).collect(),
        };

        let base = normalize_base(base_url);
        let mut out = Vec::with_capacity(findings.len());
        let mut verified_paths = HashSet::new();

        for mut finding in findings {
            let path = match extract_path(&finding.title) {
                Some(path) => path,
                None => {
                    finding.evidence.verified = false;
                    finding.evidence.path = None;
                    finding.evidence.status = None;
                    finding.evidence.content_length = None;
                    finding.evidence.note = Some("no path extracted; verification skipped".to_string());
                    out.push(finding);
                    continue;
                }
            };

            let outcome = match join_path(&base, &path) {
                Ok(url) => probe::probe(client, url.as_str()).await,
                Err(e) => ProbeOutcome {
                    error: Some(e.to_string()),
                    ..ProbeOutcome::default()
                },
            };
            probe::throttle(self.delay).await;

            let verified = outcome.is_verified();
            if verified && !verified_paths.insert(path.clone()) {
                continue;
            }

            finding.severity = sensitive::escalate(finding.severity, Some(&path));
            finding.evidence.verified = verified;
            finding.evidence.path = Some(path);
            finding.evidence.status = outcome.status;
            finding.evidence.content_length = outcome.content_length;
            finding.evidence.error = outcome.error;
            out.push(finding);
        }

        info!(
            "Verified {}/{} findings against {}",
            out.iter().filter(|f| f.evidence.verified).count(),
            out.len(),
            base
        );
        out
    }
}

fn mark_unverified(mut finding: NewFinding) -> NewFinding {
    finding.evidence.verified = false;
    finding
}
