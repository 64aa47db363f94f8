//! Bounded same-origin crawl looking for exposed sensitive files

use crate::config::Config;
use crate::probe;
use crate::sensitive;
use crate::types::{Category, Confidence, Evidence, NewFinding, Severity};
use crate::utils::url::{normalize_base, parse, same_origin};
use crate::{Result, ScanError};
use log::{debug, info};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Pulls raw link targets out of an HTML document.
///
/// Kept synchronous so parsed documents never live across an await point.
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, html: &str) -> Vec<String>;
}

/// `href`/`src` of anchor, script, link and image elements
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperLinkExtractor;

impl LinkExtractor for ScraperLinkExtractor {
    fn extract_links(&self, html: &str) -> Vec<String> {
        let selector = match Selector::parse("a, script, link, img") {
            Ok(selector) => selector,
            Err(_) => return Vec::new(),
        };
        let document = Html::parse_document(html);
        document
            .select(&selector)
            .filter_map(|element| {
                let attrs = element.value();
                attrs.attr("href").or_else(|| attrs.attr("src"))
            })
            .map(|link| link.trim().to_string())
            .filter(|link| !link.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    pub max_pages: usize,
    pub max_depth: usize,
}

pub struct PathCrawler {
    client: Client,
    extractor: Option<Arc<dyn LinkExtractor>>,
    limits: CrawlLimits,
    delay: Duration,
}

impl PathCrawler {
    pub fn new(config: &Config, extractor: Option<Arc<dyn LinkExtractor>>) -> Result<Self> {
        Ok(Self {
            client: probe::build_client(config)?,
            extractor,
            limits: CrawlLimits {
                max_pages: config.crawler.max_pages,
                max_depth: config.crawler.max_depth,
            },
            delay: config.request_delay(),
        })
    }

    pub fn with_client(
        client: Client,
        extractor: Option<Arc<dyn LinkExtractor>>,
        limits: CrawlLimits,
        delay: Duration,
    ) -> Self {
        Self {
            client,
            extractor,
            limits,
            delay,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.extractor.is_some()
    }

    /// Breadth-first crawl from the base URL. Stops dequeuing once
    /// `max_pages` distinct URLs were visited; links are only enqueued while
    /// the current page is shallower than `max_depth`.
    pub async fn crawl(&self, base_url: &str) -> Result<CrawlReport> {
        let extractor = match &self.extractor {
            Some(extractor) => extractor,
            None => {
                return Ok(CrawlReport {
                    visited: Vec::new(),
                    findings: vec![Self::disabled_finding()],
                })
            }
        };

        let base = parse(&normalize_base(base_url)).map_err(|e| ScanError::Crawl(e.to_string()))?;
        let mut queue: VecDeque<(Url, usize)> = VecDeque::from([(base.clone(), 0)]);
        let mut seen: HashSet<String> = HashSet::new();
        let mut visited = Vec::new();
        let mut findings = Vec::new();
        // Query strings split `seen`, so findings are keyed on path instead.
        let mut reported: HashSet<(String, bool)> = HashSet::new();

        while seen.len() < self.limits.max_pages {
            let (url, depth) = match queue.pop_front() {
                Some(item) => item,
                None => break,
            };
            if !seen.insert(url.as_str().to_string()) {
                continue;
            }
            visited.push(url.to_string());

            match self.fetch(&url).await {
                Some(body) if depth < self.limits.max_depth => {
                    for link in extractor.extract_links(&body) {
                        if let Some(next) = resolve_link(&url, &link, &base) {
                            if !seen.contains(next.as_str()) {
                                queue.push_back((next, depth + 1));
                            }
                        }
                    }
                }
                Some(_) => {}
                None => debug!("Skipping expansion of {}", url),
            }

            if let Some(finding) = self.check_sensitive(&url).await {
                let key = (
                    finding.evidence.path.clone().unwrap_or_default(),
                    finding.evidence.verified,
                );
                if reported.insert(key) {
                    findings.push(finding);
                } else {
                    debug!("Sensitive path {} already reported", url.path());
                }
            }
        }

        info!(
            "Crawl of {} visited {} pages, {} sensitive paths",
            base,
            visited.len(),
            findings.len()
        );
        Ok(CrawlReport { visited, findings })
    }

    async fn fetch(&self, url: &Url) -> Option<String> {
        let body = match self.client.get(url.as_str()).send().await {
            Ok(resp) => resp.text().await.ok(),
            Err(e) => {
                debug!("Fetch {} failed: {}", url, e);
                None
            }
        };
        probe::throttle(self.delay).await;
        body
    }

    async fn check_sensitive(&self, url: &Url) -> Option<NewFinding> {
        let path = match url.path() {
            "" => "/",
            p => p,
        };
        if !sensitive::is_sensitive(path) {
            return None;
        }

        let outcome = probe::probe(&self.client, url.as_str()).await;
        probe::throttle(self.delay).await;

        let finding = if outcome.is_verified() {
            let severity = if sensitive::has_sensitive_extension(path) {
                Severity::High
            } else {
                Severity::Medium
            };
            let mut evidence = Evidence::observed(outcome.status.unwrap_or_default(), path);
            evidence.content_length = outcome.content_length;
            NewFinding::new(
                Category::Crawler,
                format!("Discovered sensitive-looking path: {}", path),
                severity,
                Confidence::Medium,
                evidence,
            )
        } else {
            let mut evidence = Evidence::unverified();
            evidence.path = Some(path.to_string());
            evidence.status = outcome.status;
            evidence.error = outcome.error;
            NewFinding::new(
                Category::Crawler,
                format!("Potential sensitive path (unverified): {}", path),
                Severity::Medium,
                Confidence::Low,
                evidence,
            )
        };
        Some(finding)
    }

    pub fn disabled_finding() -> NewFinding {
        NewFinding::new(
            Category::Crawler,
            "Crawler disabled (HTML parsing unavailable)",
            Severity::Low,
            Confidence::Low,
            Evidence::unverified(),
        )
    }

    pub fn failure_finding(error: &ScanError) -> NewFinding {
        let message = match error {
            ScanError::Crawl(detail) => detail.clone(),
            other => other.to_string(),
        };
        NewFinding::new(
            Category::Crawler,
            format!("Crawler failed: {}", message),
            Severity::Low,
            Confidence::Low,
            Evidence::unverified().with_error(message),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// URLs fetched, in visit order
    pub visited: Vec<String>,
    pub findings: Vec<NewFinding>,
}

/// Resolve a link against the page it was found on; `None` for links that
/// fail to parse or leave the base origin. Fragments are dropped.
pub fn resolve_link(page: &Url, link: &str, base: &Url) -> Option<Url> {
    let mut absolute = page.join(link).ok()?;
    absolute.set_fragment(None);
    if same_origin(base, &absolute) {
        Some(absolute)
    } else {
        None
    }
}
