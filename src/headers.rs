//! Security header and cookie flag audit of the target's landing page

use crate::config::Config;
use crate::probe;
use crate::types::{Category, Confidence, Evidence, NewFinding, Severity};
use crate::utils::url::{is_https, normalize_base};
use crate::{Result, ScanError};
use log::{debug, info};
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Client;
use std::collections::HashSet;

pub struct HeaderAuditor {
    client: Client,
}

/// Flags a cookie is expected to carry, as written in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieFlag {
    Secure,
    HttpOnly,
    SameSite,
}

impl CookieFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieFlag::Secure => "Secure",
            CookieFlag::HttpOnly => "HttpOnly",
            CookieFlag::SameSite => "SameSite",
        }
    }
}

impl HeaderAuditor {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: probe::build_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Issue one GET against the base URL and report every missing header or
    /// cookie flag. A failed request is returned as an error for the caller
    /// to turn into a placeholder finding.
    pub async fn audit(&self, base_url: &str) -> Result<Vec<NewFinding>> {
        let base = normalize_base(base_url);
        let response = self
            .client
            .get(&base)
            .send()
            .await
            .map_err(|e| ScanError::HeaderAudit(e.to_string()))?;

        let status = response.status().as_u16();
        let https = is_https(&base);
        let mut findings = check_headers(response.headers(), status, https);
        findings.extend(check_cookies(response.headers(), status, https));

        info!("Header audit of {} produced {} findings", base, findings.len());
        Ok(findings)
    }

    pub fn failure_finding(error: &ScanError) -> NewFinding {
        let message = match error {
            ScanError::HeaderAudit(detail) => detail.clone(),
            other => other.to_string(),
        };
        NewFinding::new(
            Category::Headers,
            format!("Header audit failed: {}", message),
            Severity::Low,
            Confidence::Low,
            Evidence::unverified().with_error(message),
        )
    }
}

/// Missing-header checks. `HeaderMap` lookups are case-insensitive.
pub fn check_headers(headers: &HeaderMap, status: u16, https: bool) -> Vec<NewFinding> {
    let has = |name: &str| headers.contains_key(name);
    let mut missing: Vec<(&str, Severity)> = Vec::new();

    if https && !has("strict-transport-security") {
        missing.push(("Missing Strict-Transport-Security (HSTS) header", Severity::Medium));
    }
    if !has("x-content-type-options") {
        missing.push(("Missing X-Content-Type-Options: nosniff", Severity::Low));
    }
    if !has("content-security-policy") && !has("x-frame-options") {
        missing.push(("Missing CSP and X-Frame-Options (clickjacking exposure)", Severity::Medium));
    }
    if !has("referrer-policy") {
        missing.push(("Missing Referrer-Policy header", Severity::Low));
    }
    if !has("permissions-policy") && !has("feature-policy") {
        missing.push(("Missing Permissions-Policy header", Severity::Low));
    }

    missing
        .into_iter()
        .map(|(title, severity)| {
            NewFinding::new(
                Category::Headers,
                title,
                severity,
                Confidence::Medium,
                Evidence::observed(status, "/"),
            )
        })
        .collect()
}

pub fn check_cookies(headers: &HeaderMap, status: u16, https: bool) -> Vec<NewFinding> {
    let mut findings = Vec::new();
    let mut titles = HashSet::new();

    for value in headers.get_all(SET_COOKIE) {
        let raw = String::from_utf8_lossy(value.as_bytes()).to_string();
        let missing = missing_cookie_flags(&raw, https);
        if missing.is_empty() {
            continue;
        }

        let name = raw.split('=').next().unwrap_or_default().trim().to_string();
        let severity = if missing.contains(&CookieFlag::Secure) {
            Severity::Medium
        } else {
            Severity::Low
        };
        let flags: Vec<&str> = missing.iter().map(|f| f.as_str()).collect();
        let title = format!("Cookie '{}' missing flags: {}", name, flags.join(", "));
        if !titles.insert(title.to_lowercase()) {
            debug!("Cookie {} already reported", name);
            continue;
        }
        debug!("Cookie {} missing {:?}", name, flags);

        findings.push(NewFinding::new(
            Category::Cookies,
            title,
            severity,
            Confidence::Medium,
            Evidence::observed(status, "/").with_extra("cookie", raw.as_str()),
        ));
    }

    findings
}

/// Cookie attributes are the `;`-separated parts after `name=value`.
/// `Secure` is only required on https targets.
pub fn missing_cookie_flags(set_cookie: &str, https: bool) -> Vec<CookieFlag> {
    let attributes: Vec<String> = set_cookie
        .split(';')
        .skip(1)
        .map(|attr| attr.split('=').next().unwrap_or_default().trim().to_lowercase())
        .collect();
    let has = |name: &str| attributes.iter().any(|a| a == name);

    let mut missing = Vec::new();
    if https && !has("secure") {
        missing.push(CookieFlag::Secure);
    }
    if !has("httponly") {
        missing.push(CookieFlag::HttpOnly);
    }
    if !has("samesite") {
        missing.push(CookieFlag::SameSite);
    }
    missing
}
