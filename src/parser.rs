use crate::severity;
use crate::types::{Category, Confidence, Evidence, NewFinding};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::HashSet;

/// Prefix Nikto puts in front of every advisory line
pub const ADVISORY_MARKER: &str = "+ ";

lazy_static! {
    static ref BOILERPLATE: Regex = Regex::new(
        r"(?i)^\s*\+\s*(Nikto v|Start Time|End Time|Target (IP|Hostname|Port)|No CGI Directories|Server:|Retrieved|Uncommon header)"
    )
    .expect("boilerplate pattern is valid");
}

/// Returns true for banner, timing and server-identification lines.
pub fn is_boilerplate(line: &str) -> bool {
    BOILERPLATE.is_match(line)
}

/// Turn raw scanner output into findings. Titles are deduplicated
/// case-insensitively within one call; the first occurrence wins.
pub fn parse_findings<S: AsRef<str>>(lines: &[S]) -> Vec<NewFinding> {
    let mut findings = Vec::new();
    let mut seen = HashSet::new();

    for raw in lines {
        let line = raw.as_ref().trim();
        if !line.starts_with(ADVISORY_MARKER) || is_boilerplate(line) {
            continue;
        }

        let title = line[ADVISORY_MARKER.len()..].trim();
        if title.is_empty() || !seen.insert(title.to_lowercase()) {
            continue;
        }

        let evidence = Evidence::unverified()
            .with_extra("tool", "nikto")
            .with_extra("raw", title);

        findings.push(NewFinding::new(
            Category::Nikto,
            title,
            severity::classify(title),
            Confidence::Medium,
            evidence,
        ));
    }

    debug!("Parsed {} advisories from {} output lines", findings.len(), lines.len());
    findings
}
