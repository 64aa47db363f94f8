use crate::types::Severity;

const HIGH_KEYWORDS: &[&str] = &[
    "remote code",
    "rce",
    "sql injection",
    "sqli",
    "xss",
    "authentication bypass",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "directory indexing",
    "directory listing",
    "misconfiguration",
    "insecure",
];

const LOW_KEYWORDS: &[&str] = &["header", "info"];

/// Map advisory text to a severity. Tiers are checked high to low, so a
/// title matching several tiers takes the highest one.
pub fn classify(text: &str) -> Severity {
    let text = text.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if mentions(HIGH_KEYWORDS) {
        Severity::High
    } else if mentions(MEDIUM_KEYWORDS) {
        Severity::Medium
    } else if mentions(LOW_KEYWORDS) {
        Severity::Low
    } else {
        Severity::Medium
    }
}
