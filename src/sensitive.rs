//! Fixed lists of high-value file names and suffixes (credentials, archives,
//! certificates, packaged artifacts).

use crate::types::Severity;

pub const SENSITIVE_EXTENSIONS: &[&str] = &[
    ".pem", ".jks", ".p12", ".pfx", ".crt", ".cer",
    ".war", ".jar", ".ear",
    ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".zip", ".gz", ".bz2", ".lzma", ".alz",
    ".egg",
];

pub const ALWAYS_SENSITIVE_PATHS: &[&str] = &["/.htpasswd"];

pub fn has_sensitive_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    SENSITIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_always_sensitive(path: &str) -> bool {
    ALWAYS_SENSITIVE_PATHS.contains(&path)
}

pub fn is_sensitive(path: &str) -> bool {
    is_always_sensitive(path) || has_sensitive_extension(path)
}

/// Raise to high for sensitive paths. Never lowers a severity.
pub fn escalate(severity: Severity, path: Option<&str>) -> Severity {
    match path {
        Some(p) if is_sensitive(p) && severity < Severity::High => Severity::High,
        _ => severity,
    }
}
