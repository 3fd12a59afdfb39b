use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// SHA-256 digest of source text as lowercase hex.
///
/// Stable across runs and platforms for identical input; the authoritative
/// change signal for a source.
#[must_use]
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical RFC 3339 timestamp: UTC, fixed microsecond precision, `Z` suffix.
///
/// Persisted equality checks rely on every writer producing the exact same
/// textual form for the same instant.
#[must_use]
pub fn format_rfc3339(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}
