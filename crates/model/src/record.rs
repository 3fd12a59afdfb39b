use serde::{Deserialize, Serialize};

/// Open string tag identifying which provider produced a record.
///
/// Not a closed enumeration: registering a new provider kind introduces a new
/// tag without touching existing code.
pub type SourceType = String;

/// Tag used by the file-folder provider.
pub const FILE_SOURCE_TYPE: &str = "file";

/// Cheap filesystem fingerprint used to short-circuit expensive re-reads.
///
/// Present only on records with `source_type == "file"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Root-relative path with forward-slash separators.
    pub rel_path: String,

    /// Size at the time of the last read, in bytes.
    pub size_bytes: u64,

    /// Modification time at nanosecond resolution (unix epoch).
    pub mtime_ns: u64,
}

impl FileMetadata {
    /// Bit-identical comparison against a fresh stat. Any mismatch means the
    /// content must be re-read and re-hashed.
    #[must_use]
    pub fn matches(&self, size_bytes: u64, mtime_ns: u64) -> bool {
        self.size_bytes == size_bytes && self.mtime_ns == mtime_ns
    }
}

/// One cached source. Identity is external: the `source_id` key of the
/// [`CacheState`](crate::CacheState) map, never embedded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Which provider kind owns this record.
    pub source_type: SourceType,

    /// Digest of the last successfully read content.
    pub content_hash: String,

    /// Stored summary; owned by the summarization collaborator.
    #[serde(default)]
    pub summary_text: String,

    /// Canonical RFC 3339 timestamp of the last create/re-read. Only advances.
    pub last_indexed_at: String,

    /// True iff `summary_text` does not correspond to `content_hash`.
    pub summary_pending: bool,

    /// Fingerprint for file-kind records, absent for other kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
}
