//! # KB Model
//!
//! Shared data model for the knowledge-cache synchronization engine.
//!
//! The cache is a mapping from `source_id` to [`CacheRecord`], persisted as a
//! versioned JSON snapshot. Records carry an authoritative content hash, a
//! cheap filesystem fingerprint for file-kind sources, and the summary fields
//! owned by the summarization collaborator.
//!
//! ## Field ownership
//!
//! Two writers touch a record, on disjoint fields:
//!
//! * the reconciliation pass owns `content_hash`, `file`, `last_indexed_at`
//!   and may *set* `summary_pending`;
//! * the summarization collaborator owns `summary_text` and may *clear*
//!   `summary_pending`, but only through [`CacheState::complete_summary`],
//!   which refuses to clear the flag when the hash has moved on.

mod error;
mod record;
mod state;
mod util;

pub use error::{ModelError, Result};
pub use record::{CacheRecord, FileMetadata, SourceType, FILE_SOURCE_TYPE};
pub use state::{CacheState, CACHE_STATE_SCHEMA_VERSION};
pub use util::{format_rfc3339, hash_text};
