//! # KB Provider
//!
//! Per-source-kind discovery and change detection for the knowledge cache.
//!
//! A [`SourceProvider`] separates cheap enumeration ([`SourceProvider::discover`])
//! from the expensive read-and-hash ([`SourceProvider::init_record`]) so the
//! reconciliation engine never pays read cost for sources it already knows.
//! [`FileFolderProvider`] is the reference implementation over a directory
//! tree; new source kinds (web crawler, ticketing importer, ...) implement the
//! same four operations and plug into the engine unchanged.

mod error;
mod file_folder;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kb_model::{CacheRecord, CacheState, SourceType};
use std::collections::BTreeMap;

pub use error::{ProviderError, Result};
pub use file_folder::{FileFolderConfig, FileFolderProvider, ReadStats};

/// One source kind's discovery/refresh protocol.
///
/// ## Call order
///
/// `discover` must be invoked before `init_record` or `refresh` within the
/// same reconciliation pass: it rebuilds the provider's internal
/// id-to-location index that the other operations consume. The engine
/// enforces this ordering; callers bypassing the engine must do the same.
///
/// ## Ownership
///
/// Providers mutate existing records in place but never add or remove
/// `CacheState` entries — that is the reconciliation engine's exclusive
/// responsibility.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// The open tag this provider stamps on its records (e.g. `"file"`).
    fn source_type(&self) -> &str;

    /// Enumerate all currently visible sources as `source_id -> SourceType`.
    ///
    /// Idempotent; side effects are limited to provider-internal bookkeeping.
    /// Per-entry I/O errors are logged and the entry skipped; a missing root
    /// yields an empty map, not an error. An `Err` means the whole provider
    /// failed this pass and the engine will skip its contribution.
    async fn discover(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, SourceType>>;

    /// Full read + hash for a `source_id` returned by `discover` this pass.
    ///
    /// `None` when the source vanished or is unreadable (e.g. undecodable
    /// text); such sources are excluded from the cache and not retried until
    /// rediscovered.
    async fn init_record(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheRecord>;

    /// Re-examine every source this provider knows about and update matching
    /// records in place. Returns whether any record was mutated.
    async fn refresh(&self, cache: &mut CacheState, now: DateTime<Utc>) -> bool;

    /// On-demand full-text retrieval for collaborators; `None` on any read
    /// failure.
    async fn load_text(&self, source_id: &str) -> Option<String>;
}
