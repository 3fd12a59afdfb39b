use crate::error::{ModelError, Result};
use crate::record::CacheRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const CACHE_STATE_SCHEMA_VERSION: u32 = 1;

/// Persisted snapshot of all known sources, keyed by `source_id`.
///
/// Insertion order is irrelevant; a `BTreeMap` keeps the serialized form
/// deterministic so unchanged passes produce byte-identical files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheState {
    sources: BTreeMap<String, CacheRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCacheState {
    schema_version: u32,
    sources: BTreeMap<String, CacheRecord>,
}

impl CacheState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let persisted: PersistedCacheState = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != CACHE_STATE_SCHEMA_VERSION {
            return Err(ModelError::UnsupportedSchema {
                found: persisted.schema_version,
                expected: CACHE_STATE_SCHEMA_VERSION,
            });
        }
        Ok(Self {
            sources: persisted.sources,
        })
    }

    /// Load a snapshot, treating a missing file as an empty cache.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(path.as_ref()).await {
            Ok(state) => Ok(state),
            Err(ModelError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Atomically persist the snapshot: write a sibling tmp file, then rename.
    /// Readers never observe a torn file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedCacheState {
            schema_version: CACHE_STATE_SCHEMA_VERSION,
            sources: self.sources.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<&CacheRecord> {
        self.sources.get(source_id)
    }

    pub fn get_mut(&mut self, source_id: &str) -> Option<&mut CacheRecord> {
        self.sources.get_mut(source_id)
    }

    pub fn insert(&mut self, source_id: String, record: CacheRecord) {
        self.sources.insert(source_id, record);
    }

    pub fn remove(&mut self, source_id: &str) -> Option<CacheRecord> {
        self.sources.remove(source_id)
    }

    #[must_use]
    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    #[must_use]
    pub const fn sources(&self) -> &BTreeMap<String, CacheRecord> {
        &self.sources
    }

    /// All currently known `source_id`s.
    #[must_use]
    pub fn known_ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Sources whose stored summary is stale relative to their content hash.
    pub fn pending_ids(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .filter(|(_, record)| record.summary_pending)
            .map(|(id, _)| id.as_str())
    }

    /// Field-scoped summary completion for the summarization collaborator.
    ///
    /// Writes `summary_text` and clears `summary_pending` only when the stored
    /// `content_hash` still equals `content_hash` — the hash the summary was
    /// computed for. A reconciliation pass that re-hashed the source in the
    /// meantime wins, and the stale summary is discarded. Returns whether the
    /// completion was applied.
    pub fn complete_summary(
        &mut self,
        source_id: &str,
        content_hash: &str,
        summary_text: String,
    ) -> bool {
        let Some(record) = self.sources.get_mut(source_id) else {
            return false;
        };
        if record.content_hash != content_hash {
            log::debug!(
                "Discarding stale summary. source_id={source_id} summarized_hash={content_hash} current_hash={}",
                record.content_hash
            );
            return false;
        }
        record.summary_text = summary_text;
        record.summary_pending = false;
        true
    }
}
