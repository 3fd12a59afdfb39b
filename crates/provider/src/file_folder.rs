use crate::error::{ProviderError, Result};
use crate::SourceProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kb_model::{
    format_rfc3339, hash_text, CacheRecord, CacheState, FileMetadata, SourceType,
    FILE_SOURCE_TYPE,
};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

const SCAN_PROGRESS_INTERVAL: u64 = 2000;

/// Configuration for [`FileFolderProvider`].
#[derive(Debug, Clone)]
pub struct FileFolderConfig {
    /// Root directory whose regular files become sources.
    pub sources_dir: PathBuf,

    /// Per-source read budget. Exceeding it is a transient read failure: the
    /// record is left untouched and retried next pass.
    pub io_timeout: Duration,

    /// Optional safety net against the fingerprint blind spot: every Nth
    /// refresh pass re-reads and re-hashes all known sources regardless of
    /// fingerprints. `None` keeps the pure two-tier behavior.
    pub rehash_every: Option<u32>,
}

impl FileFolderConfig {
    #[must_use]
    pub fn new(sources_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources_dir: sources_dir.into(),
            io_timeout: Duration::from_secs(10),
            rehash_every: None,
        }
    }
}

/// Read-path counters, exposed for instrumentation and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    /// Full content reads attempted (init, refresh misses, `load_text`).
    pub full_reads: u64,

    /// Refresh checks answered by the fingerprint without reading.
    pub short_circuits: u64,
}

/// Reference [`SourceProvider`] over a directory tree.
///
/// `discover` rebuilds an internal `source_id -> absolute path` index on every
/// call; `init_record` and `refresh` rely on that index being fresh from the
/// same pass. `source_id` is the root-relative path with forward-slash
/// separators, deterministic across platforms.
pub struct FileFolderProvider {
    sources_dir: PathBuf,
    io_timeout: Duration,
    rehash_every: Option<u32>,
    index: RwLock<HashMap<String, PathBuf>>,
    refresh_passes: AtomicU64,
    full_reads: AtomicU64,
    short_circuits: AtomicU64,
}

impl FileFolderProvider {
    #[must_use]
    pub fn new(config: FileFolderConfig) -> Self {
        Self {
            sources_dir: config.sources_dir,
            io_timeout: config.io_timeout,
            rehash_every: config.rehash_every,
            index: RwLock::new(HashMap::new()),
            refresh_passes: AtomicU64::new(0),
            full_reads: AtomicU64::new(0),
            short_circuits: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn read_stats(&self) -> ReadStats {
        ReadStats {
            full_reads: self.full_reads.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, source_id: &str) -> Option<PathBuf> {
        match self.index.read() {
            Ok(index) => index.get(source_id).cloned(),
            Err(_) => {
                warn!("Source index lock poisoned; treating {source_id} as absent");
                None
            }
        }
    }

    /// Read and strictly decode a file within the I/O budget. `None` covers
    /// timeout, I/O failure, and undecodable content; the log line says which.
    async fn read_text(&self, path: &Path) -> Option<String> {
        self.full_reads.fetch_add(1, Ordering::Relaxed);
        let bytes = match tokio::time::timeout(self.io_timeout, tokio::fs::read(path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                warn!("Failed to read file source. path={} error={err}", path.display());
                return None;
            }
            Err(_) => {
                warn!(
                    "Read exceeded io budget. path={} budget_ms={}",
                    path.display(),
                    self.io_timeout.as_millis()
                );
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                warn!("Skipping non-UTF8 file source. path={}", path.display());
                None
            }
        }
    }
}

#[async_trait]
impl SourceProvider for FileFolderProvider {
    fn source_type(&self) -> &str {
        FILE_SOURCE_TYPE
    }

    async fn discover(&self, _now: DateTime<Utc>) -> Result<BTreeMap<String, SourceType>> {
        let mut sources = BTreeMap::new();
        let mut index = HashMap::new();

        if !self.sources_dir.exists() {
            debug!(
                "FileFolderProvider discover: sources_dir missing. path={}",
                self.sources_dir.display()
            );
            self.publish_index(index)?;
            return Ok(sources);
        }

        debug!(
            "FileFolderProvider discover: start. sources_dir={}",
            self.sources_dir.display()
        );
        let mut scanned = 0u64;
        for entry in WalkDir::new(&self.sources_dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to read directory entry: {err}");
                    continue;
                }
            };
            scanned += 1;
            if scanned % SCAN_PROGRESS_INTERVAL == 0 {
                debug!(
                    "FileFolderProvider discover: scanning. scanned={scanned} discovered={}",
                    sources.len()
                );
            }
            if !entry.file_type().is_file() {
                continue;
            }
            // Only the file's own basename counts as hidden; dot-directories
            // are still descended.
            if is_hidden_name(entry.file_name()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.sources_dir) else {
                continue;
            };
            let source_id = normalize_rel_path(relative);
            sources.insert(source_id.clone(), FILE_SOURCE_TYPE.to_string());
            index.insert(source_id, entry.into_path());
        }

        debug!(
            "FileFolderProvider discover: completed. scanned={scanned} discovered={} sources_dir={}",
            sources.len(),
            self.sources_dir.display()
        );
        self.publish_index(index)?;
        Ok(sources)
    }

    async fn init_record(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheRecord> {
        let path = self.lookup(source_id)?;

        debug!(
            "FileFolderProvider init_record: start. source_id={source_id} path={}",
            path.display()
        );
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!("Failed to stat file source. path={} error={err}", path.display());
                return None;
            }
        };

        let text = self.read_text(&path).await?;
        let content_hash = hash_text(&text);
        debug!(
            "FileFolderProvider init_record: completed. source_id={source_id} size_bytes={} text_chars={}",
            meta.len(),
            text.chars().count()
        );
        Some(CacheRecord {
            source_type: FILE_SOURCE_TYPE.to_string(),
            content_hash,
            summary_text: String::new(),
            last_indexed_at: format_rfc3339(now),
            summary_pending: true,
            file: Some(FileMetadata {
                rel_path: source_id.to_string(),
                size_bytes: meta.len(),
                mtime_ns: mtime_ns(&meta),
            }),
        })
    }

    async fn refresh(&self, cache: &mut CacheState, now: DateTime<Utc>) -> bool {
        let index: Vec<(String, PathBuf)> = match self.index.read() {
            Ok(index) => index.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => {
                warn!("Source index lock poisoned; skipping refresh");
                return false;
            }
        };

        let pass = self.refresh_passes.fetch_add(1, Ordering::Relaxed) + 1;
        let force_rehash = self
            .rehash_every
            .is_some_and(|every| every > 0 && pass % u64::from(every) == 0);

        let mut changed = false;
        debug!(
            "FileFolderProvider refresh: start. known_files={} force_rehash={force_rehash}",
            index.len()
        );
        for (source_id, path) in &index {
            let Some(record) = cache.get(source_id) else {
                continue;
            };
            if record.source_type != FILE_SOURCE_TYPE {
                continue;
            }

            let meta = match tokio::fs::metadata(path).await {
                Ok(meta) => meta,
                Err(err) => {
                    warn!("Failed to stat file source. path={} error={err}", path.display());
                    continue;
                }
            };
            let size_bytes = meta.len();
            let mtime = mtime_ns(&meta);

            let fingerprint_hit = record
                .file
                .as_ref()
                .is_some_and(|file| file.matches(size_bytes, mtime));
            if fingerprint_hit && !force_rehash {
                // Unchanged fingerprint means unchanged content by contract;
                // the read is skipped entirely (documented blind spot).
                self.short_circuits.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if !fingerprint_hit {
                debug!(
                    "FileFolderProvider refresh: changed file detected. rel_path={source_id} old_size={:?} new_size={size_bytes}",
                    record.file.as_ref().map(|file| file.size_bytes)
                );
            }
            // Transient read failures leave the record untouched for retry
            // next pass.
            let Some(text) = self.read_text(path).await else {
                continue;
            };
            let content_hash = hash_text(&text);

            let Some(record) = cache.get_mut(source_id) else {
                continue;
            };
            let new_meta = FileMetadata {
                rel_path: source_id.clone(),
                size_bytes,
                mtime_ns: mtime,
            };
            let hash_changed = content_hash != record.content_hash;
            let meta_changed = record.file.as_ref() != Some(&new_meta);
            if !hash_changed && !meta_changed {
                // Forced re-hash confirmed the cache; nothing to persist.
                continue;
            }
            record.file = Some(new_meta);
            if hash_changed || record.summary_pending {
                record.content_hash = content_hash;
                record.summary_pending = true;
            }
            let stamp = format_rfc3339(now);
            if stamp > record.last_indexed_at {
                record.last_indexed_at = stamp;
            }
            changed = true;
        }

        let stats = self.read_stats();
        debug!(
            "FileFolderProvider refresh: completed. changed={changed} full_reads={} short_circuits={}",
            stats.full_reads, stats.short_circuits
        );
        changed
    }

    async fn load_text(&self, source_id: &str) -> Option<String> {
        let path = self.lookup(source_id)?;
        self.read_text(&path).await
    }
}

impl FileFolderProvider {
    fn publish_index(&self, index: HashMap<String, PathBuf>) -> Result<()> {
        let mut guard = self
            .index
            .write()
            .map_err(|_| ProviderError::StateUnavailable("source index lock poisoned".to_string()))?;
        *guard = index;
        Ok(())
    }
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn normalize_rel_path(relative: &Path) -> String {
    let mut normalized = relative.to_string_lossy().to_string();
    if normalized.contains('\\') {
        normalized = normalized.replace('\\', "/");
    }
    normalized
}

fn mtime_ns(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|modified| modified.duration_since(SystemTime::UNIX_EPOCH).ok())
        .and_then(|duration| u64::try_from(duration.as_nanos()).ok())
        .unwrap_or(0)
}
