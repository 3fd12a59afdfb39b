use crate::error::Result;
use crate::stats::PassStats;
use chrono::Utc;
use kb_model::CacheState;
use kb_provider::SourceProvider;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Orchestrates registered providers against a single [`CacheState`].
///
/// The engine is the only component that adds or removes cache records;
/// providers mutate their own records in place during refresh.
///
/// ## Consistency
///
/// A pass holds the state write lock for its duration, so readers observe
/// either the pre-pass or the fully reconciled post-pass snapshot, never a
/// partial one. Overlapping `run_pass` calls on the same engine serialize on
/// an internal pass guard.
pub struct ReconciliationEngine {
    providers: Vec<Arc<dyn SourceProvider>>,
    state: Arc<RwLock<CacheState>>,
    state_path: PathBuf,
    /// Set when the in-memory state diverges from disk; cleared only by a
    /// successful write, so a failed persist is retried next pass.
    dirty: AtomicBool,
    pass_guard: Mutex<()>,
}

impl ReconciliationEngine {
    /// Load (or initialize) the persisted snapshot and build an engine over
    /// the given providers.
    pub async fn open(
        state_path: impl AsRef<Path>,
        providers: Vec<Arc<dyn SourceProvider>>,
    ) -> Result<Self> {
        let state_path = state_path.as_ref().to_path_buf();
        let state = CacheState::load_or_default(&state_path).await?;
        info!(
            "Loaded cache state. path={} known_sources={}",
            state_path.display(),
            state.len()
        );
        Ok(Self {
            providers,
            state: Arc::new(RwLock::new(state)),
            state_path,
            dirty: AtomicBool::new(false),
            pass_guard: Mutex::new(()),
        })
    }

    /// Shared handle for read-only collaborators and the field-scoped summary
    /// writer.
    #[must_use]
    pub fn state_handle(&self) -> Arc<RwLock<CacheState>> {
        self.state.clone()
    }

    /// Clone of the current snapshot.
    pub async fn snapshot(&self) -> CacheState {
        self.state.read().await.clone()
    }

    /// Provider owning the given source-type tag, for `load_text` callers.
    #[must_use]
    pub fn provider_for(&self, source_type: &str) -> Option<Arc<dyn SourceProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.source_type() == source_type)
            .cloned()
    }

    /// One synchronization pass: discover, diff, init new, drop stale,
    /// refresh survivors, persist if dirty.
    ///
    /// A provider failing discovery contributes nothing this pass and its
    /// existing records are exempt from stale-removal; the other providers
    /// still apply. Persistence failure is surfaced to the caller while the
    /// in-memory state stays valid.
    pub async fn run_pass(&self) -> Result<PassStats> {
        let _guard = self.pass_guard.lock().await;
        let started = Instant::now();
        let now = Utc::now();
        let mut stats = PassStats::new();

        // Phase 1: discover across all providers, unioned by source_id with
        // the owning provider remembered for init_record.
        let mut owners: HashMap<String, usize> = HashMap::new();
        let mut failed_types: HashSet<String> = HashSet::new();
        for (idx, provider) in self.providers.iter().enumerate() {
            match provider.discover(now).await {
                Ok(discovered) => {
                    for (source_id, _kind) in discovered {
                        if owners.contains_key(&source_id) {
                            warn!(
                                "Cross-provider source_id collision; keeping first owner. source_id={source_id} loser={}",
                                provider.source_type()
                            );
                            stats.add_error(format!("source_id collision: {source_id}"));
                            continue;
                        }
                        owners.insert(source_id, idx);
                    }
                }
                Err(err) => {
                    warn!(
                        "Provider discovery failed; skipping its contribution this pass. source_type={} error={err}",
                        provider.source_type()
                    );
                    stats.add_error(format!("{} discovery: {err}", provider.source_type()));
                    failed_types.insert(provider.source_type().to_string());
                }
            }
        }
        stats.discovered = owners.len();

        let registered_types: HashSet<&str> = self
            .providers
            .iter()
            .map(|provider| provider.source_type())
            .collect();

        // Phases 2-5 run under the exclusive lock; readers see pre- or
        // post-pass state only.
        let mut state = self.state.write().await;

        for (source_id, idx) in &owners {
            if state.contains(source_id) {
                continue;
            }
            match self.providers[*idx].init_record(source_id, now).await {
                Some(record) => {
                    state.insert(source_id.clone(), record);
                    stats.added += 1;
                }
                // Vanished or unreadable: excluded until rediscovered.
                None => debug!("Source discovered but not initialized. source_id={source_id}"),
            }
        }

        // Stale removal runs before refresh so refresh never touches records
        // about to be deleted.
        let known = state.known_ids();
        for source_id in known {
            if owners.contains_key(&source_id) {
                continue;
            }
            let Some(record) = state.get(&source_id) else {
                continue;
            };
            if failed_types.contains(&record.source_type) {
                continue;
            }
            if !registered_types.contains(record.source_type.as_str()) {
                debug!(
                    "No provider registered for record; keeping it. source_id={source_id} source_type={}",
                    record.source_type
                );
                continue;
            }
            state.remove(&source_id);
            stats.removed += 1;
        }

        let mut refresh_changed = false;
        for provider in &self.providers {
            if failed_types.contains(provider.source_type()) {
                continue;
            }
            refresh_changed |= provider.refresh(&mut *state, now).await;
        }

        stats.changed = stats.added > 0 || stats.removed > 0 || refresh_changed;
        if stats.changed {
            self.dirty.store(true, Ordering::Relaxed);
        }

        if self.dirty.load(Ordering::Relaxed) {
            state.save(&self.state_path).await?;
            self.dirty.store(false, Ordering::Relaxed);
            debug!("Persisted cache state. path={}", self.state_path.display());
        }
        drop(state);

        stats.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Reconciliation pass completed. discovered={} added={} removed={} changed={} errors={} time_ms={}",
            stats.discovered,
            stats.added,
            stats.removed,
            stats.changed,
            stats.errors.len(),
            stats.time_ms
        );
        Ok(stats)
    }
}
