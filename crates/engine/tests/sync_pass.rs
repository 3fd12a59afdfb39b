use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kb_engine::{ReconciliationEngine, SyncService};
use kb_model::{hash_text, CacheRecord, CacheState, SourceType};
use kb_provider::{FileFolderConfig, FileFolderProvider, SourceProvider};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn file_engine_parts(tmp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let sources = tmp.path().join("sources");
    fs::create_dir_all(&sources).unwrap();
    (sources, tmp.path().join("cache.json"))
}

async fn open_engine(
    sources: &Path,
    state_path: &Path,
) -> (Arc<ReconciliationEngine>, Arc<FileFolderProvider>) {
    let provider = Arc::new(FileFolderProvider::new(FileFolderConfig::new(sources)));
    let engine = ReconciliationEngine::open(
        state_path,
        vec![provider.clone() as Arc<dyn SourceProvider>],
    )
    .await
    .unwrap();
    (Arc::new(engine), provider)
}

#[tokio::test]
async fn end_to_end_two_files_edit_one() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();
    fs::write(sources.join("b.txt"), "world").unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;

    // Pass 1: both records appear, pending, with content hashes.
    let stats = engine.run_pass().await.unwrap();
    assert_eq!(stats.discovered, 2);
    assert_eq!(stats.added, 2);
    assert!(stats.changed);

    let snapshot = engine.snapshot().await;
    let a = snapshot.get("a.txt").unwrap();
    let b = snapshot.get("b.txt").unwrap();
    assert_eq!(a.content_hash, hash_text("hello"));
    assert_eq!(b.content_hash, hash_text("world"));
    assert!(a.summary_pending && b.summary_pending);

    // Pass 2: no change, identical state.
    let stats = engine.run_pass().await.unwrap();
    assert!(!stats.changed);
    assert_eq!(engine.snapshot().await, snapshot);

    // Pass 3: edit a.txt only.
    fs::write(sources.join("a.txt"), "hello!").unwrap();
    let stats = engine.run_pass().await.unwrap();
    assert!(stats.changed);

    let after = engine.snapshot().await;
    assert_eq!(after.get("a.txt").unwrap().content_hash, hash_text("hello!"));
    assert!(after.get("a.txt").unwrap().summary_pending);
    assert_eq!(after.get("b.txt").unwrap(), b);
}

#[tokio::test]
async fn steady_state_pass_skips_persistence() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;
    engine.run_pass().await.unwrap();
    assert!(state_path.exists());

    // If the steady-state pass wrote anything, the file would reappear.
    fs::remove_file(&state_path).unwrap();
    let stats = engine.run_pass().await.unwrap();
    assert!(!stats.changed);
    assert!(!state_path.exists(), "idempotent pass must not persist");
}

#[tokio::test]
async fn new_and_deleted_sources_reconcile() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;
    engine.run_pass().await.unwrap();
    assert_eq!(engine.snapshot().await.len(), 1);

    fs::write(sources.join("new.txt"), "fresh").unwrap();
    let stats = engine.run_pass().await.unwrap();
    assert_eq!(stats.added, 1);
    let snapshot = engine.snapshot().await;
    let record = snapshot.get("new.txt").unwrap();
    assert_eq!(record.content_hash, hash_text("fresh"));
    assert!(record.summary_pending);

    fs::remove_file(sources.join("a.txt")).unwrap();
    let stats = engine.run_pass().await.unwrap();
    assert_eq!(stats.removed, 1);
    assert!(!engine.snapshot().await.contains("a.txt"));
}

#[tokio::test]
async fn non_utf8_source_never_enters_cache() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("ok.txt"), "hello").unwrap();
    fs::write(sources.join("binary.dat"), [0xff, 0xfe, 0x00]).unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;
    let stats = engine.run_pass().await.unwrap();

    assert_eq!(stats.discovered, 2);
    assert_eq!(stats.added, 1);
    let snapshot = engine.snapshot().await;
    assert!(snapshot.contains("ok.txt"));
    assert!(!snapshot.contains("binary.dat"));
}

#[tokio::test]
async fn unchanged_files_are_never_reread() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let (engine, provider) = open_engine(&sources, &state_path).await;
    engine.run_pass().await.unwrap();

    let before = provider.read_stats();
    engine.run_pass().await.unwrap();
    let stats = provider.read_stats();
    assert_eq!(stats.full_reads, before.full_reads);
    assert_eq!(stats.short_circuits, before.short_circuits + 1);
}

#[tokio::test]
async fn state_survives_engine_restart() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;
    engine.run_pass().await.unwrap();
    let before = engine.snapshot().await;
    drop(engine);

    let (engine, provider) = open_engine(&sources, &state_path).await;
    assert_eq!(engine.snapshot().await, before);

    // Restart with an unchanged tree stays on the fingerprint path.
    let stats = engine.run_pass().await.unwrap();
    assert!(!stats.changed);
    assert_eq!(provider.read_stats().full_reads, 0);
}

#[tokio::test]
async fn persist_failure_keeps_dirty_state_for_the_next_pass() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;

    // A directory squatting on the state path makes the atomic rename fail.
    fs::create_dir(&state_path).unwrap();
    assert!(engine.run_pass().await.is_err());

    // The in-memory reconciliation still applied.
    let snapshot = engine.snapshot().await;
    assert!(snapshot.contains("a.txt"));

    // Nothing changes on disk or in the tree, but the write is still owed.
    fs::remove_dir(&state_path).unwrap();
    let stats = engine.run_pass().await.unwrap();
    assert!(!stats.changed);
    assert!(state_path.exists(), "retried persist must write the snapshot");
    assert_eq!(engine.snapshot().await, snapshot);
}

#[tokio::test]
async fn load_text_reaches_owning_provider() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let (engine, _provider) = open_engine(&sources, &state_path).await;
    engine.run_pass().await.unwrap();

    let provider = engine.provider_for("file").unwrap();
    assert_eq!(provider.load_text("a.txt").await.as_deref(), Some("hello"));
    assert!(engine.provider_for("web").is_none());
}

/// Provider that can be flipped into a failing state to exercise isolation.
struct FlakyProvider {
    fail: AtomicBool,
    ids: Vec<String>,
}

impl FlakyProvider {
    fn new(ids: &[&str]) -> Self {
        Self {
            fail: AtomicBool::new(false),
            ids: ids.iter().map(ToString::to_string).collect(),
        }
    }
}

#[async_trait]
impl SourceProvider for FlakyProvider {
    fn source_type(&self) -> &str {
        "mock"
    }

    async fn discover(&self, _now: DateTime<Utc>) -> kb_provider::Result<BTreeMap<String, SourceType>> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(kb_provider::ProviderError::Other(
                "simulated discovery outage".to_string(),
            ));
        }
        Ok(self
            .ids
            .iter()
            .map(|id| (id.clone(), "mock".to_string()))
            .collect())
    }

    async fn init_record(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheRecord> {
        Some(CacheRecord {
            source_type: "mock".to_string(),
            content_hash: hash_text(source_id),
            summary_text: String::new(),
            last_indexed_at: kb_model::format_rfc3339(now),
            summary_pending: true,
            file: None,
        })
    }

    async fn refresh(&self, _cache: &mut CacheState, _now: DateTime<Utc>) -> bool {
        false
    }

    async fn load_text(&self, source_id: &str) -> Option<String> {
        Some(format!("mock body for {source_id}"))
    }
}

#[tokio::test]
async fn failing_provider_is_isolated_and_its_records_survive() {
    let tmp = TempDir::new().unwrap();
    let (sources, state_path) = file_engine_parts(&tmp);
    fs::write(sources.join("a.txt"), "hello").unwrap();

    let file_provider: Arc<dyn SourceProvider> =
        Arc::new(FileFolderProvider::new(FileFolderConfig::new(&sources)));
    let flaky = Arc::new(FlakyProvider::new(&["mock:ticket-1"]));
    let engine = ReconciliationEngine::open(
        &state_path,
        vec![file_provider, flaky.clone() as Arc<dyn SourceProvider>],
    )
    .await
    .unwrap();

    let stats = engine.run_pass().await.unwrap();
    assert_eq!(stats.added, 2);

    // Outage: the mock provider's records must not be dropped as stale, and
    // the file provider still reconciles normally.
    flaky.fail.store(true, Ordering::Relaxed);
    fs::write(sources.join("b.txt"), "world").unwrap();
    let stats = engine.run_pass().await.unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.removed, 0);
    assert_eq!(stats.errors.len(), 1);

    let snapshot = engine.snapshot().await;
    assert!(snapshot.contains("mock:ticket-1"));
    assert!(snapshot.contains("a.txt"));
    assert!(snapshot.contains("b.txt"));
}

/// Provider whose discover blocks long enough for triggers to pile up.
struct SlowProvider {
    passes: AtomicUsize,
}

#[async_trait]
impl SourceProvider for SlowProvider {
    fn source_type(&self) -> &str {
        "slow"
    }

    async fn discover(&self, _now: DateTime<Utc>) -> kb_provider::Result<BTreeMap<String, SourceType>> {
        self.passes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(BTreeMap::new())
    }

    async fn init_record(&self, _source_id: &str, _now: DateTime<Utc>) -> Option<CacheRecord> {
        None
    }

    async fn refresh(&self, _cache: &mut CacheState, _now: DateTime<Utc>) -> bool {
        false
    }

    async fn load_text(&self, _source_id: &str) -> Option<String> {
        None
    }
}

#[tokio::test]
async fn burst_of_triggers_coalesces_into_one_follow_up_pass() {
    let tmp = TempDir::new().unwrap();
    let state_path = tmp.path().join("cache.json");

    let slow = Arc::new(SlowProvider {
        passes: AtomicUsize::new(0),
    });
    let engine = Arc::new(
        ReconciliationEngine::open(&state_path, vec![slow.clone() as Arc<dyn SourceProvider>])
            .await
            .unwrap(),
    );

    let service = SyncService::start(engine);
    let mut updates = service.subscribe_updates();

    for _ in 0..6 {
        service.trigger("test-burst").await.unwrap();
    }

    // First pass plus at most one coalesced follow-up.
    let first = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("first pass outcome")
        .unwrap();
    assert!(first.success);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let passes = slow.passes.load(Ordering::SeqCst);
    assert!(
        (1..=2).contains(&passes),
        "6 triggers must coalesce into at most 2 passes, got {passes}"
    );
}
