//! # KB Engine
//!
//! Reconciliation of source providers against the persisted knowledge cache.
//!
//! ## Pass
//!
//! ```text
//! Providers
//!     │
//!     ├──> discover (all providers, failures isolated)
//!     │      └─> discovered: source_id -> owner
//!     │
//!     ├──> diff against CacheState
//!     │      ├─> init_record for new ids
//!     │      └─> drop stale ids
//!     │
//!     ├──> refresh survivors (two-tier fingerprint/hash check)
//!     │
//!     └──> persist iff dirty (atomic write)
//! ```
//!
//! Two consecutive passes over an unchanged source tree produce
//! byte-identical state and no persistence write.
//!
//! ## Example
//!
//! ```no_run
//! use kb_engine::ReconciliationEngine;
//! use kb_provider::{FileFolderConfig, FileFolderProvider, SourceProvider};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> kb_engine::Result<()> {
//!     let provider: Arc<dyn SourceProvider> =
//!         Arc::new(FileFolderProvider::new(FileFolderConfig::new("./sources")));
//!     let engine = ReconciliationEngine::open("./cache.json", vec![provider]).await?;
//!     let stats = engine.run_pass().await?;
//!
//!     println!("discovered {} sources, changed={}", stats.discovered, stats.changed);
//!     Ok(())
//! }
//! ```

mod engine;
mod error;
mod service;
mod stats;

pub use engine::ReconciliationEngine;
pub use error::{EngineError, Result};
pub use service::{PassOutcome, SyncService};
pub use stats::PassStats;
