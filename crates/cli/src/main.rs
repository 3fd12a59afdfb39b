use anyhow::Result;
use clap::Parser;
use kb_engine::{ReconciliationEngine, SyncService};
use kb_provider::{FileFolderConfig, FileFolderProvider, SourceProvider};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kb-sync")]
#[command(about = "Knowledge-cache synchronization over a directory of sources", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory tree whose regular files become knowledge sources
    #[arg(long, default_value = "./sources")]
    sources_dir: PathBuf,

    /// Persisted cache state file
    #[arg(long, default_value = "./kb-cache.json")]
    state_file: PathBuf,

    /// Seconds between reconciliation passes; 0 runs a single pass and exits
    #[arg(long, default_value_t = 0)]
    interval_secs: u64,

    /// Per-source read budget in seconds
    #[arg(long, default_value_t = 10)]
    io_timeout_secs: u64,

    /// Force a full re-hash every N passes to close the fingerprint blind
    /// spot (0 disables)
    #[arg(long, default_value_t = 0)]
    rehash_every: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = FileFolderConfig::new(&cli.sources_dir);
    config.io_timeout = Duration::from_secs(cli.io_timeout_secs);
    config.rehash_every = (cli.rehash_every > 0).then_some(cli.rehash_every);

    let provider = Arc::new(FileFolderProvider::new(config)) as Arc<dyn SourceProvider>;
    let engine = Arc::new(ReconciliationEngine::open(&cli.state_file, vec![provider]).await?);

    if cli.interval_secs == 0 {
        let stats = engine.run_pass().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    info!(
        "Starting periodic sync. sources_dir={} state_file={} interval_secs={}",
        cli.sources_dir.display(),
        cli.state_file.display(),
        cli.interval_secs
    );
    let service = SyncService::start(engine);
    let mut updates = service.subscribe_updates();
    let mut ticker = tokio::time::interval(Duration::from_secs(cli.interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.trigger("interval").await?;
            }
            update = updates.recv() => {
                match update {
                    Ok(outcome) if outcome.success => {
                        if let Some(stats) = outcome.stats {
                            info!(
                                "Pass done. reason={} changed={} added={} removed={} time_ms={}",
                                outcome.reason, stats.changed, stats.added, stats.removed, stats.time_ms
                            );
                        }
                    }
                    Ok(outcome) => warn!("Pass failed. reason={}", outcome.reason),
                    // Lagged receiver: outcomes are advisory, keep going.
                    Err(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
