use crate::engine::ReconciliationEngine;
use crate::error::{EngineError, Result};
use crate::stats::PassStats;
use log::{error, info};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::{broadcast, mpsc};

const COMMAND_QUEUE_DEPTH: usize = 64;
const UPDATE_QUEUE_DEPTH: usize = 32;

/// Outcome of one completed reconciliation pass, broadcast to observers.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub completed_at: SystemTime,
    pub duration_ms: u64,
    pub stats: Option<PassStats>,
    pub success: bool,
    pub reason: String,
}

enum SyncCommand {
    Trigger { reason: String },
    Shutdown,
}

/// Serializes reconciliation passes for one engine and coalesces triggers.
///
/// Passes never overlap: a trigger arriving while a pass is in flight marks
/// exactly one queued follow-up pass, no matter how many triggers arrive.
/// This keeps a slow filesystem from building an unbounded backlog.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<SyncServiceInner>,
}

struct SyncServiceInner {
    command_tx: mpsc::Sender<SyncCommand>,
    update_tx: broadcast::Sender<PassOutcome>,
}

impl SyncService {
    #[must_use]
    pub fn start(engine: Arc<ReconciliationEngine>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (update_tx, _) = broadcast::channel(UPDATE_QUEUE_DEPTH);

        spawn_sync_loop(engine, command_rx, update_tx.clone());

        Self {
            inner: Arc::new(SyncServiceInner {
                command_tx,
                update_tx,
            }),
        }
    }

    /// Request a pass. Returns once the trigger is queued, not once the pass
    /// has run.
    pub async fn trigger(&self, reason: impl Into<String>) -> Result<()> {
        self.inner
            .command_tx
            .send(SyncCommand::Trigger {
                reason: reason.into(),
            })
            .await
            .map_err(|e| EngineError::ServiceUnavailable(format!("failed to send trigger: {e}")))
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<PassOutcome> {
        self.inner.update_tx.subscribe()
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(SyncCommand::Shutdown);
        }
    }
}

fn spawn_sync_loop(
    engine: Arc<ReconciliationEngine>,
    mut command_rx: mpsc::Receiver<SyncCommand>,
    update_tx: broadcast::Sender<PassOutcome>,
) {
    tokio::spawn(async move {
        // Reason carried over from triggers coalesced behind a running pass.
        let mut queued: Option<String> = None;

        loop {
            let reason = match queued.take() {
                Some(reason) => reason,
                None => match command_rx.recv().await {
                    Some(SyncCommand::Trigger { reason }) => reason,
                    Some(SyncCommand::Shutdown) | None => break,
                },
            };

            // Triggers that piled up before the pass starts collapse into
            // this run.
            if drain_triggers(&mut command_rx).is_shutdown() {
                break;
            }

            let started = Instant::now();
            let outcome = match engine.run_pass().await {
                Ok(stats) => {
                    info!("Sync pass finished. reason={reason} changed={}", stats.changed);
                    PassOutcome {
                        completed_at: SystemTime::now(),
                        duration_ms: elapsed_ms(started),
                        stats: Some(stats),
                        success: true,
                        reason: reason.clone(),
                    }
                }
                Err(err) => {
                    error!("Sync pass failed. reason={reason} error={err}");
                    PassOutcome {
                        completed_at: SystemTime::now(),
                        duration_ms: elapsed_ms(started),
                        stats: None,
                        success: false,
                        reason: reason.clone(),
                    }
                }
            };
            let _ = update_tx.send(outcome);

            // Triggers that arrived mid-pass coalesce into exactly one
            // follow-up.
            match drain_triggers(&mut command_rx) {
                Drained::Shutdown => break,
                Drained::Coalesced(follow_up) => queued = follow_up,
            }
        }
    });
}

enum Drained {
    Coalesced(Option<String>),
    Shutdown,
}

impl Drained {
    const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

fn drain_triggers(command_rx: &mut mpsc::Receiver<SyncCommand>) -> Drained {
    let mut coalesced = None;
    loop {
        match command_rx.try_recv() {
            Ok(SyncCommand::Trigger { reason }) => {
                if coalesced.is_none() {
                    coalesced = Some(reason);
                }
            }
            Ok(SyncCommand::Shutdown) => return Drained::Shutdown,
            Err(_) => return Drained::Coalesced(coalesced),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
