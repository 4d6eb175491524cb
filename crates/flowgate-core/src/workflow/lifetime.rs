//! Single-writer lifetime (checkpoint) store.
//!
//! Callers enqueue full record snapshots without blocking; one background
//! task drains the queue in order and writes through a
//! [`LifetimeRepository`]. Because updates and completions share the queue,
//! a run's checkpoints land in transition order and its archive never
//! overtakes its final write.
//!
//! Archiving (settle delay plus retries) runs in its own task per run, so a
//! slow or failing archive never holds up other runs' checkpoints.
//!
//! Persistence failures are logged and briefly retried. They never surface
//! to the run loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use flowgate_types::config::EngineConfig;
use flowgate_types::error::StoreError;
use flowgate_types::lifetime::LifetimeRecord;

use crate::repository::lifetime::LifetimeRepository;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Delay between retries of a failed write or archive.
const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Window in which a failed record write is retried.
const SAVE_RETRY_WINDOW: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Timing of the background writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    /// Pause before archiving, letting the final write settle.
    pub settle_delay: Duration,
    /// How long a failing archive is retried.
    pub archive_retry: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for WriterSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_millis),
            archive_retry: Duration::from_secs(config.archive_retry_secs),
        }
    }
}

enum LifetimeOp {
    Update(Box<LifetimeRecord>),
    Complete(Uuid),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the single lifetime writer.
#[derive(Debug, Clone)]
pub struct LifetimeStore {
    tx: mpsc::UnboundedSender<LifetimeOp>,
}

impl LifetimeStore {
    /// Start the writer task over `repo`.
    pub fn spawn<R: LifetimeRepository>(repo: Arc<R>, settings: WriterSettings) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_loop(repo, settings, rx));
        (Self { tx }, handle)
    }

    /// Enqueue a full snapshot of a run.
    pub fn update(&self, record: LifetimeRecord) {
        let uid = record.uid;
        if self.tx.send(LifetimeOp::Update(Box::new(record))).is_err() {
            tracing::error!(run_id = %uid, "lifetime writer stopped, checkpoint dropped");
        }
    }

    /// Enqueue the move of a run's record to the completed set.
    pub fn mark_complete(&self, uid: Uuid) {
        if self.tx.send(LifetimeOp::Complete(uid)).is_err() {
            tracing::error!(run_id = %uid, "lifetime writer stopped, archive dropped");
        }
    }

    /// Wait until everything enqueued before this call has been processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(LifetimeOp::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn writer_loop<R: LifetimeRepository>(
    repo: Arc<R>,
    settings: WriterSettings,
    mut rx: mpsc::UnboundedReceiver<LifetimeOp>,
) {
    tracing::debug!("lifetime writer started");
    // Number of archive tasks still running.
    let (archiving, _) = watch::channel(0usize);
    while let Some(op) = rx.recv().await {
        match op {
            LifetimeOp::Update(record) => {
                let uid = record.uid;
                let reason = record.reason;
                let result = retry_for(SAVE_RETRY_WINDOW, || repo.save(&record)).await;
                match result {
                    Ok(()) => tracing::trace!(run_id = %uid, %reason, "checkpoint written"),
                    Err(e) => tracing::error!(run_id = %uid, %reason, error = %e, "failed to write checkpoint"),
                }
            }
            LifetimeOp::Complete(uid) => {
                archiving.send_modify(|n| *n += 1);
                let repo = Arc::clone(&repo);
                let archiving = archiving.clone();
                tokio::spawn(async move {
                    archive_record(&*repo, uid, settings).await;
                    archiving.send_modify(|n| *n -= 1);
                });
            }
            LifetimeOp::Flush(ack) => {
                let mut idle = archiving.subscribe();
                tokio::spawn(async move {
                    let _ = idle.wait_for(|n| *n == 0).await;
                    let _ = ack.send(());
                });
            }
        }
    }
    tracing::debug!("lifetime writer stopped");
}

/// Move a completed run's record once its final write has settled.
async fn archive_record<R: LifetimeRepository>(repo: &R, uid: Uuid, settings: WriterSettings) {
    tokio::time::sleep(settings.settle_delay).await;
    match retry_for(settings.archive_retry, || repo.archive(uid)).await {
        Ok(()) => tracing::info!(run_id = %uid, "lifetime record archived"),
        Err(e) => tracing::error!(run_id = %uid, error = %e, "failed to archive lifetime record"),
    }
}

/// Run `op` until it succeeds or `window` has elapsed since the first try.
async fn retry_for<F, Fut>(window: Duration, mut op: F) -> Result<(), StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if tokio::time::Instant::now() + RETRY_INTERVAL <= deadline => {
                tracing::warn!(error = %e, "lifetime store operation failed, retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}
