//! Periodic eviction of stale staged blobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::blobs::BlobStaging;

/// Config for the blob sweeper.
#[derive(Debug, Clone)]
pub struct BlobSweeper {
    /// Blobs staged longer ago than this are deleted, consumed or not.
    pub max_age: Duration,
    /// A failed sweep is simply repeated on the next tick.
    pub interval: Duration,
}

impl Default for BlobSweeper {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Handle for the running sweeper.
#[derive(Debug)]
pub struct BlobSweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl BlobSweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

impl BlobSweeper {
    pub fn new(max_age: Duration, interval: Duration) -> Self {
        Self { max_age, interval }
    }

    /// Spawn the sweeper. The first sweep runs immediately.
    pub fn spawn(&self, staging: Arc<dyn BlobStaging>) -> BlobSweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(sweeper_loop(self.clone(), staging, shutdown_rx));

        BlobSweeperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn sweeper_loop(
    cfg: BlobSweeper,
    staging: Arc<dyn BlobStaging>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        max_age_secs = cfg.max_age.as_secs(),
        interval_secs = cfg.interval.as_secs(),
        "blob sweeper started"
    );

    let mut ticker = tokio::time::interval(cfg.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match staging.sweep(cfg.max_age, Utc::now()).await {
            Ok(removed) => info!(removed, "swept stale blobs"),
            Err(e) => warn!(error = %e, "blob sweep failed; retrying on next tick"),
        }
    }

    info!("blob sweeper stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;
    use medscribe_core::{ConsultationId, UserId};

    use super::*;
    use crate::blobs::{Blob, BlobError, BlobId, BlobInfo, InMemoryBlobStaging, NewBlob};
    use crate::jobs::JobId;

    const HOUR: Duration = Duration::from_secs(3600);

    fn upload(hours_ago: i64) -> NewBlob {
        NewBlob::new(
            ConsultationId::new(),
            UserId::new(),
            "r.webm",
            "audio/webm",
            vec![1, 2, 3],
        )
        .staged_at(Utc::now() - chrono::Duration::hours(hours_ago))
    }

    /// Staging whose first `sweep` calls fail.
    struct UnreliableSweep {
        inner: InMemoryBlobStaging,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl BlobStaging for UnreliableSweep {
        async fn stage(&self, blob: NewBlob) -> Result<BlobId, BlobError> {
            self.inner.stage(blob).await
        }

        async fn describe(&self, id: BlobId) -> Result<BlobInfo, BlobError> {
            self.inner.describe(id).await
        }

        async fn reserve(&self, id: BlobId, job_id: JobId) -> Result<(), BlobError> {
            self.inner.reserve(id, job_id).await
        }

        async fn take(&self, id: BlobId) -> Result<Blob, BlobError> {
            self.inner.take(id).await
        }

        async fn release(&self, id: BlobId) -> Result<bool, BlobError> {
            self.inner.release(id).await
        }

        async fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize, BlobError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BlobError::Storage("database unavailable".into()));
            }
            self.inner.sweep(max_age, now).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_start_and_on_every_tick() {
        let staging = Arc::new(InMemoryBlobStaging::new());
        let stale = staging.stage(upload(25)).await.unwrap();
        let fresh = staging.stage(upload(1)).await.unwrap();

        let handle = BlobSweeper::new(24 * HOUR, HOUR).spawn(staging.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(staging.describe(stale).await.is_err());
        assert!(staging.describe(fresh).await.is_ok());

        let late = staging.stage(upload(30)).await.unwrap();
        tokio::time::sleep(HOUR).await;
        assert!(staging.describe(late).await.is_err());
        assert_eq!(staging.len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_waits_for_the_next_tick() {
        let staging = Arc::new(UnreliableSweep {
            inner: InMemoryBlobStaging::new(),
            failures_left: AtomicU32::new(1),
            attempts: AtomicU32::new(0),
        });
        let stale = staging.stage(upload(25)).await.unwrap();

        let handle = BlobSweeper::new(24 * HOUR, HOUR).spawn(staging.clone());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(staging.attempts.load(Ordering::SeqCst), 1);
        assert!(staging.describe(stale).await.is_ok());

        tokio::time::sleep(HOUR).await;
        assert_eq!(staging.attempts.load(Ordering::SeqCst), 2);
        assert!(staging.describe(stale).await.is_err());

        handle.shutdown().await;
    }
}
