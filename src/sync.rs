//! Queue drain and the reconnect-driven sync worker.

use crate::db::{self, Pool};
use crate::model::DrainReport;
use crate::upstream::UpstreamService;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

/// Interest in the next reconnect. Registration is idempotent: `Notify`
/// holds at most one permit, so registering twice before the worker wakes
/// coalesces into a single drain.
#[derive(Debug, Default)]
pub struct SyncRegistration {
    notify: Notify,
}

impl SyncRegistration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// One pass over the queue: deliver each record in stored order, deleting
/// it only after the upstream acknowledges. A failing record is retained
/// and never blocks the rest; a crash mid-drain leaves exactly the
/// not-yet-deleted records pending.
#[instrument(skip_all)]
pub async fn drain_pending(pool: &Pool, upstream: &dyn UpstreamService) -> Result<DrainReport> {
    let pending = db::all_pending(pool).await?;
    let mut report = DrainReport::default();
    for update in pending {
        match upstream.deliver_update(&update).await {
            Ok(()) => {
                db::delete_pending(pool, &update.id).await?;
                info!(id = %update.id, book_id = %update.book_id, "pending update synced");
                report.delivered += 1;
            }
            Err(err) => {
                warn!(?err, id = %update.id, "sync failed; retained for next reconnect");
                report.retained += 1;
            }
        }
    }
    Ok(report)
}

/// Long-running worker realizing the reconnect trigger: wait for a
/// registered interest, probe until the upstream is reachable (the
/// offline-to-online transition is the reconnect signal), then drain.
/// Records that fail to deliver re-arm the worker after one interval.
pub async fn run_sync_worker(
    pool: Pool,
    upstream: Arc<dyn UpstreamService>,
    registration: Arc<SyncRegistration>,
    tag: String,
    poll_interval: Duration,
) {
    loop {
        registration.notified().await;

        while let Err(err) = upstream.probe().await {
            debug!(?err, "still offline; probing again shortly");
            tokio::time::sleep(poll_interval).await;
        }

        match drain_pending(&pool, upstream.as_ref()).await {
            Ok(report) => {
                info!(
                    tag = %tag,
                    delivered = report.delivered,
                    retained = report.retained,
                    "sync drain complete"
                );
                if report.retained > 0 {
                    tokio::time::sleep(poll_interval).await;
                    registration.register();
                }
            }
            Err(err) => {
                error!(?err, "sync drain error");
                tokio::time::sleep(poll_interval).await;
                registration.register();
            }
        }
    }
}
