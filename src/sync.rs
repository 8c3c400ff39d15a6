use crate::db::{self, Pool};
use crate::error::AttendanceError;
use crate::remote::RemoteStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

/// One sync pass: push every unsynced attendance row, then one counter
/// snapshot per touched student, and only after everything succeeded mark
/// the rows synced. Any failure aborts before marking, so the whole batch
/// is retried on the next trigger; the remote upsert is idempotent and the
/// counter snapshots are absolute, so re-delivery converges.
#[instrument(skip_all)]
pub async fn push_pending(
    pool: &Pool,
    remote: &dyn RemoteStore,
) -> Result<usize, AttendanceError> {
    let pending = db::unsynced_records(pool).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    for event in &pending {
        remote.upsert_event(event).await?;
    }

    let mut touched: Vec<&str> = pending.iter().map(|e| e.student_id.as_str()).collect();
    touched.sort_unstable();
    touched.dedup();
    for student_id in touched {
        if let Some(student) = db::student_by_id(pool, student_id).await? {
            remote
                .update_student_counters(
                    &student.id,
                    student.present_days,
                    student.absent_days,
                    student.total_days,
                )
                .await?;
        }
    }

    let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
    db::mark_synced(pool, &ids).await?;
    info!(pushed = pending.len(), "attendance batch acknowledged");
    Ok(pending.len())
}

/// Drains local writes to the remote store. Offline ⇄ online transitions
/// come from the connectivity watcher; a periodic timer picks up rows
/// written while already online.
pub struct SyncCoordinator {
    pool: Pool,
    remote: Arc<dyn RemoteStore>,
    online: AtomicBool,
    syncing: AtomicBool,
    wake: Notify,
    interval: Duration,
}

impl SyncCoordinator {
    pub fn new(pool: Pool, remote: Arc<dyn RemoteStore>, interval: Duration) -> Self {
        Self {
            pool,
            remote,
            online: AtomicBool::new(true),
            syncing: AtomicBool::new(false),
            wake: Notify::new(),
            interval,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Flip connectivity. An offline→online edge schedules a pass
    /// immediately instead of waiting for the next timer tick.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if online && !was {
            info!("back online; scheduling sync");
            self.wake.notify_one();
        } else if !online && was {
            info!("offline; writes will queue locally");
        }
    }

    /// Run one pass unless offline or a pass is already in flight.
    /// Returns the number of rows acknowledged.
    pub async fn sync_pass(&self) -> Result<usize, AttendanceError> {
        if !self.is_online() {
            return Ok(0);
        }
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let result = push_pending(&self.pool, self.remote.as_ref()).await;
        self.syncing.store(false, Ordering::SeqCst);
        result
    }

    /// Drive passes forever. Sync failures are logged and retried on the
    /// next tick or reconnect, never escalated.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            if !self.is_online() {
                continue;
            }
            match self.sync_pass().await {
                Ok(0) => {}
                Ok(pushed) => info!(pushed, "sync pass complete"),
                Err(err) => warn!(?err, "sync pass failed; will retry"),
            }
        }
    }
}
