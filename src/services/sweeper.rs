//! Timeout sweeps and their scheduler
//!
//! Two periodic jobs keep the queue moving:
//! - check-ins left in `pending_verification` too long go back to `notified`
//! - entries `waiting`/`notified` for too long are marked `no_show`
//!
//! Sweeps read "now" from the injected clock, so tests age entries with a
//! `ManualClock` and call the sweep methods directly.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    broadcast::{publish_snapshot, Gateway},
    notifications::{Notification, NotificationKind},
    queue::{stage_event, QueueService},
};
use crate::{
    config::SweeperConfig,
    error::AppResult,
    models::{queue::StatusChange, CheckInOutcome, QueueStatus},
};

/// Reason stored on entries the queue timeout marks as no-show
pub const AUTO_REJECT_REASON: &str = "auto-rejected: timed out";

/// Interval between WebSocket heartbeat pings
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct TimeoutSweeper {
    queue: QueueService,
    config: SweeperConfig,
}

impl TimeoutSweeper {
    pub fn new(queue: QueueService, config: SweeperConfig) -> Self {
        Self { queue, config }
    }

    /// Revert check-ins nobody verified in time. Returns how many were reverted.
    pub async fn sweep_pending_verifications(&self) -> AppResult<usize> {
        let now = self.queue.clock.now();
        let cutoff = now - self.config.check_in_timeout();
        let expired = self.queue.store.expired_check_ins(cutoff).await?;

        let mut salons = BTreeSet::new();
        let mut reverted = 0;
        for entry in expired {
            let change = StatusChange::revert_check_in(now);
            match self
                .queue
                .store
                .transition(entry.id, QueueStatus::PendingVerification, &change, None)
                .await
            {
                Ok(Some(updated)) => {
                    tracing::info!(entry_id = %updated.id, salon_id = updated.salon_id, "Check-in expired");
                    self.queue.log_outcome(&updated, CheckInOutcome::Expired).await;
                    salons.insert(updated.salon_id);
                    reverted += 1;
                }
                Ok(None) => {
                    tracing::debug!(entry_id = %entry.id, "Check-in already handled, skipping");
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Failed to revert check-in");
                }
            }
        }

        for salon_id in salons {
            publish_snapshot(self.queue.store.as_ref(), &self.queue.gateway, salon_id).await;
        }
        Ok(reverted)
    }

    /// Mark entries that never showed up. Returns how many were marked.
    pub async fn sweep_queue_timeouts(&self) -> AppResult<usize> {
        let now = self.queue.clock.now();
        let cutoff = now - self.config.queue_timeout();
        let expired = self.queue.store.expired_waiting(cutoff).await?;

        let mut salons = BTreeSet::new();
        let mut marked = 0;
        for entry in expired {
            let change = StatusChange::to(QueueStatus::NoShow, now).with_reason(AUTO_REJECT_REASON);
            let updated = match self
                .queue
                .store
                .transition(entry.id, entry.status, &change, None)
                .await
            {
                Ok(Some(updated)) => updated,
                Ok(None) => {
                    tracing::debug!(entry_id = %entry.id, "Entry moved on before timeout, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Failed to mark no-show");
                    continue;
                }
            };

            tracing::info!(
                entry_id = %updated.id,
                salon_id = updated.salon_id,
                customer_id = updated.customer_id,
                "Queue entry timed out"
            );
            self.queue.log_outcome(&updated, CheckInOutcome::NoShow).await;

            if let Some(event) = stage_event(&updated, 0) {
                self.queue.gateway.broadcast_to_salon(updated.salon_id, &event).await;
                self.queue.gateway.send_to_user(updated.customer_id, &event).await;
            }
            self.queue
                .notifier
                .send(Notification {
                    user_id: updated.customer_id,
                    kind: NotificationKind::MarkedNoShow,
                    salon_id: updated.salon_id,
                    entry_id: updated.id,
                    title: "Removed from queue".to_string(),
                    body: "You were removed from the queue after waiting too long".to_string(),
                })
                .await;

            salons.insert(updated.salon_id);
            marked += 1;
        }

        for salon_id in salons {
            publish_snapshot(self.queue.store.as_ref(), &self.queue.gateway, salon_id).await;
        }
        Ok(marked)
    }
}

/// Handles of the running background jobs
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn both sweeps and the WebSocket heartbeat.
    ///
    /// Each sweep runs once right away, then on its configured period.
    pub fn start(sweeper: Arc<TimeoutSweeper>, gateway: Arc<Gateway>, cancel: CancellationToken) -> Self {
        let check_in_period = sweeper.config.check_in_interval();
        let queue_period = sweeper.config.queue_interval();

        let pending = sweeper.clone();
        let timeouts = sweeper;
        let handles = vec![
            spawn_sweep("pending_verification", check_in_period, cancel.clone(), move || {
                let sweeper = pending.clone();
                async move { sweeper.sweep_pending_verifications().await }
            }),
            spawn_sweep("queue_timeout", queue_period, cancel.clone(), move || {
                let sweeper = timeouts.clone();
                async move { sweeper.sweep_queue_timeouts().await }
            }),
            spawn_heartbeat(gateway, cancel.clone()),
        ];

        Self { cancel, handles }
    }

    /// Stop every job and wait for them to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background job ended abnormally");
            }
        }
        tracing::info!("Background jobs stopped");
    }
}

fn spawn_sweep<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, sweep: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(job = name, interval_secs = period.as_secs(), "Sweep job started");
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(job = name, "Sweep job stopping");
                    break;
                }
                _ = interval.tick() => {
                    match sweep().await {
                        Ok(0) => tracing::debug!(job = name, "Sweep: nothing to do"),
                        Ok(count) => tracing::info!(job = name, count, "Sweep: entries updated"),
                        Err(e) => tracing::error!(job = name, error = %e, "Sweep failed"),
                    }
                }
            }
        }
    })
}

fn spawn_heartbeat(gateway: Arc<Gateway>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let count = gateway.connection_count().await;
                    tracing::debug!(count, "WebSocket heartbeat ping");
                    gateway.ping_all().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::CheckIn,
        repository::QueueStore,
        services::queue::tests::{customer, fixture, Fixture},
    };
    use chrono::Duration as ChronoDuration;

    fn sweeper(f: &Fixture) -> TimeoutSweeper {
        TimeoutSweeper::new(f.service.clone(), SweeperConfig::default())
    }

    fn at_door() -> CheckIn {
        CheckIn {
            latitude: 48.8570,
            longitude: 2.3522,
        }
    }

    fn across_town() -> CheckIn {
        CheckIn {
            latitude: 48.8666,
            longitude: 2.3522,
        }
    }

    #[tokio::test]
    async fn test_queue_timeout_boundary() {
        let f = fixture().await;
        let sweeper = sweeper(&f);
        let a = f.join(10).await;
        let joined = a.entry.created_at;

        f.clock.set(joined + ChronoDuration::minutes(29));
        assert_eq!(sweeper.sweep_queue_timeouts().await.unwrap(), 0);
        f.clock.set(joined + ChronoDuration::minutes(30));
        assert_eq!(sweeper.sweep_queue_timeouts().await.unwrap(), 0);

        let swept_at = joined + ChronoDuration::minutes(31);
        f.clock.set(swept_at);
        assert_eq!(sweeper.sweep_queue_timeouts().await.unwrap(), 1);

        let entry = f.store.get_entry(a.entry.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::NoShow);
        assert_eq!(entry.no_show_marked_at, Some(swept_at));
        assert_eq!(entry.no_show_reason.as_deref(), Some(AUTO_REJECT_REASON));
        assert_eq!(
            f.store.check_in_log().await.last().map(|r| r.outcome),
            Some(CheckInOutcome::NoShow)
        );

        // Nothing left to do on the next pass
        assert_eq!(sweeper.sweep_queue_timeouts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_timeout_skips_arrived_entries() {
        let f = fixture().await;
        let sweeper = sweeper(&f);
        let a = f.join(10).await;
        let b = f.join(11).await;
        f.service
            .check_in(customer(11), b.entry.id, at_door())
            .await
            .unwrap();

        f.clock.advance(ChronoDuration::hours(2));
        assert_eq!(sweeper.sweep_queue_timeouts().await.unwrap(), 1);
        assert_eq!(f.store.get_entry(a.entry.id).await.unwrap().status, QueueStatus::NoShow);
        assert_eq!(f.store.get_entry(b.entry.id).await.unwrap().status, QueueStatus::Nearby);
    }

    #[tokio::test]
    async fn test_no_show_reaches_customer() {
        let f = fixture().await;
        let sweeper = sweeper(&f);
        let a = f.join(10).await;
        let (conn, mut rx) = f.gateway.register().await;
        f.gateway.authenticate(&conn, 10).await;

        f.clock.advance(ChronoDuration::minutes(45));
        sweeper.sweep_queue_timeouts().await.unwrap();

        let mut no_shows = Vec::new();
        while let Ok(axum::extract::ws::Message::Text(text)) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["type"] == "no_show" {
                no_shows.push(value["entry_id"].as_str().unwrap().to_string());
            }
        }
        // Once through the salon broadcast and once addressed to the customer
        assert_eq!(no_shows.len(), 2);
        assert!(no_shows.iter().all(|id| *id == a.entry.id.to_string()));
    }

    #[tokio::test]
    async fn test_pending_verification_boundary() {
        let f = fixture().await;
        let sweeper = sweeper(&f);
        let a = f.join(10).await;
        let pending = f
            .service
            .check_in(customer(10), a.entry.id, across_town())
            .await
            .unwrap();
        let attempted = pending.entry.check_in_attempted_at.unwrap();

        f.clock.set(attempted + ChronoDuration::seconds(299));
        assert_eq!(sweeper.sweep_pending_verifications().await.unwrap(), 0);

        f.clock.set(attempted + ChronoDuration::seconds(301));
        assert_eq!(sweeper.sweep_pending_verifications().await.unwrap(), 1);

        let entry = f.store.get_entry(a.entry.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Notified);
        assert!(entry.check_in_attempted_at.is_none());
        assert!(entry.verification_distance_m.is_none());
        assert_eq!(
            f.store.check_in_log().await.last().map(|r| r.outcome),
            Some(CheckInOutcome::Expired)
        );
    }

    #[tokio::test]
    async fn test_scheduler_runs_on_start() {
        let f = fixture().await;
        let a = f.join(10).await;
        f.clock.advance(ChronoDuration::hours(1));

        let scheduler = Scheduler::start(
            Arc::new(sweeper(&f)),
            f.gateway.clone(),
            CancellationToken::new(),
        );

        let mut status = QueueStatus::Waiting;
        for _ in 0..50 {
            status = f.store.get_entry(a.entry.id).await.unwrap().status;
            if status == QueueStatus::NoShow {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        scheduler.shutdown().await;
        assert_eq!(status, QueueStatus::NoShow);
    }
}
