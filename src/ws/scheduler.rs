//! Background tasks of the collaboration service and its lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::coordinator::{CollabSettings, Coordinator};
use crate::db::NoteStore;

/// A running coordinator with its queue workers and periodic tasks
pub struct Collab {
    coordinator: Arc<Coordinator>,
    workers: Vec<JoinHandle<()>>,
    periodic: Vec<JoinHandle<()>>,
}

impl Collab {
    pub fn start(store: Arc<dyn NoteStore>, settings: CollabSettings) -> Self {
        let (coordinator, admissions, drains) = Coordinator::new(store);

        let admitting = coordinator.clone();
        let draining = coordinator.clone();
        let workers = vec![
            admissions.spawn(move |conn| {
                let coordinator = admitting.clone();
                async move {
                    let _ = coordinator.admit(conn).await;
                }
            }),
            drains.spawn(move |job| {
                let coordinator = draining.clone();
                async move {
                    coordinator.release(&job.conn_id).await;
                }
            }),
        ];

        let periodic = vec![
            tokio::spawn(flush_loop(coordinator.clone(), settings.flush_interval)),
            tokio::spawn(revision_loop(coordinator.clone(), settings.revision_interval)),
            tokio::spawn(reaper_loop(coordinator.clone(), settings.reaper_interval)),
        ];

        info!(
            "Collaboration started (flush every {:?}, revisions every {:?}, reaper every {:?})",
            settings.flush_interval, settings.revision_interval, settings.reaper_interval
        );
        Self { coordinator, workers, periodic }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Stop the periodic tasks and write out whatever is still dirty.
    pub async fn shutdown(self) {
        for task in &self.periodic {
            task.abort();
        }
        let report = self.coordinator.flush_dirty().await;
        info!("Collaboration stopped, final flush wrote {} notes", report.flushed);
        for worker in &self.workers {
            worker.abort();
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks
}

async fn flush_loop(coordinator: Arc<Coordinator>, period: Duration) {
    let mut ticks = ticker(period);
    loop {
        ticks.tick().await;
        coordinator.flush_dirty().await;
    }
}

/// Snapshots revisions on a long period. Sleeps until the next flush when a
/// pass finds nothing to do.
async fn revision_loop(coordinator: Arc<Coordinator>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;
        if coordinator.snapshot_revisions().await == 0 {
            debug!("No revisions pending, waiting for edits");
            coordinator.wait_for_activity().await;
        }
    }
}

async fn reaper_loop(coordinator: Arc<Coordinator>, period: Duration) {
    let mut ticks = ticker(period);
    loop {
        ticks.tick().await;
        let reaped = coordinator.reap().await;
        if reaped > 0 {
            info!("Reaper queued {} stale connections", reaped);
        }
    }
}
