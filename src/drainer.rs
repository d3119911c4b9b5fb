use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Why a drain was asked for. The drainer treats every task the same way;
/// the reason only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTask {
    SlotReleased(crate::model::SlotId),
    SlotsAdded(u32),
    /// A vehicle joined the queue while a slot may have been freed.
    QueueJoined,
}

/// Sending half of the drain channel. Scheduling never blocks and never fails
/// the caller; a dropped task is picked up by the next periodic sweep.
#[derive(Clone)]
pub struct DrainQueue {
    tx: mpsc::Sender<DrainTask>,
}

impl DrainQueue {
    pub fn schedule(&self, task: DrainTask) {
        if let Err(e) = self.tx.try_send(task) {
            debug!("drain task {task:?} not queued: {e}");
        }
    }

    /// A queue with no worker behind it. Drains then only happen when called
    /// directly.
    pub fn detached() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }
}

pub fn drain_queue(capacity: usize) -> (DrainQueue, mpsc::Receiver<DrainTask>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DrainQueue { tx }, rx)
}

/// Background worker that seats queued vehicles. Runs on every scheduled task
/// and on a fixed sweep, which also retries drains that failed earlier.
pub async fn run_drainer(engine: Arc<Engine>, mut rx: mpsc::Receiver<DrainTask>, sweep: Duration) {
    let mut interval = tokio::time::interval(sweep);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            task = rx.recv() => {
                let Some(task) = task else { break };
                debug!("drain requested: {task:?}");
                // Coalesce a burst of departures into one pass.
                while rx.try_recv().is_ok() {}
                drain_now(&engine).await;
            }
            _ = interval.tick() => drain_now(&engine).await,
        }
    }
}

async fn drain_now(engine: &Engine) {
    match engine.drain_all().await {
        Ok(0) => {}
        Ok(seated) => info!("drainer seated {seated} queued vehicles"),
        Err(e) => warn!("drain failed, retrying on next sweep: {e}"),
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use crate::rent::Tariff;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkway_test_drainer");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn departure_triggers_background_drain() {
        let (drains, rx) = drain_queue(16);
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = Arc::new(
            Engine::new(test_wal_path("departure_drain.wal"), clock, Tariff::default(), drains)
                .unwrap(),
        );
        // Long sweep so only the scheduled task can do the work.
        tokio::spawn(run_drainer(engine.clone(), rx, Duration::from_secs(3600)));

        engine.initialize_slots(1).await.unwrap();
        engine.arrive("AB-123", None).await.unwrap();
        engine.arrive("CD-456", None).await.unwrap();
        engine.depart("AB-123").await.unwrap();

        let seated = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if engine.status().await.queued_vehicles == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(seated.is_ok(), "queued vehicle was never seated");

        let vehicle = engine.vehicle("CD-456");
        assert_eq!(vehicle.stage, Stage::Occupying);
        assert_eq!(
            engine.status().await,
            Status {
                total_slots: 1,
                free_slots: 0,
                queued_vehicles: 0
            }
        );
    }

    #[tokio::test]
    async fn detached_queue_drops_tasks_quietly() {
        let drains = DrainQueue::detached();
        drains.schedule(DrainTask::SlotReleased(1));
        drains.schedule(DrainTask::QueueJoined);
    }

    #[tokio::test]
    async fn full_queue_does_not_block() {
        let (drains, _rx) = drain_queue(1);
        drains.schedule(DrainTask::SlotsAdded(1));
        drains.schedule(DrainTask::SlotsAdded(2));
    }
}
