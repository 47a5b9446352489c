//! JobGroup - 定期ジョブの実行
//!
//! 各ジョブは独立した tokio task。`watch` channel で停止を伝え、
//! `shutdown_and_join()` で全部の終了を待つ。実行中のジョブ本体は中断しない
//! （次の tick を取らなくなるだけ）。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app::router::Router;
use crate::config::ScheduleConfig;
use crate::domain::{ErrorKind, QueueType, Result};

/// Periodic job handle.
/// - `request_shutdown()` でループ全体が止まる
/// - `shutdown_and_join()` で全ジョブの終了を待てる
pub struct JobGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl JobGroup {
    /// Spawns the scoring cycle, one refresh loop per routable queue type,
    /// callback promotion, the leak scan and the retention sweep.
    pub fn spawn(router: Arc<Router>, schedule: &ScheduleConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::new();

        let r = Arc::clone(&router);
        joins.push(spawn_job(
            "scoring",
            every(schedule.scoring_every_secs),
            shutdown_rx.clone(),
            move || {
                let r = Arc::clone(&r);
                async move { r.run_scoring_cycle().await.map(|_| ()) }
            },
        ));

        for queue_type in QueueType::ROUTABLE {
            let r = Arc::clone(&router);
            joins.push(spawn_job(
                "refresh",
                every(schedule.refresh_every_secs),
                shutdown_rx.clone(),
                move || {
                    let r = Arc::clone(&r);
                    async move { r.refresh(queue_type).await.map(|_| ()) }
                },
            ));
        }

        let r = Arc::clone(&router);
        joins.push(spawn_job(
            "callbacks",
            every(schedule.callbacks_every_secs),
            shutdown_rx.clone(),
            move || {
                let r = Arc::clone(&r);
                async move { r.promote_due_callbacks().await.map(|_| ()) }
            },
        ));

        let r = Arc::clone(&router);
        joins.push(spawn_job(
            "leak-scan",
            every(schedule.leak_scan_every_secs),
            shutdown_rx.clone(),
            move || {
                let r = Arc::clone(&r);
                async move { r.run_leak_scan().await.map(|_| ()) }
            },
        ));

        let r = Arc::clone(&router);
        joins.push(spawn_job(
            "retention",
            every(schedule.retention_every_secs),
            shutdown_rx,
            move || {
                let r = Arc::clone(&r);
                async move { r.sweep_retention().await.map(|_| ()) }
            },
        ));

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all jobs.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all jobs.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

fn every(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // shutdown が来ていたら抜ける
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender が消えたら止める
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            if let Err(err) = tick().await {
                match err.kind() {
                    ErrorKind::Infrastructure => tracing::error!(job = name, error = %err, "job failed"),
                    ErrorKind::Transient | ErrorKind::Permanent => {
                        tracing::warn!(job = name, error = %err, "job failed")
                    }
                }
            }
        }
        tracing::debug!(job = name, "job stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::RouterBuilder;
    use crate::domain::{EligibilityFacts, LeadId};
    use crate::impls::{InMemoryConversionLedger, InMemoryStore, StaticEligibilitySource};
    use crate::ports::RouterStore;

    #[tokio::test]
    async fn jobs_run_and_stop_on_shutdown() {
        let source = Arc::new(StaticEligibilitySource::new());
        source.set("a", EligibilityFacts::new(false, 0));
        let store = Arc::new(InMemoryStore::default());
        let router = RouterBuilder::new()
            .store(store.clone())
            .eligibility(source)
            .ledger(Arc::new(InMemoryConversionLedger::new()))
            .build()
            .unwrap();

        let jobs = JobGroup::spawn(Arc::new(router), &ScheduleConfig::default());
        assert_eq!(jobs.len(), 6);

        // The first tick of every interval fires immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        jobs.shutdown_and_join().await;

        assert!(store.get_score(&LeadId::new("a")).await.unwrap().is_some());
    }
}
