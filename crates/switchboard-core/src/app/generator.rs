//! QueueGenerator - queue type ごとの top-N ワークリスト
//!
//! # フロー
//! 1. lease `refresh:<queue_type>` を取る（取れなければ busy で何も書かない）
//! 2. 重複 active entry を reconcile（不変条件違反なので error ログ）
//! 3. checkpoint から再開し、keyset でスコア順にページング
//! 4. `swap_worklist` で一括入れ替え（読者は新旧どちらかしか見ない）
//! 5. checkpoint を消して lease を返す
//!
//! 締め切りに達したら checkpoint を保存して `timed_out` で返す。

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use ulid::Ulid;

use crate::config::GeneratorConfig;
use crate::domain::{Candidate, QueueType, RankKey, RefreshCheckpoint, Result, RouterError};
use crate::ports::{Clock, RouterStore, WorklistSwap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Completed,
    /// Another generator holds the lease.
    Busy,
    /// Deadline reached; progress was checkpointed.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub queue_type: QueueType,
    pub status: RefreshStatus,
    pub populated: usize,
    pub retained: usize,
    pub removed: usize,
    pub skipped: usize,
    /// Duplicate active entries removed before the scan.
    pub reconciled: usize,
    pub generation: Option<u64>,
}

impl RefreshReport {
    fn empty(queue_type: QueueType, status: RefreshStatus) -> Self {
        Self {
            queue_type,
            status,
            populated: 0,
            retained: 0,
            removed: 0,
            skipped: 0,
            reconciled: 0,
            generation: None,
        }
    }
}

pub struct QueueGenerator {
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
    config: GeneratorConfig,
    holder: String,
}

impl QueueGenerator {
    pub fn new(store: Arc<dyn RouterStore>, clock: Arc<dyn Clock>, config: GeneratorConfig) -> Self {
        Self {
            store,
            clock,
            config,
            holder: format!("generator-{}", Ulid::new()),
        }
    }

    /// Lease holder prefix of this instance. Each run appends its own token.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn refresh(&self, queue_type: QueueType) -> Result<RefreshReport> {
        if !queue_type.is_routable() {
            return Err(RouterError::InvalidQueueType(queue_type));
        }

        let key = format!("refresh:{queue_type}");
        // One token per run, so two runs on the same instance exclude each other too.
        let holder = format!("{}-{}", self.holder, Ulid::new());
        let acquired = self
            .store
            .try_acquire_lease(&key, &holder, self.clock.now(), self.config.lease_ttl())
            .await?;
        if !acquired {
            tracing::info!(queue_type = %queue_type, "refresh already running elsewhere");
            return Ok(RefreshReport::empty(queue_type, RefreshStatus::Busy));
        }

        let result = self.refresh_leased(queue_type).await;

        if let Err(err) = self.store.release_lease(&key, &holder).await {
            // The lease expires on its own.
            tracing::warn!(queue_type = %queue_type, error = %err, "failed to release refresh lease");
        }
        result
    }

    async fn refresh_leased(&self, queue_type: QueueType) -> Result<RefreshReport> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = RefreshReport::empty(queue_type, RefreshStatus::Completed);

        let reconciled = self.store.reconcile_duplicate_entries(now).await?;
        if !reconciled.is_empty() {
            tracing::error!(
                queue_type = %queue_type,
                count = reconciled.len(),
                "duplicate active entries found and reconciled"
            );
        }
        report.reconciled = reconciled.len();

        let mut checkpoint = match self.store.load_refresh_checkpoint(queue_type).await? {
            Some(checkpoint) if !checkpoint.is_stale(self.config.checkpoint_max_age(), now) => {
                tracing::debug!(
                    queue_type = %queue_type,
                    collected = checkpoint.candidates.len(),
                    "resuming refresh from checkpoint"
                );
                checkpoint
            }
            Some(_) => {
                tracing::warn!(queue_type = %queue_type, "discarding stale refresh checkpoint");
                RefreshCheckpoint::start(queue_type, now)
            }
            None => RefreshCheckpoint::start(queue_type, now),
        };

        let worklist_size = self.config.worklist_size;
        while checkpoint.candidates.len() < worklist_size {
            if started.elapsed() >= self.config.max_duration() {
                checkpoint.updated_at = self.clock.now();
                self.store.save_refresh_checkpoint(checkpoint).await?;
                tracing::warn!(queue_type = %queue_type, "refresh hit its deadline, checkpoint saved");
                report.status = RefreshStatus::TimedOut;
                return Ok(report);
            }

            let limit = self.config.page_size.max(1).min(worklist_size - checkpoint.candidates.len());
            let page = self
                .store
                .list_active_scores(queue_type, checkpoint.cursor.as_ref(), limit)
                .await?;
            let exhausted = page.len() < limit;
            if let Some(last) = page.last() {
                checkpoint.cursor = Some(RankKey::of(last));
            }
            // A rank key that moved between pages can bring a lead back a second time.
            for record in &page {
                if !checkpoint.candidates.iter().any(|c| c.lead_id == record.lead_id) {
                    checkpoint.candidates.push(Candidate::from(record));
                }
            }
            checkpoint.updated_at = self.clock.now();
            if exhausted {
                break;
            }
        }

        let swap = self
            .store
            .swap_worklist(WorklistSwap {
                queue_type,
                candidates: checkpoint.candidates,
                now: self.clock.now(),
            })
            .await?;
        self.store.clear_refresh_checkpoint(queue_type).await?;

        report.populated = swap.inserted;
        report.retained = swap.retained;
        report.removed = swap.removed;
        report.skipped = swap.skipped;
        report.generation = Some(swap.generation);
        tracing::info!(
            queue_type = %queue_type,
            generation = swap.generation,
            populated = swap.inserted,
            retained = swap.retained,
            removed = swap.removed,
            skipped = swap.skipped,
            "worklist refreshed"
        );
        Ok(report)
    }

    /// Refreshes every routable queue type concurrently.
    pub async fn refresh_all(&self) -> Result<Vec<RefreshReport>> {
        let [first, second] = QueueType::ROUTABLE;
        let (a, b) = tokio::join!(self.refresh(first), self.refresh(second));
        Ok(vec![a?, b?])
    }
}
