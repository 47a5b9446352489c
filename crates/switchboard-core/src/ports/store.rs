//! RouterStore port - 状態の正本（source of truth）
//!
//! RouterStore は以下を管理します：
//! - Score records
//! - Worklist entries
//! - Callbacks
//! - Transition audit
//! - ジョブの lease / cursor / checkpoint
//!
//! # 設計原則
//! - 1 メソッド = 1 トランザクション。途中状態は他の reader から見えない。
//! - 状態遷移（claim / swap / override）と transition 記録は同一トランザクション内
//! - claim の権威はここにある（conditional update / compare-and-swap）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AgentId, Callback, CallbackId, Candidate, ClaimOutcome, EntryId, JobCursor, LeadId, QueueType, RankKey,
    RefreshCheckpoint, Result, ScoreRecord, TransitionDraft, TransitionId, TransitionRecord, WorklistEntry,
};

/// Score save with optimistic concurrency.
#[derive(Debug, Clone)]
pub struct ScoreWrite {
    pub record: ScoreRecord,
    /// `None` inserts a new record (fails if one exists); `Some(v)` updates only
    /// if the stored version is still `v`.
    pub expected_version: Option<u64>,
    /// Written in the same transaction as the score.
    pub transition: Option<TransitionDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The stored record (with its bumped version).
    Saved(ScoreRecord),
    VersionConflict,
}

/// Atomic replacement of one queue type's generated pending entries.
#[derive(Debug, Clone)]
pub struct WorklistSwap {
    pub queue_type: QueueType,
    /// Ranked, best first.
    pub candidates: Vec<Candidate>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapReport {
    pub generation: u64,
    pub inserted: usize,
    pub retained: usize,
    pub removed: usize,
    /// Candidates that kept their slot through an assigned or callback entry,
    /// or no longer matched the queue type at swap time.
    pub skipped: usize,
}

/// Removal of a pending entry whose lead drifted out of its queue type.
#[derive(Debug, Clone)]
pub struct DriftRemoval {
    pub entry_id: EntryId,
    /// The live classification (`none` when the lead is no longer eligible).
    pub live_queue_type: QueueType,
    pub reason: String,
    pub now: DateTime<Utc>,
}

/// `assigned → completed` together with the outcome's score write.
#[derive(Debug, Clone)]
pub struct CallCompletion {
    pub entry_id: EntryId,
    pub score: ScoreWrite,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed { entry: WorklistEntry, score: ScoreRecord },
    /// The score moved since it was read; nothing was written.
    VersionConflict,
}

#[derive(Debug, Clone)]
pub struct CallbackAccept {
    pub callback_id: CallbackId,
    pub agent_id: AgentId,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallbackSnooze {
    pub callback_id: CallbackId,
    pub until: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnoozeReport {
    pub callback: Callback,
    pub removed_entries: usize,
}

/// Aggregates for queue health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorklistCounts {
    pub pending_by_type: HashMap<QueueType, usize>,
    pub assigned_by_type: HashMap<QueueType, usize>,
    /// Assigned before the cutoff, or pending for a lead whose score record is
    /// inactive or of another queue type.
    pub orphaned: usize,
}

#[async_trait]
pub trait RouterStore: Send + Sync {
    // ── score records ────────────────────────────────────────────────────────

    async fn get_score(&self, lead_id: &LeadId) -> Result<Option<ScoreRecord>>;

    async fn get_scores(&self, lead_ids: &[LeadId]) -> Result<HashMap<LeadId, ScoreRecord>>;

    async fn save_score(&self, write: ScoreWrite) -> Result<SaveOutcome>;

    /// Active records of one queue type ordered by `RankKey`, strictly after `after`.
    async fn list_active_scores(
        &self,
        queue_type: QueueType,
        after: Option<&RankKey>,
        limit: usize,
    ) -> Result<Vec<ScoreRecord>>;

    // ── worklist ─────────────────────────────────────────────────────────────

    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<WorklistEntry>>;

    async fn active_entries_for_lead(&self, lead_id: &LeadId) -> Result<Vec<WorklistEntry>>;

    async fn list_entries(&self, queue_type: QueueType) -> Result<Vec<WorklistEntry>>;

    async fn swap_worklist(&self, swap: WorklistSwap) -> Result<SwapReport>;

    /// Best pending entry visible to `agent` at `now`.
    async fn best_pending(
        &self,
        queue_type: QueueType,
        agent: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorklistEntry>>;

    /// Returns false when the entry was no longer pending (claimed or removed meanwhile).
    async fn remove_drifted_entry(&self, removal: DriftRemoval) -> Result<bool>;

    /// `pending → assigned`, only if still pending.
    async fn claim_entry(&self, entry_id: EntryId, agent: &AgentId, now: DateTime<Utc>) -> Result<ClaimOutcome>;

    /// `assigned → completed` and the outcome's score save in one transaction;
    /// closes a linked callback.
    async fn complete_entry(&self, completion: CallCompletion) -> Result<CompletionOutcome>;

    /// Keeps the newest active entry per lead and removes the rest.
    async fn reconcile_duplicate_entries(&self, now: DateTime<Utc>) -> Result<Vec<EntryId>>;

    async fn worklist_counts(&self, orphan_before: DateTime<Utc>) -> Result<WorklistCounts>;

    async fn last_refresh(&self, queue_type: QueueType) -> Result<Option<DateTime<Utc>>>;

    /// Deletes completed/removed entries closed before `before`.
    async fn purge_closed_entries(&self, before: DateTime<Utc>) -> Result<usize>;

    // ── callbacks ────────────────────────────────────────────────────────────

    async fn insert_callback(&self, callback: Callback) -> Result<()>;

    async fn get_callback(&self, callback_id: CallbackId) -> Result<Option<Callback>>;

    async fn accept_callback(&self, accept: CallbackAccept) -> Result<WorklistEntry>;

    async fn snooze_callback(&self, snooze: CallbackSnooze) -> Result<SnoozeReport>;

    /// Pending callbacks due at `now` that can be promoted right away: not yet
    /// materialized, lead in a routable queue, no assigned or callback entry.
    async fn due_callbacks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Callback>>;

    /// Inserts unless the lead already has an active entry.
    async fn insert_callback_entry(&self, entry: WorklistEntry) -> Result<bool>;

    // ── transition audit ─────────────────────────────────────────────────────

    async fn append_transition(&self, draft: TransitionDraft, now: DateTime<Utc>) -> Result<TransitionRecord>;

    /// Newest first.
    async fn list_transitions(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<TransitionRecord>>;

    /// Exits with `conversion_logged = false` since `since`, oldest first.
    async fn unreconciled_exits(&self, since: DateTime<Utc>) -> Result<Vec<TransitionRecord>>;

    async fn mark_conversion_logged(&self, ids: &[TransitionId]) -> Result<usize>;

    async fn purge_transitions(&self, before: DateTime<Utc>) -> Result<usize>;

    // ── job coordination ─────────────────────────────────────────────────────

    /// Takes the lease if free or expired. Not re-entrant: a second call with the
    /// same holder while the lease is live fails.
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool>;

    async fn release_lease(&self, key: &str, holder: &str) -> Result<bool>;

    async fn load_refresh_checkpoint(&self, queue_type: QueueType) -> Result<Option<RefreshCheckpoint>>;

    async fn save_refresh_checkpoint(&self, checkpoint: RefreshCheckpoint) -> Result<()>;

    async fn clear_refresh_checkpoint(&self, queue_type: QueueType) -> Result<()>;

    async fn load_job_cursor(&self, job: &str) -> Result<Option<JobCursor>>;

    async fn save_job_cursor(&self, job: &str, cursor: Option<JobCursor>) -> Result<()>;
}
