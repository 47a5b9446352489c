//! InMemoryStore - 開発・テスト用の RouterStore
//!
//! # 実装詳細
//! - すべてのテーブルを 1 つの `tokio::sync::Mutex` で守る
//! - 1 メソッド呼び出し = 1 トランザクション（ロックを取って、全部書いて、離す）
//! - ロックを保持したまま await しない
//! - `set_unavailable(true)` でストレージ障害を再現できる

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::domain::{
    AgentId, Callback, CallbackId, CallbackStatus, Candidate, ClaimOutcome, ConflictReason, EntryId, EntryOrigin,
    EntryStatus, JobCursor, LeadId, Priority, QueueType, RankKey, RefreshCheckpoint, Result, RouterError,
    ScoreRecord, TransitionDraft, TransitionId, TransitionRecord, TransitionSource, WorklistEntry,
};
use crate::ports::{
    CallCompletion, CallbackAccept, CallbackSnooze, CompletionOutcome, DriftRemoval, IdGenerator, RouterStore,
    SaveOutcome, ScoreWrite, SnoozeReport, SwapReport, SystemClock, UlidGenerator, WorklistCounts, WorklistSwap,
};

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    scores: HashMap<LeadId, ScoreRecord>,
    entries: HashMap<EntryId, WorklistEntry>,
    callbacks: HashMap<CallbackId, Callback>,
    /// Append order.
    transitions: Vec<TransitionRecord>,
    leases: HashMap<String, Lease>,
    checkpoints: HashMap<QueueType, RefreshCheckpoint>,
    cursors: HashMap<String, JobCursor>,
    generations: HashMap<QueueType, u64>,
    last_refresh: HashMap<QueueType, DateTime<Utc>>,
}

impl StoreState {
    fn push_transition(&mut self, ids: &dyn IdGenerator, draft: TransitionDraft, now: DateTime<Utc>) {
        let record = draft.stamp(ids.transition_id(), now);
        self.transitions.push(record);
    }

    fn active_entry_ids_for(&self, lead_id: &LeadId) -> Vec<EntryId> {
        let mut ids: Vec<_> = self
            .entries
            .values()
            .filter(|e| &e.lead_id == lead_id && e.status.is_active())
            .map(|e| (e.created_at, e.entry_id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// A due callback can become an entry now: the lead sits in a routable queue
    /// and holds nothing but pending generated entries.
    fn is_promotable(&self, lead_id: &LeadId) -> bool {
        let routable = self
            .scores
            .get(lead_id)
            .is_some_and(|s| s.is_active && s.queue_type.is_routable());
        routable
            && self
                .entries
                .values()
                .filter(|e| &e.lead_id == lead_id && e.status.is_active())
                .all(|e| e.status == EntryStatus::Pending && e.origin == EntryOrigin::Generated)
    }

    /// Removes one entry and audits it as a worklist removal within its queue.
    fn remove_entry(
        &mut self,
        ids: &dyn IdGenerator,
        entry_id: EntryId,
        source: TransitionSource,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<QueueType> {
        let entry = self.entries.get_mut(&entry_id)?;
        entry.remove(reason, now);
        let draft = TransitionDraft::new(entry.lead_id.clone(), entry.queue_type, entry.queue_type, source, reason);
        let queue_type = entry.queue_type;
        self.push_transition(ids, draft, now);
        Some(queue_type)
    }
}

/// In-memory RouterStore.
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    ids: Arc<dyn IdGenerator>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            ids,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates a storage outage: every call fails with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Writes an entry without any invariant check. Used by fixtures and imports.
    pub async fn insert_entry_unchecked(&self, entry: WorklistEntry) -> Result<()> {
        let mut state = self.lock().await?;
        state.entries.insert(entry.entry_id, entry);
        Ok(())
    }

    pub async fn all_transitions(&self) -> Result<Vec<TransitionRecord>> {
        let state = self.lock().await?;
        Ok(state.transitions.clone())
    }

    async fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RouterError::StorageUnavailable("in-memory store marked unavailable".into()));
        }
        Ok(self.state.lock().await)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(UlidGenerator::new(SystemClock)))
    }
}

#[async_trait]
impl RouterStore for InMemoryStore {
    async fn get_score(&self, lead_id: &LeadId) -> Result<Option<ScoreRecord>> {
        let state = self.lock().await?;
        Ok(state.scores.get(lead_id).cloned())
    }

    async fn get_scores(&self, lead_ids: &[LeadId]) -> Result<HashMap<LeadId, ScoreRecord>> {
        let state = self.lock().await?;
        Ok(lead_ids
            .iter()
            .filter_map(|id| state.scores.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn save_score(&self, write: ScoreWrite) -> Result<SaveOutcome> {
        let mut state = self.lock().await?;
        let ScoreWrite {
            mut record,
            expected_version,
            transition,
        } = write;

        let current_version = state.scores.get(&record.lead_id).map(|r| r.version);
        match (expected_version, current_version) {
            (None, None) => record.version = 1,
            (Some(expected), Some(current)) if expected == current => record.version = current + 1,
            _ => return Ok(SaveOutcome::VersionConflict),
        }

        record.recompute();
        let now = record.updated_at;
        state.scores.insert(record.lead_id.clone(), record.clone());
        if let Some(draft) = transition {
            state.push_transition(self.ids.as_ref(), draft, now);
        }
        Ok(SaveOutcome::Saved(record))
    }

    async fn list_active_scores(
        &self,
        queue_type: QueueType,
        after: Option<&RankKey>,
        limit: usize,
    ) -> Result<Vec<ScoreRecord>> {
        let state = self.lock().await?;
        let mut ranked: Vec<(RankKey, &ScoreRecord)> = state
            .scores
            .values()
            .filter(|r| r.is_active && r.queue_type == queue_type)
            .map(|r| (RankKey::of(r), r))
            .filter(|(key, _)| after.is_none_or(|after| key > after))
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ranked.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }

    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<WorklistEntry>> {
        let state = self.lock().await?;
        Ok(state.entries.get(&entry_id).cloned())
    }

    async fn active_entries_for_lead(&self, lead_id: &LeadId) -> Result<Vec<WorklistEntry>> {
        let state = self.lock().await?;
        Ok(state
            .active_entry_ids_for(lead_id)
            .into_iter()
            .filter_map(|id| state.entries.get(&id).cloned())
            .collect())
    }

    async fn list_entries(&self, queue_type: QueueType) -> Result<Vec<WorklistEntry>> {
        let state = self.lock().await?;
        let mut entries: Vec<_> = state
            .entries
            .values()
            .filter(|e| e.queue_type == queue_type)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.rank_key());
        Ok(entries)
    }

    async fn swap_worklist(&self, swap: WorklistSwap) -> Result<SwapReport> {
        let mut state = self.lock().await?;
        let WorklistSwap {
            queue_type,
            candidates,
            now,
        } = swap;

        let generation = state.generations.get(&queue_type).copied().unwrap_or(0) + 1;
        let mut report = SwapReport {
            generation,
            ..SwapReport::default()
        };
        let mut keep: HashSet<LeadId> = HashSet::new();

        for Candidate {
            lead_id,
            score,
            last_queue_check,
        } in candidates
        {
            let still_matches = state
                .scores
                .get(&lead_id)
                .is_some_and(|r| r.is_active && r.queue_type == queue_type);
            if !still_matches {
                report.skipped += 1;
                continue;
            }

            let active = state.active_entry_ids_for(&lead_id);
            match active.first().and_then(|id| state.entries.get_mut(id)) {
                None => {
                    let entry = WorklistEntry::generated(
                        self.ids.entry_id(),
                        lead_id.clone(),
                        queue_type,
                        score,
                        last_queue_check,
                        generation,
                        now,
                    );
                    state.entries.insert(entry.entry_id, entry);
                    keep.insert(lead_id);
                    report.inserted += 1;
                }
                Some(entry)
                    if entry.status == EntryStatus::Pending
                        && entry.origin == EntryOrigin::Generated
                        && entry.queue_type == queue_type =>
                {
                    entry.priority = Priority::Scored(score);
                    entry.rank_check = last_queue_check;
                    entry.generation = Some(generation);
                    entry.updated_at = now;
                    keep.insert(lead_id);
                    report.retained += 1;
                }
                Some(entry) if entry.status == EntryStatus::Pending && entry.origin == EntryOrigin::Generated => {
                    // Left over from the lead's previous queue type.
                    let previous = entry.queue_type;
                    let reason = format!("moved from {previous} to {queue_type} worklist");
                    entry.remove(reason.clone(), now);
                    let draft = TransitionDraft::new(
                        lead_id.clone(),
                        previous,
                        queue_type,
                        TransitionSource::QueueGenerator,
                        reason,
                    );
                    state.push_transition(self.ids.as_ref(), draft, now);

                    let entry = WorklistEntry::generated(
                        self.ids.entry_id(),
                        lead_id.clone(),
                        queue_type,
                        score,
                        last_queue_check,
                        generation,
                        now,
                    );
                    state.entries.insert(entry.entry_id, entry);
                    keep.insert(lead_id);
                    report.inserted += 1;
                }
                Some(_) => report.skipped += 1,
            }
        }

        let displaced: Vec<EntryId> = state
            .entries
            .values()
            .filter(|e| {
                e.queue_type == queue_type
                    && e.status == EntryStatus::Pending
                    && e.origin == EntryOrigin::Generated
                    && !keep.contains(&e.lead_id)
            })
            .map(|e| e.entry_id)
            .collect();
        for entry_id in displaced {
            state.remove_entry(
                self.ids.as_ref(),
                entry_id,
                TransitionSource::QueueGenerator,
                "displaced from top-n",
                now,
            );
            report.removed += 1;
        }

        state.generations.insert(queue_type, generation);
        state.last_refresh.insert(queue_type, now);
        Ok(report)
    }

    async fn best_pending(
        &self,
        queue_type: QueueType,
        agent: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorklistEntry>> {
        let state = self.lock().await?;
        Ok(state
            .entries
            .values()
            .filter(|e| e.queue_type == queue_type && e.is_visible_to(agent, now))
            .min_by_key(|e| e.rank_key())
            .cloned())
    }

    async fn remove_drifted_entry(&self, removal: DriftRemoval) -> Result<bool> {
        let mut state = self.lock().await?;
        let DriftRemoval {
            entry_id,
            live_queue_type,
            reason,
            now,
        } = removal;

        let Some(entry) = state.entries.get_mut(&entry_id) else {
            return Ok(false);
        };
        if entry.status != EntryStatus::Pending {
            return Ok(false);
        }
        entry.remove(reason.clone(), now);
        let lead_id = entry.lead_id.clone();
        let entry_queue = entry.queue_type;

        // The score record follows the live classification. If it had already
        // moved, the queue-type change was audited then; this removal is audited
        // as a stale-entry cleanup within the entry's queue.
        let reclassified_here = match state.scores.get_mut(&lead_id) {
            Some(score) if score.queue_type != live_queue_type => {
                score.reclassify(live_queue_type);
                score.updated_at = now;
                score.version += 1;
                true
            }
            Some(_) => false,
            None => true,
        };
        let draft = if reclassified_here {
            TransitionDraft::new(
                lead_id,
                entry_queue,
                live_queue_type,
                TransitionSource::PreDispatchValidation,
                reason,
            )
        } else {
            TransitionDraft::new(
                lead_id,
                entry_queue,
                entry_queue,
                TransitionSource::PreDispatchValidation,
                format!("{reason}; lead already reclassified to {live_queue_type}"),
            )
        };
        state.push_transition(self.ids.as_ref(), draft, now);
        Ok(true)
    }

    async fn claim_entry(&self, entry_id: EntryId, agent: &AgentId, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let mut state = self.lock().await?;
        let Some(entry) = state.entries.get_mut(&entry_id) else {
            return Ok(ClaimOutcome::Conflict(ConflictReason::NotFound));
        };
        match entry.status {
            EntryStatus::Pending => {}
            EntryStatus::Assigned => return Ok(ClaimOutcome::Conflict(ConflictReason::AlreadyAssigned)),
            EntryStatus::Completed | EntryStatus::Removed => {
                return Ok(ClaimOutcome::Conflict(ConflictReason::NotPending));
            }
        }
        if entry.available_from > now {
            return Ok(ClaimOutcome::Conflict(ConflictReason::NotYetAvailable));
        }
        if entry.reserved_for.as_ref().is_some_and(|reserved| reserved != agent) {
            return Ok(ClaimOutcome::Conflict(ConflictReason::Reserved));
        }

        entry.assign(agent.clone(), now);
        let claimed = entry.clone();

        if let Some(callback) = claimed.callback_ref.and_then(|id| state.callbacks.get_mut(&id)) {
            callback.status = CallbackStatus::Accepted;
            callback.updated_at = now;
        }

        let live_queue = state.scores.get(&claimed.lead_id).map(|s| s.queue_type);
        if claimed.origin == EntryOrigin::Generated
            && let Some(live_queue) = live_queue
            && live_queue != claimed.queue_type
        {
            let draft = TransitionDraft::new(
                claimed.lead_id.clone(),
                claimed.queue_type,
                live_queue,
                TransitionSource::Claim,
                format!("claimed by {agent} while classified as {live_queue}"),
            );
            state.push_transition(self.ids.as_ref(), draft, now);
        }
        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn complete_entry(&self, completion: CallCompletion) -> Result<CompletionOutcome> {
        let mut state = self.lock().await?;
        let CallCompletion { entry_id, score, now } = completion;
        let ScoreWrite {
            mut record,
            expected_version,
            transition,
        } = score;

        let entry = state.entries.get(&entry_id).ok_or(RouterError::EntryNotFound(entry_id))?;
        if entry.status != EntryStatus::Assigned {
            return Err(RouterError::InvalidTransition {
                entry_id,
                from: entry.status.as_str(),
                to: EntryStatus::Completed.as_str(),
            });
        }
        if entry.lead_id != record.lead_id {
            return Ok(CompletionOutcome::VersionConflict);
        }
        let current_version = state.scores.get(&record.lead_id).map(|r| r.version);
        match (expected_version, current_version) {
            (None, None) => record.version = 1,
            (Some(expected), Some(current)) if expected == current => record.version = current + 1,
            _ => return Ok(CompletionOutcome::VersionConflict),
        }

        record.recompute();
        state.scores.insert(record.lead_id.clone(), record.clone());
        if let Some(draft) = transition {
            state.push_transition(self.ids.as_ref(), draft, now);
        }

        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or(RouterError::EntryNotFound(entry_id))?;
        entry.complete(now);
        let completed = entry.clone();

        if let Some(callback) = completed.callback_ref.and_then(|id| state.callbacks.get_mut(&id)) {
            callback.status = CallbackStatus::Completed;
            callback.updated_at = now;
        }
        Ok(CompletionOutcome::Completed {
            entry: completed,
            score: record,
        })
    }

    async fn reconcile_duplicate_entries(&self, now: DateTime<Utc>) -> Result<Vec<EntryId>> {
        let mut state = self.lock().await?;
        let mut by_lead: HashMap<LeadId, Vec<(DateTime<Utc>, EntryId)>> = HashMap::new();
        for entry in state.entries.values().filter(|e| e.status.is_active()) {
            by_lead
                .entry(entry.lead_id.clone())
                .or_default()
                .push((entry.created_at, entry.entry_id));
        }

        let mut removed = Vec::new();
        for (_, mut active) in by_lead.into_iter().filter(|(_, v)| v.len() > 1) {
            active.sort();
            // The most recent one survives.
            active.pop();
            for (_, entry_id) in active {
                state.remove_entry(
                    self.ids.as_ref(),
                    entry_id,
                    TransitionSource::Reconciliation,
                    "duplicate active entry",
                    now,
                );
                removed.push(entry_id);
            }
        }
        Ok(removed)
    }

    async fn worklist_counts(&self, orphan_before: DateTime<Utc>) -> Result<WorklistCounts> {
        let state = self.lock().await?;
        let mut counts = WorklistCounts::default();
        for entry in state.entries.values() {
            match entry.status {
                EntryStatus::Pending => {
                    *counts.pending_by_type.entry(entry.queue_type).or_default() += 1;
                    let stale = entry.origin == EntryOrigin::Generated
                        && !state
                            .scores
                            .get(&entry.lead_id)
                            .is_some_and(|s| s.is_active && s.queue_type == entry.queue_type);
                    if stale {
                        counts.orphaned += 1;
                    }
                }
                EntryStatus::Assigned => {
                    *counts.assigned_by_type.entry(entry.queue_type).or_default() += 1;
                    if entry.assigned_at.is_some_and(|at| at < orphan_before) {
                        counts.orphaned += 1;
                    }
                }
                EntryStatus::Completed | EntryStatus::Removed => {}
            }
        }
        Ok(counts)
    }

    async fn last_refresh(&self, queue_type: QueueType) -> Result<Option<DateTime<Utc>>> {
        let state = self.lock().await?;
        Ok(state.last_refresh.get(&queue_type).copied())
    }

    async fn purge_closed_entries(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock().await?;
        let before_len = state.entries.len();
        state
            .entries
            .retain(|_, e| !(e.status.is_terminal() && e.closed_at.is_some_and(|at| at < before)));
        Ok(before_len - state.entries.len())
    }

    async fn insert_callback(&self, callback: Callback) -> Result<()> {
        let mut state = self.lock().await?;
        state.callbacks.insert(callback.callback_id, callback);
        Ok(())
    }

    async fn get_callback(&self, callback_id: CallbackId) -> Result<Option<Callback>> {
        let state = self.lock().await?;
        Ok(state.callbacks.get(&callback_id).cloned())
    }

    async fn accept_callback(&self, accept: CallbackAccept) -> Result<WorklistEntry> {
        let mut state = self.lock().await?;
        let CallbackAccept {
            callback_id,
            agent_id,
            now,
        } = accept;

        // Validate everything before the first write so a failure leaves no trace.
        let callback = state
            .callbacks
            .get(&callback_id)
            .cloned()
            .ok_or(RouterError::CallbackNotFound(callback_id))?;
        if callback.status != CallbackStatus::Pending {
            return Err(RouterError::CallbackNotPending(callback_id));
        }

        let superseded = state.active_entry_ids_for(&callback.lead_id);
        let prior_queue = superseded
            .first()
            .and_then(|id| state.entries.get(id))
            .map(|e| e.queue_type);
        let scored_queue = state
            .scores
            .get(&callback.lead_id)
            .map(|s| s.queue_type)
            .filter(|qt| qt.is_routable());
        let Some(target_queue) = scored_queue.or(prior_queue) else {
            return Err(RouterError::UnroutableLead(callback.lead_id));
        };
        let from_queue = prior_queue.unwrap_or(target_queue);

        for entry_id in &superseded {
            if let Some(entry) = state.entries.get_mut(entry_id) {
                entry.remove(format!("superseded by {callback_id}"), now);
            }
        }

        let mut entry = WorklistEntry::from_callback(
            self.ids.entry_id(),
            callback.lead_id.clone(),
            target_queue,
            callback_id,
            format!("callback accepted: {}", callback.reason),
            now,
            now,
        );
        entry.assign(agent_id.clone(), now);
        state.entries.insert(entry.entry_id, entry.clone());

        if let Some(stored) = state.callbacks.get_mut(&callback_id) {
            stored.status = CallbackStatus::Accepted;
            stored.updated_at = now;
        }

        let draft = TransitionDraft::new(
            callback.lead_id,
            from_queue,
            target_queue,
            TransitionSource::CallbackOverride,
            format!("callback {callback_id} accepted by {agent_id}; {} entries superseded", superseded.len()),
        );
        state.push_transition(self.ids.as_ref(), draft, now);
        Ok(entry)
    }

    async fn snooze_callback(&self, snooze: CallbackSnooze) -> Result<SnoozeReport> {
        let mut state = self.lock().await?;
        let CallbackSnooze {
            callback_id,
            until,
            now,
        } = snooze;

        let callback = state
            .callbacks
            .get(&callback_id)
            .cloned()
            .ok_or(RouterError::CallbackNotFound(callback_id))?;
        if callback.status != CallbackStatus::Pending {
            return Err(RouterError::CallbackNotPending(callback_id));
        }

        let immediate: Vec<EntryId> = state
            .active_entry_ids_for(&callback.lead_id)
            .into_iter()
            .filter(|id| state.entries.get(id).is_some_and(|e| e.status == EntryStatus::Pending))
            .collect();
        let reason = format!("snoozed by {callback_id} until {}", until.to_rfc3339());
        for entry_id in &immediate {
            state.remove_entry(self.ids.as_ref(), *entry_id, TransitionSource::CallbackSnooze, &reason, now);
        }

        let stored = state
            .callbacks
            .get_mut(&callback_id)
            .ok_or(RouterError::CallbackNotFound(callback_id))?;
        stored.scheduled_for = until;
        stored.snooze_count += 1;
        stored.updated_at = now;
        Ok(SnoozeReport {
            callback: stored.clone(),
            removed_entries: immediate.len(),
        })
    }

    async fn due_callbacks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Callback>> {
        let state = self.lock().await?;
        let materialized: HashSet<CallbackId> = state
            .entries
            .values()
            .filter(|e| e.status.is_active())
            .filter_map(|e| e.callback_ref)
            .collect();
        let mut due: Vec<Callback> = state
            .callbacks
            .values()
            .filter(|c| c.is_due(now) && !materialized.contains(&c.callback_id))
            .filter(|c| state.is_promotable(&c.lead_id))
            .cloned()
            .collect();
        due.sort_by_key(|c| (c.scheduled_for, c.callback_id));
        due.truncate(limit);
        Ok(due)
    }

    async fn insert_callback_entry(&self, entry: WorklistEntry) -> Result<bool> {
        let mut state = self.lock().await?;
        let active = state.active_entry_ids_for(&entry.lead_id);

        // A pending organic entry gives way to the override; anything else blocks it.
        let replaceable = active.iter().all(|id| {
            state
                .entries
                .get(id)
                .is_some_and(|e| e.status == EntryStatus::Pending && e.origin == EntryOrigin::Generated)
        });
        if !replaceable {
            return Ok(false);
        }

        let now = entry.created_at;
        let reason = match entry.callback_ref {
            Some(id) => format!("superseded by due {id}"),
            None => "superseded by due callback".to_string(),
        };
        for entry_id in active {
            state.remove_entry(self.ids.as_ref(), entry_id, TransitionSource::CallbackOverride, &reason, now);
        }
        state.entries.insert(entry.entry_id, entry);
        Ok(true)
    }

    async fn append_transition(&self, draft: TransitionDraft, now: DateTime<Utc>) -> Result<TransitionRecord> {
        let mut state = self.lock().await?;
        let record = draft.stamp(self.ids.transition_id(), now);
        state.transitions.push(record.clone());
        Ok(record)
    }

    async fn list_transitions(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<TransitionRecord>> {
        let state = self.lock().await?;
        // Reverse append order first; the stable sort keeps it for equal timestamps.
        let mut recent: Vec<_> = state
            .transitions
            .iter()
            .rev()
            .filter(|t| t.timestamp >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn unreconciled_exits(&self, since: DateTime<Utc>) -> Result<Vec<TransitionRecord>> {
        let state = self.lock().await?;
        let mut exits: Vec<_> = state
            .transitions
            .iter()
            .filter(|t| t.is_exit() && !t.conversion_logged && t.timestamp >= since)
            .cloned()
            .collect();
        exits.sort_by_key(|t| t.timestamp);
        Ok(exits)
    }

    async fn mark_conversion_logged(&self, ids: &[TransitionId]) -> Result<usize> {
        let mut state = self.lock().await?;
        let wanted: HashSet<&TransitionId> = ids.iter().collect();
        let mut marked = 0;
        for record in state.transitions.iter_mut() {
            if !record.conversion_logged && wanted.contains(&record.transition_id) {
                record.conversion_logged = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn purge_transitions(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock().await?;
        let before_len = state.transitions.len();
        state.transitions.retain(|t| t.timestamp >= before);
        Ok(before_len - state.transitions.len())
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let mut state = self.lock().await?;
        let free = state.leases.get(key).is_none_or(|lease| lease.expires_at <= now);
        if free {
            state.leases.insert(
                key.to_string(),
                Lease {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        Ok(free)
    }

    async fn release_lease(&self, key: &str, holder: &str) -> Result<bool> {
        let mut state = self.lock().await?;
        if state.leases.get(key).is_some_and(|lease| lease.holder == holder) {
            state.leases.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn load_refresh_checkpoint(&self, queue_type: QueueType) -> Result<Option<RefreshCheckpoint>> {
        let state = self.lock().await?;
        Ok(state.checkpoints.get(&queue_type).cloned())
    }

    async fn save_refresh_checkpoint(&self, checkpoint: RefreshCheckpoint) -> Result<()> {
        let mut state = self.lock().await?;
        state.checkpoints.insert(checkpoint.queue_type, checkpoint);
        Ok(())
    }

    async fn clear_refresh_checkpoint(&self, queue_type: QueueType) -> Result<()> {
        let mut state = self.lock().await?;
        state.checkpoints.remove(&queue_type);
        Ok(())
    }

    async fn load_job_cursor(&self, job: &str) -> Result<Option<JobCursor>> {
        let state = self.lock().await?;
        Ok(state.cursors.get(job).cloned())
    }

    async fn save_job_cursor(&self, job: &str, cursor: Option<JobCursor>) -> Result<()> {
        let mut state = self.lock().await?;
        match cursor {
            Some(cursor) => {
                state.cursors.insert(job.to_string(), cursor);
            }
            None => {
                state.cursors.remove(job);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn score(lead: &str, queue_type: QueueType, value: i64) -> ScoreRecord {
        let mut r = ScoreRecord::discovered(LeadId::new(lead), queue_type, t0());
        r.base_score = value;
        r.recompute();
        r
    }

    async fn seed(store: &InMemoryStore, records: Vec<ScoreRecord>) {
        for record in records {
            let outcome = store
                .save_score(ScoreWrite {
                    record,
                    expected_version: None,
                    transition: None,
                })
                .await
                .unwrap();
            assert!(matches!(outcome, SaveOutcome::Saved(_)));
        }
    }

    #[tokio::test]
    async fn save_score_enforces_versions() {
        let store = InMemoryStore::default();
        seed(&store, vec![score("a", QueueType::Unsigned, 0)]).await;

        let stored = store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        let stale = ScoreWrite {
            record: stored.clone(),
            expected_version: Some(0),
            transition: None,
        };
        assert_eq!(store.save_score(stale).await.unwrap(), SaveOutcome::VersionConflict);

        let fresh = ScoreWrite {
            record: stored.clone(),
            expected_version: Some(1),
            transition: None,
        };
        let SaveOutcome::Saved(saved) = store.save_score(fresh).await.unwrap() else {
            panic!("expected save");
        };
        assert_eq!(saved.version, 2);

        let duplicate_insert = ScoreWrite {
            record: stored,
            expected_version: None,
            transition: None,
        };
        assert_eq!(store.save_score(duplicate_insert).await.unwrap(), SaveOutcome::VersionConflict);
    }

    #[tokio::test]
    async fn list_active_scores_pages_in_rank_order() {
        let store = InMemoryStore::default();
        seed(
            &store,
            vec![
                score("c", QueueType::Unsigned, 5),
                score("a", QueueType::Unsigned, -1),
                score("b", QueueType::Unsigned, 5),
                score("x", QueueType::OutstandingRequirements, -100),
                score("z", QueueType::None, -100),
            ],
        )
        .await;

        let first = store.list_active_scores(QueueType::Unsigned, None, 2).await.unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.lead_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let cursor = RankKey::of(first.last().unwrap());
        let rest = store
            .list_active_scores(QueueType::Unsigned, Some(&cursor), 10)
            .await
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|r| r.lead_id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[tokio::test]
    async fn leases_exclude_other_holders_until_expiry() {
        let store = InMemoryStore::default();
        let ttl = chrono::Duration::minutes(5);
        assert!(store.try_acquire_lease("refresh:unsigned", "gen-1", t0(), ttl).await.unwrap());
        assert!(!store.try_acquire_lease("refresh:unsigned", "gen-2", t0(), ttl).await.unwrap());
        // not re-entrant
        assert!(!store.try_acquire_lease("refresh:unsigned", "gen-1", t0(), ttl).await.unwrap());

        let later = t0() + chrono::Duration::minutes(6);
        assert!(store.try_acquire_lease("refresh:unsigned", "gen-2", later, ttl).await.unwrap());
        assert!(!store.release_lease("refresh:unsigned", "gen-1").await.unwrap());
        assert!(store.release_lease("refresh:unsigned", "gen-2").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::default();
        store.set_unavailable(true);
        let err = store.get_score(&LeadId::new("a")).await.unwrap_err();
        assert!(matches!(err, RouterError::StorageUnavailable(_)));

        store.set_unavailable(false);
        assert!(store.get_score(&LeadId::new("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_requires_assignment() {
        let store = InMemoryStore::default();
        seed(&store, vec![score("a", QueueType::Unsigned, 0)]).await;
        let report = store
            .swap_worklist(WorklistSwap {
                queue_type: QueueType::Unsigned,
                candidates: vec![Candidate {
                    lead_id: LeadId::new("a"),
                    score: 0,
                    last_queue_check: t0(),
                }],
                now: t0(),
            })
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);

        let entry = store.list_entries(QueueType::Unsigned).await.unwrap().remove(0);
        let stored = store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        let err = store
            .complete_entry(completion(entry.entry_id, &stored, Some(stored.version)))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidTransition { from: "pending", .. }));

        let agent = AgentId::new("alice");
        assert!(store.claim_entry(entry.entry_id, &agent, t0()).await.unwrap().is_claimed());
        let CompletionOutcome::Completed { entry: done, score } = store
            .complete_entry(completion(entry.entry_id, &stored, Some(stored.version)))
            .await
            .unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(done.status, EntryStatus::Completed);
        assert_eq!(score.total_attempts, 1);
        assert_eq!(score.version, stored.version + 1);
    }

    fn completion(entry_id: EntryId, stored: &ScoreRecord, expected_version: Option<u64>) -> CallCompletion {
        let mut record = stored.clone();
        record.total_attempts += 1;
        CallCompletion {
            entry_id,
            score: ScoreWrite {
                record,
                expected_version,
                transition: None,
            },
            now: t0(),
        }
    }

    async fn assigned_entry(store: &InMemoryStore, lead: &str) -> EntryId {
        let entry = WorklistEntry::generated(
            EntryId::from_ulid(ulid::Ulid::new()),
            LeadId::new(lead),
            QueueType::Unsigned,
            0,
            t0(),
            1,
            t0(),
        );
        let entry_id = entry.entry_id;
        store.insert_entry_unchecked(entry).await.unwrap();
        assert!(store
            .claim_entry(entry_id, &AgentId::new("alice"), t0())
            .await
            .unwrap()
            .is_claimed());
        entry_id
    }

    #[tokio::test]
    async fn completion_with_a_stale_score_writes_nothing() {
        let store = InMemoryStore::default();
        seed(&store, vec![score("a", QueueType::Unsigned, 0)]).await;
        let entry_id = assigned_entry(&store, "a").await;
        let stored = store.get_score(&LeadId::new("a")).await.unwrap().unwrap();

        let outcome = store
            .complete_entry(completion(entry_id, &stored, Some(stored.version + 7)))
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::VersionConflict);

        let entry = store.get_entry(entry_id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Assigned);
        assert_eq!(store.get_score(&LeadId::new("a")).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn completion_fails_whole_when_storage_is_down() {
        let store = InMemoryStore::default();
        seed(&store, vec![score("a", QueueType::Unsigned, 0)]).await;
        let entry_id = assigned_entry(&store, "a").await;
        let stored = store.get_score(&LeadId::new("a")).await.unwrap().unwrap();

        store.set_unavailable(true);
        let err = store
            .complete_entry(completion(entry_id, &stored, Some(stored.version)))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::StorageUnavailable(_)));
        store.set_unavailable(false);

        let entry = store.get_entry(entry_id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Assigned);
        assert_eq!(store.get_score(&LeadId::new("a")).await.unwrap().unwrap().total_attempts, 0);
    }

    #[tokio::test]
    async fn swap_moves_a_stale_entry_from_the_previous_queue() {
        let store = InMemoryStore::default();
        seed(&store, vec![score("a", QueueType::Unsigned, 0)]).await;
        let candidate = Candidate {
            lead_id: LeadId::new("a"),
            score: 0,
            last_queue_check: t0(),
        };
        store
            .swap_worklist(WorklistSwap {
                queue_type: QueueType::Unsigned,
                candidates: vec![candidate.clone()],
                now: t0(),
            })
            .await
            .unwrap();

        // The lead is reclassified; its unsigned entry has not been displaced yet.
        let mut moved = store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        let version = moved.version;
        moved.reclassify(QueueType::OutstandingRequirements);
        store
            .save_score(ScoreWrite {
                record: moved,
                expected_version: Some(version),
                transition: None,
            })
            .await
            .unwrap();

        let report = store
            .swap_worklist(WorklistSwap {
                queue_type: QueueType::OutstandingRequirements,
                candidates: vec![candidate],
                now: t0(),
            })
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 0);

        let active = store.active_entries_for_lead(&LeadId::new("a")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].queue_type, QueueType::OutstandingRequirements);
        assert_eq!(active[0].status, EntryStatus::Pending);

        let transitions = store.all_transitions().await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_queue, QueueType::Unsigned);
        assert_eq!(transitions[0].to_queue, QueueType::OutstandingRequirements);
        assert_eq!(transitions[0].source, TransitionSource::QueueGenerator);
    }

    #[tokio::test]
    async fn due_callbacks_skip_leads_that_cannot_be_promoted() {
        let store = InMemoryStore::default();
        seed(&store, vec![score("scored", QueueType::Unsigned, 0), score("busy", QueueType::Unsigned, 0)]).await;
        assigned_entry(&store, "busy").await;

        for (i, lead) in ["unscored", "busy", "scored"].into_iter().enumerate() {
            let callback = Callback::new(
                CallbackId::from_ulid(ulid::Ulid::new()),
                LeadId::new(lead),
                None,
                t0() - chrono::Duration::minutes(10 - i as i64),
                "call back",
                t0(),
            );
            store.insert_callback(callback).await.unwrap();
        }

        // Only one slot: the oldest unpromotable callbacks must not take it.
        let due = store.due_callbacks(t0(), 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].lead_id, LeadId::new("scored"));
    }

    #[tokio::test]
    async fn accepting_a_callback_for_an_unroutable_lead_is_rejected() {
        let store = InMemoryStore::default();
        let callback = Callback::new(
            CallbackId::from_ulid(ulid::Ulid::new()),
            LeadId::new("ghost"),
            None,
            t0(),
            "call back",
            t0(),
        );
        let callback_id = callback.callback_id;
        store.insert_callback(callback).await.unwrap();

        let err = store
            .accept_callback(CallbackAccept {
                callback_id,
                agent_id: AgentId::new("alice"),
                now: t0(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnroutableLead(_)));
        assert!(store.active_entries_for_lead(&LeadId::new("ghost")).await.unwrap().is_empty());
        assert!(store.all_transitions().await.unwrap().is_empty());
        let stored = store.get_callback(callback_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallbackStatus::Pending);
    }

    #[tokio::test]
    async fn purge_only_touches_closed_entries() {
        let store = InMemoryStore::default();
        let mut closed = WorklistEntry::generated(
            EntryId::from_ulid(ulid::Ulid::new()),
            LeadId::new("a"),
            QueueType::Unsigned,
            0,
            t0(),
            1,
            t0(),
        );
        closed.remove("test", t0());
        let open = WorklistEntry::generated(
            EntryId::from_ulid(ulid::Ulid::new()),
            LeadId::new("b"),
            QueueType::Unsigned,
            0,
            t0(),
            1,
            t0(),
        );
        store.insert_entry_unchecked(closed).await.unwrap();
        store.insert_entry_unchecked(open.clone()).await.unwrap();

        let purged = store
            .purge_closed_entries(t0() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_entry(open.entry_id).await.unwrap().is_some());
    }
}
