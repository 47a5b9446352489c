//! Worklist entries: materialized, claimable slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, CallbackId, EntryId, LeadId};
use super::priority::Priority;
use super::queue_type::QueueType;
use super::state::EntryStatus;

/// Where an entry came from. Only generated entries are replaced by a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    Generated,
    Callback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklistEntry {
    pub entry_id: EntryId,
    pub lead_id: LeadId,
    pub queue_type: QueueType,
    pub priority: Priority,
    /// Free-text provenance.
    pub reason: String,
    pub status: EntryStatus,
    pub origin: EntryOrigin,

    pub assigned_agent: Option<AgentId>,
    pub assigned_at: Option<DateTime<Utc>>,
    /// Invisible to claim before this instant.
    pub available_from: DateTime<Utc>,
    /// Only this agent may see the entry as a candidate.
    pub reserved_for: Option<AgentId>,
    pub callback_ref: Option<CallbackId>,

    /// `last_queue_check` at generation time; tie-break within equal priority.
    pub rank_check: DateTime<Utc>,
    pub generation: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the entry reached `completed` or `removed`.
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorklistEntry {
    /// Pending entry produced by a refresh.
    pub fn generated(
        entry_id: EntryId,
        lead_id: LeadId,
        queue_type: QueueType,
        score: i64,
        rank_check: DateTime<Utc>,
        generation: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id,
            lead_id,
            queue_type,
            priority: Priority::Scored(score),
            reason: format!("top-n refresh generation {generation}"),
            status: EntryStatus::Pending,
            origin: EntryOrigin::Generated,
            assigned_agent: None,
            assigned_at: None,
            available_from: now,
            reserved_for: None,
            callback_ref: None,
            rank_check,
            generation: Some(generation),
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Override entry produced by a callback.
    pub fn from_callback(
        entry_id: EntryId,
        lead_id: LeadId,
        queue_type: QueueType,
        callback_id: CallbackId,
        reason: impl Into<String>,
        available_from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id,
            lead_id,
            queue_type,
            priority: Priority::Override { issued_at: now },
            reason: reason.into(),
            status: EntryStatus::Pending,
            origin: EntryOrigin::Callback,
            assigned_agent: None,
            assigned_at: None,
            available_from,
            reserved_for: None,
            callback_ref: Some(callback_id),
            rank_check: now,
            generation: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Ordering key for candidate selection.
    pub fn rank_key(&self) -> (Priority, DateTime<Utc>, DateTime<Utc>, EntryId) {
        (self.priority, self.rank_check, self.created_at, self.entry_id)
    }

    pub fn is_visible_to(&self, agent: &AgentId, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Pending
            && self.available_from <= now
            && self.reserved_for.as_ref().is_none_or(|reserved| reserved == agent)
    }

    pub fn assign(&mut self, agent: AgentId, now: DateTime<Utc>) {
        self.status = EntryStatus::Assigned;
        self.assigned_agent = Some(agent);
        self.assigned_at = Some(now);
        self.updated_at = now;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = EntryStatus::Completed;
        self.updated_at = now;
        self.closed_at = Some(now);
    }

    pub fn remove(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = EntryStatus::Removed;
        self.reason = reason.into();
        self.updated_at = now;
        self.closed_at = Some(now);
    }
}

/// Why a claim did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    AlreadyAssigned,
    NotPending,
    NotYetAvailable,
    Reserved,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(WorklistEntry),
    Conflict(ConflictReason),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn entry(score: i64) -> WorklistEntry {
        WorklistEntry::generated(
            EntryId::from_ulid(Ulid::new()),
            LeadId::new("lead-1"),
            QueueType::Unsigned,
            score,
            now(),
            1,
            now(),
        )
    }

    #[test]
    fn reserved_entries_are_hidden_from_other_agents() {
        let mut e = entry(0);
        e.reserved_for = Some(AgentId::new("alice"));
        assert!(e.is_visible_to(&AgentId::new("alice"), now()));
        assert!(!e.is_visible_to(&AgentId::new("bob"), now()));
    }

    #[test]
    fn future_entries_are_hidden() {
        let mut e = entry(0);
        e.available_from = now() + chrono::Duration::minutes(1);
        assert!(!e.is_visible_to(&AgentId::new("alice"), now()));
    }

    #[test]
    fn rank_key_orders_by_priority_then_check() {
        let low = entry(-3);
        let mut tie_older = entry(5);
        tie_older.rank_check = now() - chrono::Duration::hours(1);
        let tie_newer = entry(5);

        let mut entries = vec![tie_newer.clone(), tie_older.clone(), low.clone()];
        entries.sort_by_key(|e| e.rank_key());
        assert_eq!(entries[0].entry_id, low.entry_id);
        assert_eq!(entries[1].entry_id, tie_older.entry_id);
        assert_eq!(entries[2].entry_id, tie_newer.entry_id);
    }

    #[test]
    fn lifecycle_sets_closed_at() {
        let mut e = entry(0);
        e.assign(AgentId::new("alice"), now());
        assert_eq!(e.status, EntryStatus::Assigned);
        assert!(e.closed_at.is_none());
        e.complete(now());
        assert_eq!(e.status, EntryStatus::Completed);
        assert_eq!(e.closed_at, Some(now()));
    }
}
