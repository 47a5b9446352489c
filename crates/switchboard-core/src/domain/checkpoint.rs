//! Resumable batch-job bookkeeping: keyset cursors and refresh checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::LeadId;
use super::queue_type::QueueType;
use super::score::ScoreRecord;

/// Position in the `(current_score, last_queue_check, lead_id)` ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RankKey {
    pub score: i64,
    pub last_queue_check: DateTime<Utc>,
    pub lead_id: LeadId,
}

impl RankKey {
    pub fn of(record: &ScoreRecord) -> Self {
        Self {
            score: record.current_score,
            last_queue_check: record.last_queue_check,
            lead_id: record.lead_id.clone(),
        }
    }
}

/// A lead selected for the next top-N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub lead_id: LeadId,
    pub score: i64,
    pub last_queue_check: DateTime<Utc>,
}

impl From<&ScoreRecord> for Candidate {
    fn from(record: &ScoreRecord) -> Self {
        Self {
            lead_id: record.lead_id.clone(),
            score: record.current_score,
            last_queue_check: record.last_queue_check,
        }
    }
}

/// Partial progress of an interrupted refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCheckpoint {
    pub queue_type: QueueType,
    pub cursor: Option<RankKey>,
    pub candidates: Vec<Candidate>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshCheckpoint {
    pub fn start(queue_type: QueueType, now: DateTime<Utc>) -> Self {
        Self {
            queue_type,
            cursor: None,
            candidates: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_stale(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.started_at > max_age
    }
}

/// Saved position of a paged batch job (scoring cycle, backfill).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCursor {
    /// Last lead id handed out by the eligibility source.
    AfterLead(LeadId),
    /// Offset into a fixed cohort.
    Offset(usize),
}
