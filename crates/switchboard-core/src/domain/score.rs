//! Score record: per-lead priority and queue classification.
//!
//! Design:
//! - One record per lead, never deleted (soft-deactivated with `is_active = false`).
//! - All mutations go through methods so `current_score` is always the sum of
//!   its components.
//! - `version` is bumped by the store on every save and is used as a
//!   compare-and-swap token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::LeadId;
use super::outcome::CallOutcome;
use super::queue_type::QueueType;
use crate::config::ScoringConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub lead_id: LeadId,

    /// Lower is higher priority.
    pub current_score: i64,
    pub base_score: i64,
    pub outcome_penalty: i64,
    pub time_penalty: i64,

    pub queue_type: QueueType,
    pub is_active: bool,

    pub total_attempts: u32,
    pub successful_attempts: u32,
    pub consecutive_failures: u32,

    pub last_queue_check: DateTime<Utc>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub version: u64,
}

/// Queue type change produced by a reclassification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclassification {
    pub from: QueueType,
    pub to: QueueType,
}

impl ScoreRecord {
    /// Record for a lead seen for the first time.
    pub fn discovered(lead_id: LeadId, queue_type: QueueType, now: DateTime<Utc>) -> Self {
        Self {
            lead_id,
            current_score: 0,
            base_score: 0,
            outcome_penalty: 0,
            time_penalty: 0,
            queue_type,
            is_active: queue_type.is_routable(),
            total_attempts: 0,
            successful_attempts: 0,
            consecutive_failures: 0,
            last_queue_check: now,
            last_reset_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn recompute(&mut self) {
        self.current_score = self.base_score + self.outcome_penalty + self.time_penalty;
    }

    pub fn is_consistent(&self) -> bool {
        self.current_score == self.base_score + self.outcome_penalty + self.time_penalty
    }

    /// Applies a fresh classification. Returns the change, if any.
    pub fn reclassify(&mut self, queue_type: QueueType) -> Option<Reclassification> {
        let from = self.queue_type;
        self.queue_type = queue_type;
        self.is_active = queue_type.is_routable();
        (from != queue_type).then_some(Reclassification { from, to: queue_type })
    }

    /// Ages the time penalty by whole elapsed intervals since `last_queue_check`.
    ///
    /// The partial interval is carried: `last_queue_check` only advances by the
    /// intervals that were consumed. Returns the number of intervals applied.
    pub fn apply_aging(&mut self, config: &ScoringConfig, now: DateTime<Utc>) -> i64 {
        let interval = config.aging_interval();
        let elapsed = now - self.last_queue_check;
        let intervals = if interval <= chrono::Duration::zero() || elapsed <= chrono::Duration::zero() {
            0
        } else {
            elapsed.num_seconds() / interval.num_seconds()
        };

        if intervals > 0 {
            let aged = self
                .time_penalty
                .saturating_sub(intervals.saturating_mul(config.aging_step));
            self.time_penalty = aged.max(config.min_time_penalty);
            self.last_queue_check += chrono::Duration::seconds(interval.num_seconds() * intervals);
        }
        self.updated_at = now;
        self.recompute();
        intervals
    }

    /// Outcome feedback after a call.
    pub fn apply_outcome(&mut self, config: &ScoringConfig, outcome: CallOutcome, now: DateTime<Utc>) {
        self.total_attempts += 1;
        if outcome.is_successful() {
            self.successful_attempts += 1;
            self.consecutive_failures = 0;
            self.outcome_penalty = self.outcome_penalty * i64::from(config.success_retention_pct) / 100;
            self.last_reset_at = Some(now);
        } else {
            self.consecutive_failures += 1;
            let step = config
                .failure_step
                .saturating_mul(i64::from(self.consecutive_failures));
            self.outcome_penalty = self
                .outcome_penalty
                .saturating_add(step)
                .min(config.max_outcome_penalty);
        }

        // The lead was just touched: aging starts over.
        self.time_penalty = 0;
        self.last_queue_check = now;
        self.updated_at = now;
        self.recompute();
    }
}
