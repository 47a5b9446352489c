//! Operator-scheduled callbacks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, CallbackId, LeadId};
use super::state::CallbackStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    pub callback_id: CallbackId,
    pub lead_id: LeadId,
    pub preferred_agent: Option<AgentId>,
    pub scheduled_for: DateTime<Utc>,
    pub status: CallbackStatus,
    pub reason: String,
    pub snooze_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Callback {
    pub fn new(
        callback_id: CallbackId,
        lead_id: LeadId,
        preferred_agent: Option<AgentId>,
        scheduled_for: DateTime<Utc>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            callback_id,
            lead_id,
            preferred_agent,
            scheduled_for,
            status: CallbackStatus::Pending,
            reason: reason.into(),
            snooze_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CallbackStatus::Pending && self.scheduled_for <= now
    }
}
