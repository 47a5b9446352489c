//! Transition audit records.
//!
//! Append-only. The only field ever updated after insert is
//! `conversion_logged`, set by the leak detector's reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{LeadId, TransitionId};
use super::queue_type::QueueType;

/// The component that caused a queue-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionSource {
    #[serde(rename = "scoring")]
    Scoring,
    #[serde(rename = "queue-generator")]
    QueueGenerator,
    #[serde(rename = "pre-dispatch-validation")]
    PreDispatchValidation,
    #[serde(rename = "claim")]
    Claim,
    #[serde(rename = "callback-override")]
    CallbackOverride,
    #[serde(rename = "callback-snooze")]
    CallbackSnooze,
    #[serde(rename = "reconciliation")]
    Reconciliation,
}

impl TransitionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionSource::Scoring => "scoring",
            TransitionSource::QueueGenerator => "queue-generator",
            TransitionSource::PreDispatchValidation => "pre-dispatch-validation",
            TransitionSource::Claim => "claim",
            TransitionSource::CallbackOverride => "callback-override",
            TransitionSource::CallbackSnooze => "callback-snooze",
            TransitionSource::Reconciliation => "reconciliation",
        }
    }
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition before the store has stamped it with an id and a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDraft {
    pub lead_id: LeadId,
    pub from_queue: QueueType,
    pub to_queue: QueueType,
    pub reason: String,
    pub source: TransitionSource,
}

impl TransitionDraft {
    pub fn new(
        lead_id: LeadId,
        from_queue: QueueType,
        to_queue: QueueType,
        source: TransitionSource,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            lead_id,
            from_queue,
            to_queue,
            reason: reason.into(),
            source,
        }
    }

    pub fn stamp(self, transition_id: TransitionId, timestamp: DateTime<Utc>) -> TransitionRecord {
        TransitionRecord {
            transition_id,
            lead_id: self.lead_id,
            from_queue: self.from_queue,
            to_queue: self.to_queue,
            reason: self.reason,
            source: self.source,
            timestamp,
            conversion_logged: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition_id: TransitionId,
    pub lead_id: LeadId,
    pub from_queue: QueueType,
    /// `none` means the lead left every queue.
    pub to_queue: QueueType,
    pub reason: String,
    pub source: TransitionSource,
    pub timestamp: DateTime<Utc>,
    pub conversion_logged: bool,
}

impl TransitionRecord {
    /// An exit from queue tracking (candidate for leak reconciliation).
    pub fn is_exit(&self) -> bool {
        self.from_queue.is_routable() && !self.to_queue.is_routable()
    }
}

/// A true conversion from the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub lead_id: LeadId,
    pub converted_at: DateTime<Utc>,
}
