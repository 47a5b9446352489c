//! CallbackService - オペレーターの callback / override
//!
//! accept と snooze はそれぞれ 1 回のストア呼び出し。失敗したら callback も
//! ワークリストも変わらない。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::CallbackConfig;
use crate::domain::{AgentId, Callback, CallbackId, LeadId, Result, WorklistEntry};
use crate::ports::{CallbackAccept, CallbackSnooze, Clock, IdGenerator, RouterStore};

/// Upper bound of callbacks promoted per pass.
const PROMOTE_BATCH: usize = 500;

pub struct CallbackService {
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: CallbackConfig,
}

impl CallbackService {
    pub fn new(
        store: Arc<dyn RouterStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: CallbackConfig,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            config,
        }
    }

    pub async fn schedule(
        &self,
        lead_id: LeadId,
        preferred_agent: Option<AgentId>,
        scheduled_for: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<Callback> {
        let callback = Callback::new(
            self.ids.callback_id(),
            lead_id,
            preferred_agent,
            scheduled_for,
            reason,
            self.clock.now(),
        );
        self.store.insert_callback(callback.clone()).await?;
        tracing::info!(
            callback_id = %callback.callback_id,
            lead_id = %callback.lead_id,
            scheduled_for = %callback.scheduled_for,
            "callback scheduled"
        );
        Ok(callback)
    }

    /// Hands the lead to `agent` right now, superseding any active entry.
    pub async fn accept(&self, callback_id: CallbackId, agent: AgentId) -> Result<WorklistEntry> {
        let entry = self
            .store
            .accept_callback(CallbackAccept {
                callback_id,
                agent_id: agent,
                now: self.clock.now(),
            })
            .await?;
        tracing::info!(
            callback_id = %callback_id,
            entry_id = %entry.entry_id,
            lead_id = %entry.lead_id,
            queue_type = %entry.queue_type,
            "callback accepted"
        );
        Ok(entry)
    }

    /// Pushes the callback out by `minutes`, clamped to the configured bounds.
    pub async fn snooze(&self, callback_id: CallbackId, minutes: i64) -> Result<Callback> {
        let now = self.clock.now();
        let delay = self.config.clamp_snooze(minutes);
        let report = self
            .store
            .snooze_callback(CallbackSnooze {
                callback_id,
                until: now + delay,
                now,
            })
            .await?;
        tracing::info!(
            callback_id = %callback_id,
            requested_minutes = minutes,
            applied_minutes = delay.num_minutes(),
            removed_entries = report.removed_entries,
            "callback snoozed"
        );
        Ok(report.callback)
    }

    /// Materializes due callbacks as reserved override entries.
    pub async fn promote_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.store.due_callbacks(now, PROMOTE_BATCH).await?;
        let mut promoted = 0;

        for callback in due {
            let queue_type = match self.store.get_score(&callback.lead_id).await? {
                Some(score) if score.queue_type.is_routable() => score.queue_type,
                _ => {
                    tracing::debug!(
                        callback_id = %callback.callback_id,
                        lead_id = %callback.lead_id,
                        "due callback for a lead outside every queue, left pending"
                    );
                    continue;
                }
            };

            let mut entry = WorklistEntry::from_callback(
                self.ids.entry_id(),
                callback.lead_id.clone(),
                queue_type,
                callback.callback_id,
                format!("callback due: {}", callback.reason),
                callback.scheduled_for,
                now,
            );
            entry.reserved_for = callback.preferred_agent.clone();

            if self.store.insert_callback_entry(entry).await? {
                promoted += 1;
            } else {
                tracing::debug!(
                    callback_id = %callback.callback_id,
                    lead_id = %callback.lead_id,
                    "lead already has a working entry, promotion deferred"
                );
            }
        }

        if promoted > 0 {
            tracing::info!(promoted, "due callbacks promoted");
        }
        Ok(promoted)
    }
}
