//! Dispatch - pre-dispatch validation と claim protocol
//!
//! # 学習ポイント
//! - 候補は毎回 eligibility の system-of-record で再確認する（キャッシュしない）
//! - drift した entry は 1 回のストア呼び出しで removed + score 更新 + transition
//! - claim の権威はストア（pending の時だけ成功する conditional update）
//! - 競合は戻り値。error ログには出さない（debug のみ）

use std::sync::Arc;

use serde::Serialize;

use crate::app::retry::{RetryPolicy, retry_transient};
use crate::app::scoring::{OUTCOME_SAVE_ATTEMPTS, ScoringEngine};
use crate::config::DispatchConfig;
use crate::domain::{
    AgentId, CallOutcome, ClaimOutcome, EntryId, LeadId, Priority, QueueType, Result, RouterError, classify,
};
use crate::ports::{CallCompletion, Clock, CompletionOutcome, DriftRemoval, EligibilitySource, RouterStore};

/// An entry whose lead still belongs to its queue type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCandidate {
    pub entry_id: EntryId,
    pub lead_id: LeadId,
    pub queue_type: QueueType,
    pub priority: Priority,
    /// Drifted candidates removed before this one was found.
    pub skipped: usize,
}

pub struct PreDispatchValidator {
    store: Arc<dyn RouterStore>,
    eligibility: Arc<dyn EligibilitySource>,
    clock: Arc<dyn Clock>,
    max_skips: usize,
    retry: RetryPolicy,
}

impl PreDispatchValidator {
    pub fn new(
        store: Arc<dyn RouterStore>,
        eligibility: Arc<dyn EligibilitySource>,
        clock: Arc<dyn Clock>,
        max_skips: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            eligibility,
            clock,
            max_skips,
            retry,
        }
    }

    /// Best pending entry whose lead is still live-eligible for `queue_type`.
    ///
    /// Returns `None` for an empty worklist or after `max_skips` drifted candidates.
    pub async fn next_candidate(&self, queue_type: QueueType, agent: &AgentId) -> Result<Option<ValidatedCandidate>> {
        if !queue_type.is_routable() {
            return Err(RouterError::InvalidQueueType(queue_type));
        }

        let mut skipped = 0;
        while skipped < self.max_skips {
            let Some(entry) = self.store.best_pending(queue_type, agent, self.clock.now()).await? else {
                return Ok(None);
            };

            let recheck = retry_transient(&self.retry, "eligibility-recheck", || {
                self.eligibility.get_eligibility(&entry.lead_id)
            })
            .await;
            let facts = match recheck {
                Ok(facts) => facts,
                // Nothing can be validated; agents see an empty worklist instead of an error.
                Err(RouterError::EligibilityUnavailable(reason)) => {
                    tracing::warn!(
                        queue_type = %queue_type,
                        entry_id = %entry.entry_id,
                        lead_id = %entry.lead_id,
                        reason = %reason,
                        "eligibility source unavailable, no candidate handed out"
                    );
                    return Ok(None);
                }
                Err(err) => return Err(err),
            };
            let live = facts.as_ref().map(classify).unwrap_or(QueueType::None);

            if live == entry.queue_type {
                return Ok(Some(ValidatedCandidate {
                    entry_id: entry.entry_id,
                    lead_id: entry.lead_id,
                    queue_type: entry.queue_type,
                    priority: entry.priority,
                    skipped,
                }));
            }

            let reason = match facts {
                Some(_) => format!("pre-dispatch check: live class {live}, entry in {}", entry.queue_type),
                None => "pre-dispatch check: lead unknown to eligibility source".to_string(),
            };
            let removed = self
                .store
                .remove_drifted_entry(DriftRemoval {
                    entry_id: entry.entry_id,
                    live_queue_type: live,
                    reason,
                    now: self.clock.now(),
                })
                .await?;
            tracing::debug!(
                queue_type = %queue_type,
                entry_id = %entry.entry_id,
                lead_id = %entry.lead_id,
                live_queue_type = %live,
                removed,
                "candidate drifted, skipping"
            );
            skipped += 1;
        }

        tracing::warn!(
            queue_type = %queue_type,
            agent_id = %agent,
            skipped,
            "too many drifted candidates, giving up"
        );
        Ok(None)
    }
}

/// A lead handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub entry_id: EntryId,
    pub lead_id: LeadId,
    pub queue_type: QueueType,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionAck {
    pub entry_id: EntryId,
    pub lead_id: LeadId,
    pub outcome: CallOutcome,
    pub current_score: i64,
    pub outcome_penalty: i64,
}

/// Claim protocol on top of the validator.
pub struct Dispatcher {
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
    validator: PreDispatchValidator,
    scoring: Arc<ScoringEngine>,
    max_claim_attempts: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RouterStore>,
        eligibility: Arc<dyn EligibilitySource>,
        clock: Arc<dyn Clock>,
        scoring: Arc<ScoringEngine>,
        config: &DispatchConfig,
        retry: RetryPolicy,
    ) -> Self {
        let validator =
            PreDispatchValidator::new(store.clone(), eligibility, clock.clone(), config.max_skips, retry);
        Self {
            store,
            clock,
            validator,
            scoring,
            max_claim_attempts: config.max_claim_attempts.max(1),
        }
    }

    pub fn validator(&self) -> &PreDispatchValidator {
        &self.validator
    }

    /// `pending → assigned`. Conflicts are values, not errors.
    pub async fn claim(&self, entry_id: EntryId, agent: &AgentId) -> Result<ClaimOutcome> {
        let outcome = self.store.claim_entry(entry_id, agent, self.clock.now()).await?;
        if let ClaimOutcome::Conflict(reason) = &outcome {
            tracing::debug!(entry_id = %entry_id, agent_id = %agent, ?reason, "claim conflict");
        }
        Ok(outcome)
    }

    /// Validates and claims the best candidate, moving on after conflicts.
    pub async fn request_next_lead(&self, queue_type: QueueType, agent: &AgentId) -> Result<Option<Assignment>> {
        for attempt in 1..=self.max_claim_attempts {
            let Some(candidate) = self.validator.next_candidate(queue_type, agent).await? else {
                return Ok(None);
            };

            match self.claim(candidate.entry_id, agent).await? {
                ClaimOutcome::Claimed(entry) => {
                    tracing::info!(
                        queue_type = %queue_type,
                        agent_id = %agent,
                        entry_id = %entry.entry_id,
                        lead_id = %entry.lead_id,
                        priority = %entry.priority,
                        attempt,
                        "lead assigned"
                    );
                    return Ok(Some(Assignment {
                        entry_id: entry.entry_id,
                        lead_id: entry.lead_id,
                        queue_type: entry.queue_type,
                        priority: entry.priority,
                    }));
                }
                ClaimOutcome::Conflict(_) => continue,
            }
        }

        tracing::debug!(queue_type = %queue_type, agent_id = %agent, "claim attempts exhausted");
        Ok(None)
    }

    /// `assigned → completed` and the outcome feedback, committed together.
    ///
    /// Either both land or neither does, so a failed call can simply be retried.
    pub async fn complete_call(&self, entry_id: EntryId, outcome: CallOutcome) -> Result<CompletionAck> {
        let lead_id = self
            .store
            .get_entry(entry_id)
            .await?
            .ok_or(RouterError::EntryNotFound(entry_id))?
            .lead_id;

        for _ in 0..OUTCOME_SAVE_ATTEMPTS {
            let now = self.clock.now();
            let current = self.store.get_score(&lead_id).await?;
            let completion = CallCompletion {
                entry_id,
                score: self.scoring.outcome_write(&lead_id, current, outcome, now),
                now,
            };
            match self.store.complete_entry(completion).await? {
                CompletionOutcome::Completed { entry, score } => {
                    tracing::info!(
                        entry_id = %entry_id,
                        lead_id = %entry.lead_id,
                        outcome = outcome.as_str(),
                        current_score = score.current_score,
                        "call completed"
                    );
                    return Ok(CompletionAck {
                        entry_id,
                        lead_id: entry.lead_id,
                        outcome,
                        current_score: score.current_score,
                        outcome_penalty: score.outcome_penalty,
                    });
                }
                CompletionOutcome::VersionConflict => {
                    tracing::debug!(
                        entry_id = %entry_id,
                        lead_id = %lead_id,
                        "score moved during completion, retrying"
                    );
                }
            }
        }
        Err(RouterError::ConcurrentUpdate(lead_id))
    }
}
