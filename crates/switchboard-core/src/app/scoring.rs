//! ScoringEngine - lead ごとのスコアと queue 分類
//!
//! # フロー（1 バッチ）
//! 1. eligibility をバッチで取得（transient エラーは backoff 付きでリトライ）
//! 2. `classify` で分類し、score record を再分類・エージング
//! 3. version を CAS トークンにして保存（transition も同じ呼び出しで書く）
//!
//! 1 件の失敗でバッチ全体は止めない。ストレージ障害だけは呼び出し元に返す。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::app::retry::{RetryPolicy, retry_transient};
use crate::config::ScoringConfig;
use crate::domain::{
    CallOutcome, EligibilityFacts, JobCursor, LeadId, QueueType, Result, RouterError, ScoreRecord, TransitionDraft,
    TransitionSource, classify,
};
use crate::ports::{Clock, EligibilitySource, RouterStore, SaveOutcome, ScoreWrite};

/// Cursor key of the periodic scoring cycle.
pub const SCORING_JOB: &str = "scoring";

pub(crate) const OUTCOME_SAVE_ATTEMPTS: usize = 3;

/// One lead that did not make it through a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub lead_id: LeadId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescoreReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Leads whose queue type changed in this pass.
    pub reclassified: usize,
    /// Reasons for every skipped or failed lead.
    pub failures: Vec<ItemFailure>,
}

impl RescoreReport {
    fn skip(&mut self, lead_id: &LeadId, reason: impl Into<String>) {
        self.skipped += 1;
        self.failures.push(ItemFailure {
            lead_id: lead_id.clone(),
            reason: reason.into(),
        });
    }

    fn fail(&mut self, lead_id: &LeadId, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(ItemFailure {
            lead_id: lead_id.clone(),
            reason: reason.into(),
        });
    }

    fn merge(&mut self, other: RescoreReport) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.reclassified += other.reclassified;
        self.failures.extend(other.failures);
    }
}

/// Result of a bounded batch job (scoring cycle or backfill).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// False when the deadline stopped the job; the cursor was saved.
    pub completed: bool,
    pub batches: usize,
    pub totals: RescoreReport,
}

enum SaveResult {
    Saved { reclassified: bool },
    Conflicted,
}

pub struct ScoringEngine {
    store: Arc<dyn RouterStore>,
    eligibility: Arc<dyn EligibilitySource>,
    clock: Arc<dyn Clock>,
    config: ScoringConfig,
    retry: RetryPolicy,
}

impl ScoringEngine {
    pub fn new(
        store: Arc<dyn RouterStore>,
        eligibility: Arc<dyn EligibilitySource>,
        clock: Arc<dyn Clock>,
        config: ScoringConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            eligibility,
            clock,
            config,
            retry,
        }
    }

    /// Re-classifies and ages the given leads, in batches of `batch_size`.
    pub async fn rescore(&self, lead_ids: &[LeadId]) -> Result<RescoreReport> {
        let mut report = RescoreReport::default();
        for batch in lead_ids.chunks(self.config.batch_size.max(1)) {
            report.merge(self.rescore_batch(batch).await?);
        }
        Ok(report)
    }

    async fn rescore_batch(&self, batch: &[LeadId]) -> Result<RescoreReport> {
        let mut report = RescoreReport::default();

        let facts = match retry_transient(&self.retry, "eligibility-batch", || {
            self.eligibility.get_eligibility_batch(batch)
        })
        .await
        {
            Ok(facts) => facts,
            Err(err) => {
                tracing::warn!(batch_size = batch.len(), error = %err, "eligibility batch failed");
                for lead_id in batch {
                    report.fail(lead_id, err.to_string());
                }
                return Ok(report);
            }
        };

        let now = self.clock.now();
        let mut existing = self.store.get_scores(batch).await?;

        for lead_id in batch {
            let Some(lead_facts) = facts.get(lead_id) else {
                tracing::warn!(lead_id = %lead_id, "lead missing from eligibility source, skipped");
                report.skip(lead_id, "missing from eligibility source");
                continue;
            };

            match self
                .save_classification(lead_id, lead_facts, existing.remove(lead_id), now)
                .await
            {
                Ok(SaveResult::Saved { reclassified }) => {
                    report.succeeded += 1;
                    if reclassified {
                        report.reclassified += 1;
                    }
                }
                Ok(SaveResult::Conflicted) => {
                    tracing::warn!(lead_id = %lead_id, "score record changed twice during rescore, skipped");
                    report.skip(lead_id, "concurrent update");
                }
                Err(err @ RouterError::StorageUnavailable(_)) => return Err(err),
                Err(err) => report.fail(lead_id, err.to_string()),
            }
        }
        Ok(report)
    }

    async fn save_classification(
        &self,
        lead_id: &LeadId,
        facts: &EligibilityFacts,
        mut current: Option<ScoreRecord>,
        now: DateTime<Utc>,
    ) -> Result<SaveResult> {
        let queue_type = classify(facts);
        let reason = format!(
            "classified as {queue_type} (signature: {}, outstanding requirements: {})",
            facts.has_signature, facts.outstanding_requirement_count
        );

        // One reload on conflict, then give up.
        for _ in 0..2 {
            let (record, expected_version, transition) = match current.take() {
                None => {
                    let record = ScoreRecord::discovered(lead_id.clone(), queue_type, now);
                    let transition = queue_type.is_routable().then(|| {
                        TransitionDraft::new(
                            lead_id.clone(),
                            QueueType::None,
                            queue_type,
                            TransitionSource::Scoring,
                            reason.clone(),
                        )
                    });
                    (record, None, transition)
                }
                Some(mut record) => {
                    let expected = Some(record.version);
                    let change = record.reclassify(queue_type);
                    record.apply_aging(&self.config, now);
                    let transition = change.map(|c| {
                        TransitionDraft::new(lead_id.clone(), c.from, c.to, TransitionSource::Scoring, reason.clone())
                    });
                    (record, expected, transition)
                }
            };

            let reclassified = transition.is_some();
            let write = ScoreWrite {
                record,
                expected_version,
                transition,
            };
            match self.store.save_score(write).await? {
                SaveOutcome::Saved(_) => return Ok(SaveResult::Saved { reclassified }),
                SaveOutcome::VersionConflict => {
                    tracing::debug!(lead_id = %lead_id, "score version conflict, reloading");
                    current = self.store.get_score(lead_id).await?;
                }
            }
        }
        Ok(SaveResult::Conflicted)
    }

    /// The compare-and-swap write that applies `outcome` on top of `current`.
    pub fn outcome_write(
        &self,
        lead_id: &LeadId,
        current: Option<ScoreRecord>,
        outcome: CallOutcome,
        now: DateTime<Utc>,
    ) -> ScoreWrite {
        let (mut record, expected_version) = match current {
            Some(record) => {
                let version = record.version;
                (record, Some(version))
            }
            None => (ScoreRecord::discovered(lead_id.clone(), QueueType::None, now), None),
        };
        record.apply_outcome(&self.config, outcome, now);
        ScoreWrite {
            record,
            expected_version,
            transition: None,
        }
    }

    /// Outcome feedback after a call attempt.
    ///
    /// A lead without a score record gets one (classified `none` until the next
    /// rescore picks it up).
    pub async fn record_outcome(&self, lead_id: &LeadId, outcome: CallOutcome) -> Result<ScoreRecord> {
        for _ in 0..OUTCOME_SAVE_ATTEMPTS {
            let now = self.clock.now();
            let current = self.store.get_score(lead_id).await?;
            let write = self.outcome_write(lead_id, current, outcome, now);
            match self.store.save_score(write).await? {
                SaveOutcome::Saved(saved) => {
                    tracing::debug!(
                        lead_id = %lead_id,
                        outcome = outcome.as_str(),
                        outcome_penalty = saved.outcome_penalty,
                        current_score = saved.current_score,
                        "outcome recorded"
                    );
                    return Ok(saved);
                }
                SaveOutcome::VersionConflict => {
                    tracing::debug!(lead_id = %lead_id, "score version conflict on outcome, retrying");
                }
            }
        }
        Err(RouterError::ConcurrentUpdate(lead_id.clone()))
    }

    /// Pages through every lead the eligibility source knows, resuming from the
    /// persisted `scoring` cursor.
    pub async fn run_cycle(&self, max_duration: Duration) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let mut after = match self.store.load_job_cursor(SCORING_JOB).await? {
            Some(JobCursor::AfterLead(lead_id)) => Some(lead_id),
            _ => None,
        };
        let limit = self.config.batch_size.max(1);

        loop {
            if started.elapsed() >= max_duration {
                tracing::warn!(batches = report.batches, "scoring cycle hit its deadline, cursor saved");
                return Ok(report);
            }

            let page = retry_transient(&self.retry, "list-leads", || {
                self.eligibility.list_leads(after.as_ref(), limit)
            })
            .await?;
            let exhausted = page.len() < limit;

            if !page.is_empty() {
                report.totals.merge(self.rescore(&page).await?);
                report.batches += 1;
                after = page.last().cloned();
                self.store
                    .save_job_cursor(SCORING_JOB, after.clone().map(JobCursor::AfterLead))
                    .await?;
            }

            if exhausted {
                self.store.save_job_cursor(SCORING_JOB, None).await?;
                report.completed = true;
                tracing::info!(
                    batches = report.batches,
                    succeeded = report.totals.succeeded,
                    skipped = report.totals.skipped,
                    failed = report.totals.failed,
                    reclassified = report.totals.reclassified,
                    "scoring cycle completed"
                );
                return Ok(report);
            }
        }
    }

    /// Rescoring of a fixed cohort (migration / backfill), resumable through an
    /// offset cursor stored under `job_name`.
    pub async fn backfill(&self, job_name: &str, cohort: &[LeadId], max_duration: Duration) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let mut offset = match self.store.load_job_cursor(job_name).await? {
            Some(JobCursor::Offset(offset)) => offset.min(cohort.len()),
            _ => 0,
        };
        let batch_size = self.config.batch_size.max(1);

        while offset < cohort.len() {
            if started.elapsed() >= max_duration {
                tracing::warn!(job = job_name, offset, total = cohort.len(), "backfill paused at deadline");
                return Ok(report);
            }
            let end = (offset + batch_size).min(cohort.len());
            report.totals.merge(self.rescore(&cohort[offset..end]).await?);
            report.batches += 1;
            offset = end;
            self.store
                .save_job_cursor(job_name, Some(JobCursor::Offset(offset)))
                .await?;
        }

        self.store.save_job_cursor(job_name, None).await?;
        report.completed = true;
        tracing::info!(
            job = job_name,
            batches = report.batches,
            succeeded = report.totals.succeeded,
            skipped = report.totals.skipped,
            failed = report.totals.failed,
            "backfill completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryStore, StaticEligibilitySource};
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    struct Fixture {
        store: Arc<InMemoryStore>,
        source: Arc<StaticEligibilitySource>,
        clock: FixedClock,
        engine: ScoringEngine,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn fixture(config: ScoringConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        let source = Arc::new(StaticEligibilitySource::new());
        let clock = FixedClock::new(t0());
        let engine = ScoringEngine::new(
            store.clone(),
            source.clone(),
            Arc::new(clock.clone()),
            config,
            RetryPolicy::none(),
        );
        Fixture {
            store,
            source,
            clock,
            engine,
        }
    }

    fn leads(ids: &[&str]) -> Vec<LeadId> {
        ids.iter().map(|id| LeadId::new(*id)).collect()
    }

    #[tokio::test]
    async fn new_leads_are_classified_and_audited() {
        let f = fixture(ScoringConfig::default());
        f.source.set("a", EligibilityFacts::new(false, 0));
        f.source.set("b", EligibilityFacts::new(true, 2));
        f.source.set("c", EligibilityFacts::new(true, 0));

        let report = f.engine.rescore(&leads(&["a", "b", "c"])).await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.reclassified, 2);

        let a = f.store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.queue_type, QueueType::Unsigned);
        assert!(a.is_active);
        let c = f.store.get_score(&LeadId::new("c")).await.unwrap().unwrap();
        assert_eq!(c.queue_type, QueueType::None);
        assert!(!c.is_active);

        // "c" never entered a queue, so only two records.
        let transitions = f.store.all_transitions().await.unwrap();
        assert_eq!(transitions.len(), 2);
        assert!(transitions.iter().all(|t| t.source == TransitionSource::Scoring));
    }

    #[tokio::test]
    async fn missing_leads_are_skipped_with_reason() {
        let f = fixture(ScoringConfig::default());
        f.source.set("a", EligibilityFacts::new(false, 0));

        let report = f.engine.rescore(&leads(&["a", "ghost"])).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures[0].lead_id, LeadId::new("ghost"));
    }

    #[tokio::test]
    async fn eligibility_outage_fails_the_batch_only() {
        let f = fixture(ScoringConfig::default());
        f.source.set("a", EligibilityFacts::new(false, 0));
        f.source.set_failing(true);

        let report = f.engine.rescore(&leads(&["a"])).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(f.store.get_score(&LeadId::new("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclassification_writes_one_transition_and_deactivates() {
        let f = fixture(ScoringConfig::default());
        f.source.set("a", EligibilityFacts::new(true, 1));
        f.engine.rescore(&leads(&["a"])).await.unwrap();

        f.source.set("a", EligibilityFacts::new(true, 0));
        let report = f.engine.rescore(&leads(&["a"])).await.unwrap();
        assert_eq!(report.reclassified, 1);

        let record = f.store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        assert_eq!(record.queue_type, QueueType::None);
        assert!(!record.is_active);

        let transitions = f.store.all_transitions().await.unwrap();
        assert_eq!(transitions.len(), 2);
        assert!(transitions[1].is_exit());

        // Unchanged class: no further record.
        f.engine.rescore(&leads(&["a"])).await.unwrap();
        assert_eq!(f.store.all_transitions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn aging_carries_the_partial_interval() {
        let f = fixture(ScoringConfig {
            aging_interval_secs: 600,
            aging_step: 2,
            ..ScoringConfig::default()
        });
        f.source.set("a", EligibilityFacts::new(false, 0));
        f.engine.rescore(&leads(&["a"])).await.unwrap();

        f.clock.advance(chrono::Duration::minutes(25));
        f.engine.rescore(&leads(&["a"])).await.unwrap();
        let record = f.store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        assert_eq!(record.time_penalty, -4);
        assert_eq!(record.last_queue_check, t0() + chrono::Duration::minutes(20));
        assert!(record.is_consistent());

        f.clock.advance(chrono::Duration::minutes(5));
        f.engine.rescore(&leads(&["a"])).await.unwrap();
        let record = f.store.get_score(&LeadId::new("a")).await.unwrap().unwrap();
        assert_eq!(record.time_penalty, -6);
    }

    #[tokio::test]
    async fn outcomes_raise_then_reset_the_penalty() {
        let f = fixture(ScoringConfig::default());
        f.source.set("a", EligibilityFacts::new(false, 0));
        f.engine.rescore(&leads(&["a"])).await.unwrap();
        let lead = LeadId::new("a");

        let mut last = 0;
        for _ in 0..3 {
            let record = f.engine.record_outcome(&lead, CallOutcome::NoAnswer).await.unwrap();
            assert!(record.outcome_penalty > last);
            last = record.outcome_penalty;
        }

        let record = f.engine.record_outcome(&lead, CallOutcome::Connected).await.unwrap();
        assert_eq!(record.outcome_penalty, 0);
        assert_eq!(record.total_attempts, 4);
        assert!(record.last_reset_at.is_some());
    }

    #[tokio::test]
    async fn run_cycle_resumes_from_cursor() {
        let f = fixture(ScoringConfig {
            batch_size: 2,
            ..ScoringConfig::default()
        });
        for lead in ["a", "b", "c", "d", "e"] {
            f.source.set(lead, EligibilityFacts::new(false, 0));
        }

        let paused = f.engine.run_cycle(Duration::ZERO).await.unwrap();
        assert!(!paused.completed);
        assert_eq!(paused.batches, 0);

        let report = f.engine.run_cycle(Duration::from_secs(60)).await.unwrap();
        assert!(report.completed);
        assert_eq!(report.batches, 3);
        assert_eq!(report.totals.succeeded, 5);
        assert!(f.store.load_job_cursor(SCORING_JOB).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backfill_is_resumable_and_idempotent() {
        let f = fixture(ScoringConfig {
            batch_size: 2,
            ..ScoringConfig::default()
        });
        let cohort = leads(&["a", "b", "c"]);
        for lead in &cohort {
            f.source.set(lead.clone(), EligibilityFacts::new(true, 1));
        }
        f.store
            .save_job_cursor("migrate", Some(JobCursor::Offset(2)))
            .await
            .unwrap();

        let report = f.engine.backfill("migrate", &cohort, Duration::from_secs(60)).await.unwrap();
        assert!(report.completed);
        assert_eq!(report.totals.succeeded, 1);

        let again = f.engine.backfill("migrate", &cohort, Duration::from_secs(60)).await.unwrap();
        assert_eq!(again.totals.succeeded, 3);
        assert_eq!(again.totals.reclassified, 2);
    }
}
