//! Router - コアの公開インターフェース
//!
//! dispatch 層・オペレーターツール・定期ジョブはすべてここを通る。
//! 各サービスは同じ RouterStore / Clock を共有する。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::audit::{LeakDetector, LeakScanReport, TransitionAudit};
use crate::app::callbacks::CallbackService;
use crate::app::dispatch::{Assignment, CompletionAck, Dispatcher, ValidatedCandidate};
use crate::app::generator::{QueueGenerator, RefreshReport};
use crate::app::health::{HealthMonitor, QueueHealth};
use crate::app::retention::{RetentionReport, RetentionSweeper};
use crate::app::retry::RetryPolicy;
use crate::app::scoring::{CycleReport, RescoreReport, ScoringEngine};
use crate::config::RouterConfig;
use crate::domain::{
    AgentId, CallOutcome, Callback, CallbackId, ClaimOutcome, EntryId, LeadId, QueueType, Result, ScoreRecord,
    TransitionRecord, WorklistEntry,
};
use crate::ports::{Clock, ConversionLedger, EligibilitySource, IdGenerator, RouterStore};

pub struct Router {
    config: RouterConfig,
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
    scoring: Arc<ScoringEngine>,
    generator: QueueGenerator,
    dispatcher: Dispatcher,
    callbacks: CallbackService,
    audit: TransitionAudit,
    leaks: LeakDetector,
    health: HealthMonitor,
    retention: RetentionSweeper,
}

impl Router {
    pub(crate) fn assemble(
        config: RouterConfig,
        store: Arc<dyn RouterStore>,
        eligibility: Arc<dyn EligibilitySource>,
        ledger: Arc<dyn ConversionLedger>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let scoring = Arc::new(ScoringEngine::new(
            store.clone(),
            eligibility.clone(),
            clock.clone(),
            config.scoring.clone(),
            retry.clone(),
        ));
        let generator = QueueGenerator::new(store.clone(), clock.clone(), config.generator.clone());
        let dispatcher = Dispatcher::new(
            store.clone(),
            eligibility,
            clock.clone(),
            scoring.clone(),
            &config.dispatch,
            retry.clone(),
        );
        let callbacks = CallbackService::new(store.clone(), clock.clone(), ids, config.callbacks.clone());
        let audit = TransitionAudit::new(store.clone(), clock.clone());
        let leaks = LeakDetector::new(store.clone(), ledger, clock.clone(), config.leaks.clone(), retry);
        let health = HealthMonitor::new(store.clone(), clock.clone(), config.health.clone());
        let retention = RetentionSweeper::new(store.clone(), clock.clone(), config.retention.clone());

        Self {
            config,
            store,
            clock,
            scoring,
            generator,
            dispatcher,
            callbacks,
            audit,
            leaks,
            health,
            retention,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RouterStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── dispatch layer ───────────────────────────────────────────────────────

    pub async fn request_next_lead(&self, queue_type: QueueType, agent: &AgentId) -> Result<Option<Assignment>> {
        self.dispatcher.request_next_lead(queue_type, agent).await
    }

    pub async fn next_candidate(&self, queue_type: QueueType, agent: &AgentId) -> Result<Option<ValidatedCandidate>> {
        self.dispatcher.validator().next_candidate(queue_type, agent).await
    }

    pub async fn claim(&self, entry_id: EntryId, agent: &AgentId) -> Result<ClaimOutcome> {
        self.dispatcher.claim(entry_id, agent).await
    }

    pub async fn complete_call(&self, entry_id: EntryId, outcome: CallOutcome) -> Result<CompletionAck> {
        self.dispatcher.complete_call(entry_id, outcome).await
    }

    // ── operator tooling ─────────────────────────────────────────────────────

    pub async fn schedule_callback(
        &self,
        lead_id: LeadId,
        preferred_agent: Option<AgentId>,
        scheduled_for: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<Callback> {
        self.callbacks
            .schedule(lead_id, preferred_agent, scheduled_for, reason)
            .await
    }

    pub async fn accept_callback(&self, callback_id: CallbackId, agent: AgentId) -> Result<WorklistEntry> {
        self.callbacks.accept(callback_id, agent).await
    }

    pub async fn snooze_callback(&self, callback_id: CallbackId, minutes: i64) -> Result<Callback> {
        self.callbacks.snooze(callback_id, minutes).await
    }

    pub async fn list_recent_transitions(&self, hours: u32, limit: usize) -> Result<Vec<TransitionRecord>> {
        self.audit.list_recent(hours, limit).await
    }

    pub async fn list_potential_leaks(&self, hours: u32, limit: usize) -> Result<Vec<TransitionRecord>> {
        self.leaks.list_potential_leaks(hours, limit).await
    }

    pub async fn get_queue_health(&self) -> Result<QueueHealth> {
        self.health.get_queue_health().await
    }

    // ── jobs ─────────────────────────────────────────────────────────────────

    pub async fn rescore(&self, lead_ids: &[LeadId]) -> Result<RescoreReport> {
        self.scoring.rescore(lead_ids).await
    }

    pub async fn record_outcome(&self, lead_id: &LeadId, outcome: CallOutcome) -> Result<ScoreRecord> {
        self.scoring.record_outcome(lead_id, outcome).await
    }

    pub async fn run_scoring_cycle(&self) -> Result<CycleReport> {
        self.scoring.run_cycle(self.config.scoring.max_duration()).await
    }

    pub async fn backfill(&self, job_name: &str, cohort: &[LeadId]) -> Result<CycleReport> {
        self.scoring
            .backfill(job_name, cohort, self.config.scoring.max_duration())
            .await
    }

    pub async fn refresh(&self, queue_type: QueueType) -> Result<RefreshReport> {
        self.generator.refresh(queue_type).await
    }

    pub async fn refresh_all(&self) -> Result<Vec<RefreshReport>> {
        self.generator.refresh_all().await
    }

    pub async fn promote_due_callbacks(&self) -> Result<usize> {
        self.callbacks.promote_due().await
    }

    pub async fn run_leak_scan(&self) -> Result<LeakScanReport> {
        self.leaks.run().await
    }

    pub async fn sweep_retention(&self) -> Result<RetentionReport> {
        self.retention.sweep().await
    }
}
