//! End-to-end scenarios over the in-memory adapters.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use switchboard_core::domain::{
    AgentId, CallOutcome, EligibilityFacts, EntryStatus, LeadId, QueueType, TransitionSource,
};
use switchboard_core::impls::{InMemoryConversionLedger, InMemoryStore, StaticEligibilitySource};
use switchboard_core::ports::{Clock, FixedClock, IdGenerator, RouterStore, UlidGenerator};
use switchboard_core::{Router, RouterBuilder, RouterConfig};

struct Harness {
    router: Arc<Router>,
    store: Arc<InMemoryStore>,
    source: Arc<StaticEligibilitySource>,
    ledger: Arc<InMemoryConversionLedger>,
    clock: FixedClock,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn harness(config: RouterConfig) -> Harness {
    let clock = FixedClock::new(t0());
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
    let store = Arc::new(InMemoryStore::new(ids.clone()));
    let source = Arc::new(StaticEligibilitySource::new());
    let ledger = Arc::new(InMemoryConversionLedger::new());
    let router = RouterBuilder::new()
        .config(config)
        .store(store.clone())
        .eligibility(source.clone())
        .ledger(ledger.clone())
        .clock(Arc::new(clock.clone()))
        .id_generator(ids)
        .build()
        .unwrap();
    Harness {
        router: Arc::new(router),
        store,
        source,
        ledger,
        clock,
    }
}

fn unsigned() -> EligibilityFacts {
    EligibilityFacts::new(false, 0)
}

fn lead(i: usize) -> LeadId {
    LeadId::new(format!("lead-{i:03}"))
}

async fn active_lead_counts(store: &InMemoryStore, leads: &[LeadId]) -> Vec<usize> {
    let mut counts = Vec::new();
    for lead_id in leads {
        counts.push(store.active_entries_for_lead(lead_id).await.unwrap().len());
    }
    counts
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner() {
    let h = harness(RouterConfig::default());
    h.source.set(lead(1), unsigned());
    h.router.rescore(&[lead(1)]).await.unwrap();
    h.router.refresh(QueueType::Unsigned).await.unwrap();

    let entry = h.store.list_entries(QueueType::Unsigned).await.unwrap().remove(0);

    let mut joins = Vec::new();
    for i in 0..16 {
        let router = Arc::clone(&h.router);
        let entry_id = entry.entry_id;
        joins.push(tokio::spawn(async move {
            router.claim(entry_id, &AgentId::new(format!("agent-{i}"))).await.unwrap()
        }));
    }

    let mut winners = 0;
    for join in joins {
        if join.await.unwrap().is_claimed() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_agents_never_share_a_lead() {
    let mut config = RouterConfig::default();
    // More attempts than leads: an agent can only lose to a successful claim.
    config.dispatch.max_claim_attempts = 20;
    let h = harness(config);
    let leads: Vec<LeadId> = (0..8).map(lead).collect();
    for lead_id in &leads {
        h.source.set(lead_id.clone(), unsigned());
    }
    h.router.rescore(&leads).await.unwrap();
    h.router.refresh(QueueType::Unsigned).await.unwrap();

    let mut joins = Vec::new();
    for i in 0..12 {
        let router = Arc::clone(&h.router);
        joins.push(tokio::spawn(async move {
            router
                .request_next_lead(QueueType::Unsigned, &AgentId::new(format!("agent-{i}")))
                .await
                .unwrap()
        }));
    }

    let mut assigned = HashSet::new();
    for join in joins {
        if let Some(assignment) = join.await.unwrap() {
            assert!(assigned.insert(assignment.lead_id), "lead handed out twice");
        }
    }
    assert_eq!(assigned.len(), 8);
    assert!(active_lead_counts(&h.store, &leads).await.iter().all(|n| *n <= 1));
}

#[tokio::test]
async fn refresh_keeps_the_top_n_and_is_idempotent() {
    let mut config = RouterConfig::default();
    config.generator.worklist_size = 3;
    let h = harness(config);
    let leads: Vec<LeadId> = (0..6).map(lead).collect();
    for lead_id in &leads {
        h.source.set(lead_id.clone(), unsigned());
    }
    h.router.rescore(&leads).await.unwrap();
    // Failures push leads 0..3 down the ranking.
    for lead_id in &leads[..3] {
        h.router.record_outcome(lead_id, CallOutcome::Busy).await.unwrap();
    }

    let first = h.router.refresh(QueueType::Unsigned).await.unwrap();
    assert_eq!(first.populated, 3);
    let pending: HashSet<LeadId> = h
        .store
        .list_entries(QueueType::Unsigned)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.status == EntryStatus::Pending)
        .map(|e| e.lead_id)
        .collect();
    assert_eq!(pending, leads[3..].iter().cloned().collect());

    let second = h.router.refresh(QueueType::Unsigned).await.unwrap();
    assert_eq!(second.populated, 0);
    assert_eq!(second.removed, 0);
}

#[tokio::test]
async fn score_components_always_sum_up() {
    let h = harness(RouterConfig::default());
    let leads: Vec<LeadId> = (0..4).map(lead).collect();
    for lead_id in &leads {
        h.source.set(lead_id.clone(), EligibilityFacts::new(true, 1));
    }

    for round in 0..5 {
        h.router.rescore(&leads).await.unwrap();
        h.router
            .record_outcome(&leads[round % leads.len()], CallOutcome::NoAnswer)
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(37));
    }

    for lead_id in &leads {
        let record = h.store.get_score(lead_id).await.unwrap().unwrap();
        assert!(record.is_consistent(), "{record:?}");
    }
}

#[tokio::test]
async fn drifted_top_candidates_are_skipped() {
    let h = harness(RouterConfig::default());
    let leads: Vec<LeadId> = (0..3).map(lead).collect();
    for lead_id in &leads {
        h.source.set(lead_id.clone(), unsigned());
    }
    h.router.rescore(&leads).await.unwrap();
    // Rank: lead-002 (fresh), then lead-001, then lead-000.
    h.router.record_outcome(&leads[0], CallOutcome::NoAnswer).await.unwrap();
    h.router.record_outcome(&leads[0], CallOutcome::NoAnswer).await.unwrap();
    h.router.record_outcome(&leads[1], CallOutcome::NoAnswer).await.unwrap();
    h.router.refresh(QueueType::Unsigned).await.unwrap();
    let before = h.store.all_transitions().await.unwrap().len();

    // The top two signed meanwhile.
    h.source.set(leads[2].clone(), EligibilityFacts::new(true, 0));
    h.source.set(leads[1].clone(), EligibilityFacts::new(true, 2));

    let agent = AgentId::new("alice");
    let candidate = h
        .router
        .next_candidate(QueueType::Unsigned, &agent)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(candidate.lead_id, leads[0]);
    assert_eq!(candidate.skipped, 2);

    let transitions = h.store.all_transitions().await.unwrap();
    let drift: Vec<_> = transitions[before..].iter().collect();
    assert_eq!(drift.len(), 2);
    assert!(drift.iter().all(|t| t.source == TransitionSource::PreDispatchValidation));

    let removed = h
        .store
        .list_entries(QueueType::Unsigned)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.status == EntryStatus::Removed)
        .count();
    assert_eq!(removed, 2);
}

#[tokio::test]
async fn callback_accept_overrides_a_pending_entry() {
    let h = harness(RouterConfig::default());
    h.source.set(lead(1), unsigned());
    h.router.rescore(&[lead(1)]).await.unwrap();
    h.router.refresh(QueueType::Unsigned).await.unwrap();
    let prior = h.store.list_entries(QueueType::Unsigned).await.unwrap().remove(0);

    let callback = h
        .router
        .schedule_callback(lead(1), None, t0(), "wants to talk to a person")
        .await
        .unwrap();
    let entry = h
        .router
        .accept_callback(callback.callback_id, AgentId::new("alice"))
        .await
        .unwrap();

    assert_eq!(entry.status, EntryStatus::Assigned);
    assert!(entry.priority.is_override());
    assert_eq!(
        h.store.get_entry(prior.entry_id).await.unwrap().unwrap().status,
        EntryStatus::Removed
    );
    let active = h.store.active_entries_for_lead(&lead(1)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].entry_id, entry.entry_id);

    let overrides = h
        .store
        .all_transitions()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.source == TransitionSource::CallbackOverride)
        .count();
    assert_eq!(overrides, 1);

    // Completing the override call closes the callback.
    h.router.complete_call(entry.entry_id, CallOutcome::Connected).await.unwrap();
    let stored = h.store.get_callback(callback.callback_id).await.unwrap().unwrap();
    assert_eq!(stored.status, switchboard_core::domain::CallbackStatus::Completed);
}

#[tokio::test]
async fn override_beats_every_scored_entry() {
    let h = harness(RouterConfig::default());
    let leads: Vec<LeadId> = (0..3).map(lead).collect();
    for lead_id in &leads {
        h.source.set(lead_id.clone(), unsigned());
    }
    h.router.rescore(&leads).await.unwrap();
    for _ in 0..5 {
        h.router.record_outcome(&leads[2], CallOutcome::NoAnswer).await.unwrap();
    }
    h.router.refresh(QueueType::Unsigned).await.unwrap();

    h.router
        .schedule_callback(leads[2].clone(), None, t0(), "promised a call at nine")
        .await
        .unwrap();
    assert_eq!(h.router.promote_due_callbacks().await.unwrap(), 1);

    let assignment = h
        .router
        .request_next_lead(QueueType::Unsigned, &AgentId::new("bob"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(assignment.lead_id, leads[2]);
    assert!(assignment.priority.is_override());
}

#[tokio::test]
async fn leak_detector_flags_exactly_the_unexplained_exit() {
    let h = harness(RouterConfig::default());
    let leads: Vec<LeadId> = (0..2).map(lead).collect();
    for lead_id in &leads {
        h.source.set(lead_id.clone(), EligibilityFacts::new(true, 1));
    }
    h.router.rescore(&leads).await.unwrap();

    // Both leave the queue; only lead-000 converted.
    h.clock.advance(Duration::minutes(1));
    for lead_id in &leads {
        h.source.set(lead_id.clone(), EligibilityFacts::new(true, 0));
    }
    h.router.rescore(&leads).await.unwrap();
    h.ledger.record(leads[0].clone(), h.clock.now() + Duration::minutes(3));

    h.clock.advance(Duration::minutes(15));
    let report = h.router.run_leak_scan().await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.potential_leaks, 1);

    let leaks = h.router.list_potential_leaks(24, 10).await.unwrap();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].lead_id, leads[1]);
    assert_eq!(leaks[0].to_queue, QueueType::None);
}

#[tokio::test]
async fn every_transition_is_audited_once() {
    let h = harness(RouterConfig::default());
    h.source.set(lead(1), unsigned());
    h.router.rescore(&[lead(1)]).await.unwrap();
    h.source.set(lead(1), EligibilityFacts::new(true, 2));
    h.router.rescore(&[lead(1)]).await.unwrap();
    h.source.set(lead(1), EligibilityFacts::new(true, 0));
    h.router.rescore(&[lead(1)]).await.unwrap();
    h.router.rescore(&[lead(1)]).await.unwrap();

    let recent = h.router.list_recent_transitions(1, 10).await.unwrap();
    let path: Vec<(QueueType, QueueType)> = recent.iter().rev().map(|t| (t.from_queue, t.to_queue)).collect();
    assert_eq!(
        path,
        vec![
            (QueueType::None, QueueType::Unsigned),
            (QueueType::Unsigned, QueueType::OutstandingRequirements),
            (QueueType::OutstandingRequirements, QueueType::None),
        ]
    );
}

#[tokio::test]
async fn storage_outage_surfaces_as_an_error() {
    let h = harness(RouterConfig::default());
    h.store.set_unavailable(true);
    let err = h
        .router
        .request_next_lead(QueueType::Unsigned, &AgentId::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, switchboard_core::RouterError::StorageUnavailable(_)));
}
