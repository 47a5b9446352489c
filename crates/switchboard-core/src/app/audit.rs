//! Transition audit の読み出しと leak detector
//!
//! # Leak detector
//! queue から出た（exit）レコードのうち、前後 `window` 以内に同じ lead の成約が
//! 台帳にあるものを reconcile 済みにする。窓が閉じても説明がつかないものが
//! potential leak。状態はクエリ時に計算し、score や entry には触れない。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::retry::{RetryPolicy, retry_transient};
use crate::config::LeakConfig;
use crate::domain::{LeadId, Result, TransitionId, TransitionRecord};
use crate::ports::{Clock, ConversionLedger, RouterStore};

pub struct TransitionAudit {
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
}

impl TransitionAudit {
    pub fn new(store: Arc<dyn RouterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records of the last `hours`, newest first.
    pub async fn list_recent(&self, hours: u32, limit: usize) -> Result<Vec<TransitionRecord>> {
        let since = self.clock.now() - chrono::Duration::hours(i64::from(hours));
        self.store.list_transitions(since, limit).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeakScanReport {
    /// Unreconciled exits inside the lookback horizon.
    pub examined: usize,
    pub reconciled: usize,
    /// Unmatched, but a conversion may still arrive.
    pub pending_window: usize,
    pub potential_leaks: usize,
}

pub struct LeakDetector {
    store: Arc<dyn RouterStore>,
    ledger: Arc<dyn ConversionLedger>,
    clock: Arc<dyn Clock>,
    config: LeakConfig,
    retry: RetryPolicy,
}

impl LeakDetector {
    pub fn new(
        store: Arc<dyn RouterStore>,
        ledger: Arc<dyn ConversionLedger>,
        clock: Arc<dyn Clock>,
        config: LeakConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            config,
            retry,
        }
    }

    pub async fn run(&self) -> Result<LeakScanReport> {
        let now = self.clock.now();
        let window = self.config.window();
        let since = now - chrono::Duration::hours(i64::from(self.config.lookback_hours));

        let exits = self.store.unreconciled_exits(since).await?;
        let mut report = LeakScanReport {
            examined: exits.len(),
            ..LeakScanReport::default()
        };
        let (Some(first), Some(last)) = (exits.first(), exits.last()) else {
            return Ok(report);
        };

        let (from, until) = (first.timestamp - window, last.timestamp + window);
        let conversions = retry_transient(&self.retry, "list-conversions", || {
            self.ledger.list_conversions(from, until)
        })
        .await?;

        let mut by_lead: HashMap<&LeadId, Vec<DateTime<Utc>>> = HashMap::new();
        for event in &conversions {
            by_lead.entry(&event.lead_id).or_default().push(event.converted_at);
        }
        for times in by_lead.values_mut() {
            times.sort();
        }

        let mut matched: Vec<TransitionId> = Vec::new();
        for exit in &exits {
            let explained = by_lead
                .get(&exit.lead_id)
                .and_then(|times| times.iter().find(|at| (**at - exit.timestamp).abs() <= window));

            match explained {
                Some(converted_at) => {
                    tracing::debug!(
                        transition_id = %exit.transition_id,
                        lead_id = %exit.lead_id,
                        converted_at = %converted_at,
                        "exit explained by conversion"
                    );
                    matched.push(exit.transition_id);
                }
                None if exit.timestamp + window < now => {
                    tracing::warn!(
                        transition_id = %exit.transition_id,
                        lead_id = %exit.lead_id,
                        from_queue = %exit.from_queue,
                        source = %exit.source,
                        exited_at = %exit.timestamp,
                        "potential leak: exit without a matching conversion"
                    );
                    report.potential_leaks += 1;
                }
                None => report.pending_window += 1,
            }
        }

        if !matched.is_empty() {
            report.reconciled = self.store.mark_conversion_logged(&matched).await?;
        }
        tracing::info!(
            examined = report.examined,
            reconciled = report.reconciled,
            pending_window = report.pending_window,
            potential_leaks = report.potential_leaks,
            "leak scan finished"
        );
        Ok(report)
    }

    /// Unreconciled exits of the last `hours` whose window has closed, newest first.
    pub async fn list_potential_leaks(&self, hours: u32, limit: usize) -> Result<Vec<TransitionRecord>> {
        let now = self.clock.now();
        let window = self.config.window();
        let since = now - chrono::Duration::hours(i64::from(hours));

        let mut leaks: Vec<_> = self
            .store
            .unreconciled_exits(since)
            .await?
            .into_iter()
            .filter(|exit| exit.timestamp + window < now)
            .collect();
        leaks.reverse();
        leaks.truncate(limit);
        Ok(leaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueType, TransitionDraft, TransitionSource};
    use crate::impls::{InMemoryConversionLedger, InMemoryStore};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        ledger: Arc<InMemoryConversionLedger>,
        clock: FixedClock,
        detector: LeakDetector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        let ledger = Arc::new(InMemoryConversionLedger::new());
        let clock = FixedClock::new(t0());
        let detector = LeakDetector::new(
            store.clone(),
            ledger.clone(),
            Arc::new(clock.clone()),
            LeakConfig::default(),
            RetryPolicy::none(),
        );
        Fixture {
            store,
            ledger,
            clock,
            detector,
        }
    }

    async fn exit(f: &Fixture, lead: &str, at: DateTime<Utc>) {
        let draft = TransitionDraft::new(
            LeadId::new(lead),
            QueueType::OutstandingRequirements,
            QueueType::None,
            TransitionSource::Scoring,
            "requirements satisfied",
        );
        f.store.append_transition(draft, at).await.unwrap();
    }

    #[tokio::test]
    async fn flags_exactly_the_unexplained_exit() {
        let f = fixture();
        exit(&f, "a", t0()).await;
        exit(&f, "b", t0()).await;
        f.ledger.record("a", t0() + chrono::Duration::minutes(2));

        f.clock.advance(chrono::Duration::minutes(10));
        let report = f.detector.run().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.reconciled, 1);
        assert_eq!(report.potential_leaks, 1);

        let leaks = f.detector.list_potential_leaks(24, 10).await.unwrap();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].lead_id, LeadId::new("b"));

        // Already reconciled records are not examined again.
        let again = f.detector.run().await.unwrap();
        assert_eq!(again.examined, 1);
        assert_eq!(again.reconciled, 0);
    }

    #[tokio::test]
    async fn open_window_is_not_a_leak_yet() {
        let f = fixture();
        exit(&f, "a", t0()).await;

        f.clock.advance(chrono::Duration::minutes(2));
        let report = f.detector.run().await.unwrap();
        assert_eq!(report.pending_window, 1);
        assert_eq!(report.potential_leaks, 0);

        // A late conversion inside the window still reconciles it.
        f.ledger.record("a", t0() + chrono::Duration::minutes(4));
        f.clock.advance(chrono::Duration::minutes(10));
        let report = f.detector.run().await.unwrap();
        assert_eq!(report.reconciled, 1);
        assert!(f.detector.list_potential_leaks(24, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversions_outside_the_window_do_not_count() {
        let f = fixture();
        exit(&f, "a", t0()).await;
        f.ledger.record("a", t0() - chrono::Duration::minutes(30));

        f.clock.advance(chrono::Duration::minutes(10));
        let report = f.detector.run().await.unwrap();
        assert_eq!(report.potential_leaks, 1);
    }

    #[tokio::test]
    async fn non_exit_records_are_ignored() {
        let f = fixture();
        let draft = TransitionDraft::new(
            LeadId::new("a"),
            QueueType::None,
            QueueType::Unsigned,
            TransitionSource::Scoring,
            "first classification",
        );
        f.store.append_transition(draft, t0()).await.unwrap();

        f.clock.advance(chrono::Duration::hours(1));
        let report = f.detector.run().await.unwrap();
        assert_eq!(report, LeakScanReport::default());
    }
}
