//! InMemoryConversionLedger - テスト・デモ用の成約台帳

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ConversionEvent, LeadId, Result, RouterError};
use crate::ports::ConversionLedger;

#[derive(Default)]
pub struct InMemoryConversionLedger {
    events: Mutex<Vec<ConversionEvent>>,
    failing: AtomicBool,
}

impl InMemoryConversionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, lead_id: impl Into<LeadId>, converted_at: DateTime<Utc>) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ConversionEvent {
                lead_id: lead_id.into(),
                converted_at,
            });
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversionLedger for InMemoryConversionLedger {
    async fn list_conversions(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<ConversionEvent>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RouterError::LedgerUnavailable("in-memory ledger marked failing".into()));
        }
        let events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut window: Vec<_> = events
            .iter()
            .filter(|e| e.converted_at >= since && e.converted_at <= until)
            .cloned()
            .collect();
        window.sort_by_key(|e| e.converted_at);
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn conversions_are_filtered_and_sorted() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let ledger = InMemoryConversionLedger::new();
        ledger.record("b", t + chrono::Duration::minutes(10));
        ledger.record("a", t + chrono::Duration::minutes(1));
        ledger.record("c", t + chrono::Duration::hours(3));

        let found = ledger
            .list_conversions(t, t + chrono::Duration::hours(1))
            .await
            .unwrap();
        let leads: Vec<_> = found.iter().map(|e| e.lead_id.as_str()).collect();
        assert_eq!(leads, vec!["a", "b"]);
    }
}
