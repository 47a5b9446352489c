//! StaticEligibilitySource - テスト・デモ用の eligibility system-of-record
//!
//! 事実はテストから直接書き換えられる（set / forget）。
//! `set_failing(true)` で一時的な障害を再現する。

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::{EligibilityFacts, LeadId, Result, RouterError};
use crate::ports::EligibilitySource;

#[derive(Default)]
pub struct StaticEligibilitySource {
    facts: Mutex<BTreeMap<LeadId, EligibilityFacts>>,
    failing: AtomicBool,
    /// Number of single-lead lookups served (live re-checks).
    lookups: AtomicUsize,
}

impl StaticEligibilitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, lead_id: impl Into<LeadId>, facts: EligibilityFacts) {
        self.facts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(lead_id.into(), facts);
    }

    /// The source no longer knows the lead.
    pub fn forget(&self, lead_id: &LeadId) {
        self.facts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(lead_id);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RouterError::EligibilityUnavailable("static source marked failing".into()));
        }
        Ok(())
    }

    fn snapshot(&self) -> std::sync::MutexGuard<'_, BTreeMap<LeadId, EligibilityFacts>> {
        self.facts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EligibilitySource for StaticEligibilitySource {
    async fn get_eligibility(&self, lead_id: &LeadId) -> Result<Option<EligibilityFacts>> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot().get(lead_id).copied())
    }

    async fn get_eligibility_batch(&self, lead_ids: &[LeadId]) -> Result<HashMap<LeadId, EligibilityFacts>> {
        self.check_available()?;
        let facts = self.snapshot();
        Ok(lead_ids
            .iter()
            .filter_map(|id| facts.get(id).map(|f| (id.clone(), *f)))
            .collect())
    }

    async fn list_leads(&self, after: Option<&LeadId>, limit: usize) -> Result<Vec<LeadId>> {
        self.check_available()?;
        let facts = self.snapshot();
        Ok(facts
            .keys()
            .filter(|id| after.is_none_or(|after| *id > after))
            .take(limit)
            .cloned()
            .collect())
    }
}
