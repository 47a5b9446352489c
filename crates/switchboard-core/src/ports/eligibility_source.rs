//! EligibilitySource port - 外部の system-of-record（読み取り専用）
//!
//! コアは lead の事実（署名・未提出書類の数）を読むだけで、書き込まない。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{EligibilityFacts, LeadId, Result};

#[async_trait]
pub trait EligibilitySource: Send + Sync {
    /// Live facts for one lead. `None` if the source no longer knows the lead.
    /// Implementations must not serve this from a cache.
    async fn get_eligibility(&self, lead_id: &LeadId) -> Result<Option<EligibilityFacts>>;

    /// Facts for a batch. Leads the source does not know are absent from the map.
    async fn get_eligibility_batch(&self, lead_ids: &[LeadId]) -> Result<HashMap<LeadId, EligibilityFacts>>;

    /// Lead identities in ascending order, strictly after `after`.
    async fn list_leads(&self, after: Option<&LeadId>, limit: usize) -> Result<Vec<LeadId>>;
}
