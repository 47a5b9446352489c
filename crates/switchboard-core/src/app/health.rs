//! Queue health - 運用向けのステータスビュー

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::HealthConfig;
use crate::domain::{QueueType, Result};
use crate::ports::{Clock, RouterStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub pending_by_type: BTreeMap<QueueType, usize>,
    pub assigned_by_type: BTreeMap<QueueType, usize>,
    /// Stale assignments plus pending entries whose lead left the queue.
    pub orphaned_count: usize,
    pub last_refresh_by_type: BTreeMap<QueueType, Option<DateTime<Utc>>>,
    /// Age of the stalest routable queue. `None` until every queue was refreshed once.
    pub last_refresh_age_secs: Option<i64>,
}

pub struct HealthMonitor {
    store: Arc<dyn RouterStore>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn RouterStore>, clock: Arc<dyn Clock>, config: HealthConfig) -> Self {
        Self { store, clock, config }
    }

    pub async fn get_queue_health(&self) -> Result<QueueHealth> {
        let now = self.clock.now();
        let orphan_before = now - chrono::Duration::seconds(self.config.orphan_after_secs as i64);
        let counts = self.store.worklist_counts(orphan_before).await?;

        let mut health = QueueHealth {
            orphaned_count: counts.orphaned,
            ..QueueHealth::default()
        };
        let mut stalest: Option<i64> = Some(0);
        for queue_type in QueueType::ROUTABLE {
            health
                .pending_by_type
                .insert(queue_type, counts.pending_by_type.get(&queue_type).copied().unwrap_or(0));
            health
                .assigned_by_type
                .insert(queue_type, counts.assigned_by_type.get(&queue_type).copied().unwrap_or(0));

            let last = self.store.last_refresh(queue_type).await?;
            health.last_refresh_by_type.insert(queue_type, last);
            stalest = match (stalest, last) {
                (Some(age), Some(at)) => Some(age.max((now - at).num_seconds())),
                _ => None,
            };
        }
        health.last_refresh_age_secs = stalest;

        if health.orphaned_count > 0 {
            tracing::warn!(orphaned = health.orphaned_count, "orphaned worklist entries");
        }
        Ok(health)
    }
}
